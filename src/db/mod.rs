//! The authoritative loco/turnout database (§3, §4 component #3/#4).
//!
//! Both databases are typed views over the same INI-backed persistence
//! layer used by [`crate::config`]: one section per address, lazily
//! flushed through the same coalescing window. Records are created on
//! first reference (from a request, a DB load, or the sniffer) and
//! mutated in place; nothing here owns a second copy of the data once it
//! has been touched, so callers always see the current authoritative
//! state.

pub mod loco;
pub mod turnout;

pub use loco::{DccADescriptor, FunctionConfig, LocoDb, LocoFormat, LocoRecord};
pub use turnout::{TurnoutDb, TurnoutFormat, TurnoutRecord};

/// Commanded direction of a turnout, and the direction bit a loco's speed
/// byte carries (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Straight,
    Thrown,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "straight" | "0" => Some(Direction::Straight),
            "thrown" | "1" => Some(Direction::Thrown),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Straight => "straight",
            Direction::Thrown => "thrown",
        }
    }
}
