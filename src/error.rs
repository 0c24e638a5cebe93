//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Error`]. Bit-timing and
//! packet-stream errors are recovered locally by the sniffer/sequencer and
//! never reach a caller as an `Error`; only requests rejected at a queue
//! boundary, booster/power faults, programming-track timeouts, and
//! persistence failures are surfaced this way.

use thiserror::Error as ThisError;

/// The single error type shared by every component in this crate.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A caller-supplied parameter failed validation (out of range, malformed).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A bounded structure (refresh buffer, event queue, ...) is full.
    #[error("out of capacity")]
    OutOfCapacity,

    /// A timed operation (event subscription, programming-track ACK window,
    /// RailCom cutout) elapsed with no result.
    #[error("timeout expired")]
    TimeoutExpired,

    /// A received packet failed its checksum (DCC XOR, RailCom CRC).
    #[error("checksum invalid")]
    ChecksumInvalid,

    /// A decode state machine observed edges it cannot interpret in its
    /// current state and has resynchronized.
    #[error("protocol out of sync")]
    ProtocolOutOfSync,

    /// The booster declared a short (current over limit for longer than
    /// `short_time_ms`).
    #[error("booster short")]
    BoosterShort,

    /// The booster's temperature threshold was crossed.
    #[error("booster over temperature")]
    BoosterOverTemp,

    /// The supply failed outright; the caller should treat this as terminal.
    #[error("power fail")]
    PowerFail,

    /// A persisted store failed to read or write.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The operation cannot complete right now but may succeed if retried
    /// (e.g. a mutex could not be acquired within its timeout).
    #[error("busy, retry")]
    BusyRetry,
}

pub type Result<T> = core::result::Result<T, Error>;
