//! `TurnoutRecord`: accessory-address identity, decoder format, and last
//! known position (§3).

use crate::config::ini::Section;
use crate::config::{ConfigBackend, ConfigStore};
use crate::error::{Error, Result};

use super::Direction;

pub const MIN_ADDRESS: u16 = 1;
pub const MAX_ADDRESS: u16 = 2048;

/// Decoder format a turnout/accessory decoder responds to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnoutFormat {
    Dcc,
    Mm,
    BiDiB,
}

impl TurnoutFormat {
    pub fn to_key(self) -> &'static str {
        match self {
            TurnoutFormat::Dcc => "dcc",
            TurnoutFormat::Mm => "mm",
            TurnoutFormat::BiDiB => "bidib",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "dcc" => TurnoutFormat::Dcc,
            "mm" => TurnoutFormat::Mm,
            "bidib" => TurnoutFormat::BiDiB,
            _ => return None,
        })
    }

    /// Minimum/maximum honoured switching time in ms (§3 invariant:
    /// "min/max switching time honoured per format").
    pub fn switching_time_bounds_ms(self) -> (u32, u32) {
        match self {
            TurnoutFormat::Dcc => (20, 60_000),
            TurnoutFormat::Mm => (100, 60_000),
            TurnoutFormat::BiDiB => (10, 60_000),
        }
    }
}

/// Authoritative accessory identity and last-known state (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnoutRecord {
    pub address: u16,
    pub format: TurnoutFormat,
    pub bidib_uid: Option<u64>,
    pub bidib_aspect: Option<u8>,
    pub last_direction: Direction,
    pub last_on: bool,
    pub pending_off_deadline_ms: Option<u64>,
}

impl TurnoutRecord {
    pub fn new(address: u16, format: TurnoutFormat) -> Result<Self> {
        validate_address(address)?;
        Ok(Self {
            address,
            format,
            bidib_uid: None,
            bidib_aspect: None,
            last_direction: Direction::Straight,
            last_on: false,
            pending_off_deadline_ms: None,
        })
    }

    /// Arm the switch-off deadline for a timed command, clamped to this
    /// format's honoured switching-time bounds (§3).
    pub fn arm_timed_off(&mut self, now_ms: u64, requested_ms: u32) {
        let (min, max) = self.format.switching_time_bounds_ms();
        let clamped = requested_ms.clamp(min, max) as u64;
        self.pending_off_deadline_ms = Some(now_ms + clamped);
    }

    fn to_section(&self) -> Section {
        let mut section = Section::default();
        section.set("fmt", self.format.to_key());
        if let Some(uid) = self.bidib_uid {
            section.set("uid", uid.to_string());
        }
        if let Some(aspect) = self.bidib_aspect {
            section.set("aspect", aspect.to_string());
        }
        section.set("dir", self.last_direction.as_str());
        section
    }

    fn from_section(address: u16, section: &Section) -> Option<Self> {
        let format = TurnoutFormat::from_key(section.get("fmt")?)?;
        let bidib_uid = section.get("uid").and_then(|v| v.parse().ok());
        let bidib_aspect = section.get("aspect").and_then(|v| v.parse().ok());
        let last_direction = section
            .get("dir")
            .and_then(Direction::parse)
            .unwrap_or(Direction::Straight);
        Some(Self {
            address,
            format,
            bidib_uid,
            bidib_aspect,
            last_direction,
            last_on: false,
            pending_off_deadline_ms: None,
        })
    }
}

pub fn validate_address(address: u16) -> Result<()> {
    if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&address) {
        return Err(Error::InvalidParam(format!(
            "turnout address {address} out of range {MIN_ADDRESS}..={MAX_ADDRESS}"
        )));
    }
    Ok(())
}

fn section_name(address: u16) -> String {
    format!("turnout.{address}")
}

/// Persisted map accessory-address -> [`TurnoutRecord`].
pub struct TurnoutDb<B: ConfigBackend> {
    store: ConfigStore<B>,
}

impl<B: ConfigBackend> TurnoutDb<B> {
    pub fn load(backend: B) -> Result<Self> {
        Ok(Self {
            store: ConfigStore::load(backend)?,
        })
    }

    pub fn get(&self, address: u16) -> Option<TurnoutRecord> {
        let section = self.store.doc().section(&section_name(address))?;
        TurnoutRecord::from_section(address, section)
    }

    pub fn upsert(&mut self, record: &TurnoutRecord, now_ms: u64) -> Result<()> {
        validate_address(record.address)?;
        let section = record.to_section();
        let name = section_name(record.address);
        self.store.with_section_mut(&name, now_ms, |s| *s = section);
        Ok(())
    }

    pub fn remove(&mut self, address: u16, now_ms: u64) {
        self.store.remove_section(&section_name(address), now_ms);
    }

    pub fn tick(&mut self, now_ms: u64) {
        self.store.tick(now_ms);
    }

    pub fn flush_now(&mut self) -> Result<()> {
        self.store.flush_now()
    }

    pub fn all(&self) -> impl Iterator<Item = TurnoutRecord> + '_ {
        self.store.doc().sections().filter_map(|(name, section)| {
            let address: u16 = name.strip_prefix("turnout.")?.parse().ok()?;
            TurnoutRecord::from_section(address, section)
        })
    }
}
