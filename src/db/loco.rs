//! `LocoRecord`: identity, decoder format, function state and aliases for
//! one locomotive address (§3).

use std::collections::BTreeMap;

use crate::config::ini::Section;
use crate::config::{ConfigBackend, ConfigStore};
use crate::error::{Error, Result};

/// Minimum and maximum loco addresses (§3).
pub const MIN_ADDRESS: u16 = 1;
pub const MAX_ADDRESS: u16 = 10239;

/// Address 0 is the reserved "default loco" template (§8 boundary
/// behaviour): it returns the default format record and is never
/// refreshable.
pub const DEFAULT_TEMPLATE_ADDRESS: u16 = 0;

/// Decoder format a loco responds to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocoFormat {
    Mm1Steps14,
    Mm1Steps27,
    Mm2Steps14,
    Mm2Steps27,
    Dcc14,
    Dcc28,
    Dcc126,
    DccSdf,
    M3,
    DccA,
    RailComPlus,
}

impl LocoFormat {
    /// The `max_func` ceiling this format is coherent with (§3 invariant:
    /// "MM formats imply `max_func <= 4`").
    pub fn max_func_ceiling(self) -> u8 {
        match self {
            LocoFormat::Mm1Steps14 | LocoFormat::Mm1Steps27 => 1,
            LocoFormat::Mm2Steps14 | LocoFormat::Mm2Steps27 => 4,
            _ => 68,
        }
    }

    pub fn to_key(self) -> &'static str {
        match self {
            LocoFormat::Mm1Steps14 => "mm1-14",
            LocoFormat::Mm1Steps27 => "mm1-27",
            LocoFormat::Mm2Steps14 => "mm2-14",
            LocoFormat::Mm2Steps27 => "mm2-27",
            LocoFormat::Dcc14 => "dcc-14",
            LocoFormat::Dcc28 => "dcc-28",
            LocoFormat::Dcc126 => "dcc-126",
            LocoFormat::DccSdf => "dcc-sdf",
            LocoFormat::M3 => "m3",
            LocoFormat::DccA => "dcc-a",
            LocoFormat::RailComPlus => "railcomplus",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "mm1-14" => LocoFormat::Mm1Steps14,
            "mm1-27" => LocoFormat::Mm1Steps27,
            "mm2-14" => LocoFormat::Mm2Steps14,
            "mm2-27" => LocoFormat::Mm2Steps27,
            "dcc-14" => LocoFormat::Dcc14,
            "dcc-28" => LocoFormat::Dcc28,
            "dcc-126" => LocoFormat::Dcc126,
            "dcc-sdf" => LocoFormat::DccSdf,
            "m3" => LocoFormat::M3,
            "dcc-a" => LocoFormat::DccA,
            "railcomplus" => LocoFormat::RailComPlus,
            _ => return None,
        })
    }

    pub fn is_mm(self) -> bool {
        matches!(
            self,
            LocoFormat::Mm1Steps14 | LocoFormat::Mm1Steps27 | LocoFormat::Mm2Steps14 | LocoFormat::Mm2Steps27
        )
    }
}

/// Per-function presentation/timing, e.g. "this is a sound function with a
/// 200 ms minimum hold" (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionConfig {
    pub icon: u16,
    pub timing_ms: u16,
}

/// Optional DCC-A auto-discovery descriptor (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccADescriptor {
    pub vendor: String,
    pub product: String,
    pub hw_version: String,
    pub fw_version: String,
    pub requested_address: Option<u16>,
}

/// Authoritative loco identity and configuration (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocoRecord {
    pub address: u16,
    pub format: LocoFormat,
    pub max_func: u8,
    pub name: String,
    pub functions: BTreeMap<u8, FunctionConfig>,
    pub vid: Option<u16>,
    pub uid: Option<u32>,
    pub dcc_a: Option<DccADescriptor>,
}

impl LocoRecord {
    pub fn new(address: u16, format: LocoFormat) -> Result<Self> {
        validate_address(address)?;
        Ok(Self {
            address,
            format,
            max_func: 0,
            name: String::new(),
            functions: BTreeMap::new(),
            vid: None,
            uid: None,
            dcc_a: None,
        })
    }

    /// The built-in template returned for [`DEFAULT_TEMPLATE_ADDRESS`].
    pub fn default_template() -> Self {
        Self {
            address: DEFAULT_TEMPLATE_ADDRESS,
            format: LocoFormat::Dcc28,
            max_func: 0,
            name: String::new(),
            functions: BTreeMap::new(),
            vid: None,
            uid: None,
            dcc_a: None,
        }
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.len() > 28 {
            return Err(Error::InvalidParam(format!(
                "loco name {name:?} exceeds 28 bytes"
            )));
        }
        self.name = name.to_string();
        Ok(())
    }

    pub fn set_max_func(&mut self, max_func: u8) -> Result<()> {
        if max_func > self.format.max_func_ceiling() {
            return Err(Error::InvalidParam(format!(
                "max_func {max_func} exceeds ceiling {} for format {:?}",
                self.format.max_func_ceiling(),
                self.format
            )));
        }
        self.max_func = max_func;
        Ok(())
    }

    fn to_section(&self) -> Section {
        let mut section = Section::default();
        section.set("fmt", self.format.to_key());
        section.set("maxfunc", self.max_func.to_string());
        section.set("name", self.name.clone());
        if let Some(vid) = self.vid {
            section.set("vid", vid.to_string());
        }
        if let Some(uid) = self.uid {
            section.set("uid", uid.to_string());
        }
        for (idx, func) in &self.functions {
            section.set_indexed("func", *idx as u32, format!("{}|{}", func.icon, func.timing_ms));
        }
        if let Some(d) = &self.dcc_a {
            section.set("dcca.vendor", d.vendor.clone());
            section.set("dcca.product", d.product.clone());
            section.set("dcca.hw", d.hw_version.clone());
            section.set("dcca.fw", d.fw_version.clone());
            if let Some(addr) = d.requested_address {
                section.set("dcca.reqaddr", addr.to_string());
            }
        }
        section
    }

    fn from_section(address: u16, section: &Section) -> Option<Self> {
        let format = LocoFormat::from_key(section.get("fmt")?)?;
        let max_func = section.get("maxfunc").and_then(|v| v.parse().ok()).unwrap_or(0);
        let name = section.get("name").unwrap_or("").to_string();
        let vid = section.get("vid").and_then(|v| v.parse().ok());
        let uid = section.get("uid").and_then(|v| v.parse().ok());
        let mut functions = BTreeMap::new();
        for idx in 0..=max_func {
            if let Some(raw) = section.get_indexed("func", idx as u32) {
                if let Some((icon, timing)) = raw.split_once('|') {
                    if let (Ok(icon), Ok(timing)) = (icon.parse(), timing.parse()) {
                        functions.insert(idx, FunctionConfig { icon, timing_ms: timing });
                    }
                }
            }
        }
        let dcc_a = section.get("dcca.vendor").map(|vendor| DccADescriptor {
            vendor: vendor.to_string(),
            product: section.get("dcca.product").unwrap_or("").to_string(),
            hw_version: section.get("dcca.hw").unwrap_or("").to_string(),
            fw_version: section.get("dcca.fw").unwrap_or("").to_string(),
            requested_address: section.get("dcca.reqaddr").and_then(|v| v.parse().ok()),
        });
        Some(Self {
            address,
            format,
            max_func,
            name,
            functions,
            vid,
            uid,
            dcc_a,
        })
    }
}

pub fn validate_address(address: u16) -> Result<()> {
    if address == DEFAULT_TEMPLATE_ADDRESS {
        return Ok(());
    }
    if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&address) {
        return Err(Error::InvalidParam(format!(
            "loco address {address} out of range {MIN_ADDRESS}..={MAX_ADDRESS}"
        )));
    }
    Ok(())
}

fn section_name(address: u16) -> String {
    format!("loco.{address}")
}

/// Persisted map address -> [`LocoRecord`], one INI section per address.
pub struct LocoDb<B: ConfigBackend> {
    store: ConfigStore<B>,
}

impl<B: ConfigBackend> LocoDb<B> {
    pub fn load(backend: B) -> Result<Self> {
        Ok(Self {
            store: ConfigStore::load(backend)?,
        })
    }

    pub fn get(&self, address: u16) -> Option<LocoRecord> {
        if address == DEFAULT_TEMPLATE_ADDRESS {
            return Some(LocoRecord::default_template());
        }
        let section = self.store.doc().section(&section_name(address))?;
        LocoRecord::from_section(address, section)
    }

    pub fn upsert(&mut self, record: &LocoRecord, now_ms: u64) -> Result<()> {
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

    pub fn all(&self) -> impl Iterator<Item = LocoRecord> + '_ {
        self.store.doc().sections().filter_map(|(name, section)| {
            let address: u16 = name.strip_prefix("loco.")?.parse().ok()?;
            LocoRecord::from_section(address, section)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryBackend;

    #[test]
    fn default_template_is_not_persisted_and_always_present() {
        let db: LocoDb<MemoryBackend> = LocoDb::load(MemoryBackend::default()).unwrap();
        let record = db.get(DEFAULT_TEMPLATE_ADDRESS).unwrap();
        assert_eq!(record.address, 0);
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let mut db: LocoDb<MemoryBackend> = LocoDb::load(MemoryBackend::default()).unwrap();
        let mut record = LocoRecord::new(3, LocoFormat::Dcc28).unwrap();
        record.set_name("BR 50").unwrap();
        record.set_max_func(10).unwrap();
        record
            .functions
            .insert(0, FunctionConfig { icon: 12, timing_ms: 0 });
        db.upsert(&record, 0).unwrap();
        db.flush_now().unwrap();
        let reloaded = db.get(3).unwrap();
        assert_eq!(reloaded, record);
    }

    #[test]
    fn mm_format_rejects_high_max_func() {
        let mut record = LocoRecord::new(4, LocoFormat::Mm1Steps14).unwrap();
        assert!(record.set_max_func(5).is_err());
        assert!(record.set_max_func(1).is_ok());
    }

    #[test]
    fn name_longer_than_28_bytes_is_rejected() {
        let mut record = LocoRecord::new(5, LocoFormat::Dcc28).unwrap();
        let long_name = "x".repeat(29);
        assert!(record.set_name(&long_name).is_err());
    }

    #[test]
    fn address_out_of_range_is_rejected() {
        assert!(LocoRecord::new(0, LocoFormat::Dcc28).is_ok());
        assert!(LocoRecord::new(10240, LocoFormat::Dcc28).is_err());
    }
}
