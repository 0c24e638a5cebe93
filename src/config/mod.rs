//! Typed key=value persistence with coalesced deferred writes.
//!
//! Mirrors the teacher crate's habit of keeping the wire/structural format
//! (here, [`ini`]) in its own module and layering typed accessors on top.
//! The underlying file store (flash filesystem, on a real board) is out of
//! scope; callers supply a [`ConfigBackend`] that knows how to read and
//! write a blob of UTF-8 text.

pub mod ini;

use crate::error::{Error, Result};
use ini::Ini;

/// Coalescing delay: a write lands on the backend no sooner than this many
/// ticks after the last change (§5, "Persistence coalescer: 3-second delay
/// after the last change").
pub const COALESCE_DELAY_MS: u64 = 3_000;

/// Abstraction over the durable store. A real embedder backs this with the
/// flash filesystem; tests back it with an in-memory buffer.
pub trait ConfigBackend: Send {
    fn read(&mut self) -> Result<String>;
    fn write(&mut self, data: &str) -> Result<()>;
    fn delete(&mut self) -> Result<()>;
}

/// An in-memory backend, useful for tests and as the reference
/// implementation of the trait.
#[derive(Default)]
pub struct MemoryBackend {
    pub data: Option<String>,
}

impl ConfigBackend for MemoryBackend {
    fn read(&mut self) -> Result<String> {
        Ok(self.data.clone().unwrap_or_default())
    }

    fn write(&mut self, data: &str) -> Result<()> {
        self.data = Some(data.to_string());
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}

/// Typed, coalesced-write key=value store.
///
/// `tick_ms` is a caller-supplied monotonic millisecond counter rather than
/// wall-clock time, so the coalescing window is deterministic to test (see
/// the booster loop, which is driven the same way).
pub struct ConfigStore<B: ConfigBackend> {
    backend: B,
    doc: Ini,
    dirty_since_ms: Option<u64>,
}

impl<B: ConfigBackend> ConfigStore<B> {
    pub fn load(mut backend: B) -> Result<Self> {
        let text = backend.read()?;
        let doc = Ini::parse(&text);
        Ok(Self {
            backend,
            doc,
            dirty_since_ms: None,
        })
    }

    /// Wipe the persisted store entirely (§6, "factory defaults").
    pub fn factory_reset(&mut self) -> Result<()> {
        self.backend.delete()?;
        self.doc = Ini::new();
        self.dirty_since_ms = None;
        Ok(())
    }

    pub fn doc(&self) -> &Ini {
        &self.doc
    }

    /// Mutate a section and mark the store dirty as of `now_ms`. The
    /// actual flush happens lazily via [`Self::tick`].
    pub fn with_section_mut<R>(
        &mut self,
        name: &str,
        now_ms: u64,
        f: impl FnOnce(&mut ini::Section) -> R,
    ) -> R {
        let r = f(self.doc.section_mut(name));
        self.dirty_since_ms.get_or_insert(now_ms);
        r
    }

    /// Drop a whole section (a DB record being purged or deleted), marking
    /// the store dirty the same way [`Self::with_section_mut`] does.
    pub fn remove_section(&mut self, name: &str, now_ms: u64) {
        self.doc.remove_section(name);
        self.dirty_since_ms.get_or_insert(now_ms);
    }

    /// Called periodically (e.g. from the low-priority persistence task).
    /// Flushes to the backend once [`COALESCE_DELAY_MS`] has elapsed since
    /// the last change, and only then. Persistence failures are logged and
    /// retried on the next call, per §7 ("they do not abort the caller").
    pub fn tick(&mut self, now_ms: u64) {
        let Some(since) = self.dirty_since_ms else {
            return;
        };
        if now_ms.saturating_sub(since) < COALESCE_DELAY_MS {
            return;
        }
        match self.backend.write(&self.doc.render()) {
            Ok(()) => self.dirty_since_ms = None,
            Err(e) => {
                log::warn!("config: deferred flush failed, will retry: {e}");
            }
        }
    }

    /// Force an immediate flush, bypassing the coalescing window (used on
    /// `PowerFail`, which is terminal and must not lose pending writes).
    pub fn flush_now(&mut self) -> Result<()> {
        self.backend.write(&self.doc.render())?;
        self.dirty_since_ms = None;
        Ok(())
    }
}

/// Clamp `value` into `min..=max`, logging when a clamp actually changed
/// the value (§8 boundary behaviours: `pause=999` clamped to `1000`, etc).
pub fn clamp_logged(label: &str, value: u32, min: u32, max: u32) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("config: {label}={value} out of range {min}..={max}, clamped to {clamped}");
    }
    clamped
}

pub fn require_range_u32(label: &str, value: u32, min: u32, max: u32) -> Result<u32> {
    if value < min || value > max {
        return Err(Error::InvalidParam(format!(
            "{label}={value} out of range {min}..={max}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_writes_within_window() {
        let mut store = ConfigStore::load(MemoryBackend::default()).unwrap();
        store.with_section_mut("system", 0, |s| s.set("name", "layout1"));
        store.tick(1_000);
        assert!(store.backend.data.is_none(), "should not flush early");
        store.tick(3_000);
        assert!(store.backend.data.is_some(), "should flush once delay elapses");
    }

    #[test]
    fn factory_reset_clears_backend_and_doc() {
        let mut store = ConfigStore::load(MemoryBackend::default()).unwrap();
        store.with_section_mut("system", 0, |s| s.set("name", "layout1"));
        store.flush_now().unwrap();
        store.factory_reset().unwrap();
        assert!(store.backend.data.is_none());
        assert!(store.doc().section("system").is_none());
    }

    #[test]
    fn range_clamp_logs_only_when_changed() {
        assert_eq!(clamp_logged("pause", 999, 1000, 5000), 1000);
        assert_eq!(clamp_logged("pause", 6000, 1000, 5000), 5000);
        assert_eq!(clamp_logged("pause", 1500, 1000, 5000), 1500);
    }
}
