//! Top-level wiring: constructs the sequencer, booster, event bus, and
//! persisted databases as explicit service handles a caller drives from its
//! own tasks (§9 design note: "constructed service handles passed by
//! explicit reference" rather than a global singleton).
//!
//! `Station` does not spawn any threads itself — per §5's concurrency model,
//! the embedder owns the tasks (signal generation, sniffer worker, event bus
//! dispatcher, persistence coalescer) and calls into `Station`'s methods
//! from whichever thread owns that priority level.

use crate::booster::{Booster, BoosterConfig};
use crate::bus::{Event, EventBus, EventKind};
use crate::config::ConfigBackend;
use crate::db::{LocoDb, TurnoutDb};
use crate::error::{Error, Result};
use crate::protocol::dcc::DccConfig;
use crate::protocol::m3::{self, M3Config, M3Frame};
use crate::protocol::mm::{self, MmConfig, MmForm};
use crate::protocol::WireProtocol;
use crate::queue::{DrainEvent, RequestQueue, RequestSender};
use crate::refresh::RefreshBuffer;
use crate::sequencer::{Mode, Sequencer, SlotDecision};
use crate::timer::{BitInterval, TimerSink};

/// Request-queue depth; same reference value the refresh buffer uses (§4.1
/// "the reference configuration uses 256").
pub const REQUEST_QUEUE_CAPACITY: usize = 256;

/// Everything a fresh `Station` needs beyond its two persisted backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationConfig {
    /// "Key held during boot" (§6 "CLI / boot"): wipe both persisted stores
    /// before loading rather than loading whatever they already contain.
    pub factory_reset: bool,
    pub refresh_capacity: usize,
    /// 0 disables idle-loco purging.
    pub locopurge_min: u32,
    pub booster: BoosterConfig,
    pub dcc: DccConfig,
    pub mm: MmConfig,
    pub m3: M3Config,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            factory_reset: false,
            refresh_capacity: RefreshBuffer::MIN_CAPACITY * 2,
            locopurge_min: 0,
            booster: BoosterConfig::default(),
            dcc: DccConfig::default(),
            mm: MmConfig::default(),
            m3: M3Config::default(),
        }
    }
}

/// The wired-together firmware core: sequencer, booster loop, event bus,
/// loco/turnout databases, refresh buffer and request queue (§2 system
/// overview, §4 component list).
pub struct Station<B: ConfigBackend> {
    pub sequencer: Sequencer,
    pub booster: Booster,
    pub bus: EventBus,
    pub loco_db: LocoDb<B>,
    pub turnout_db: TurnoutDb<B>,
    pub refresh: RefreshBuffer,
    queue: RequestQueue,
    dcc_cfg: DccConfig,
    mm_cfg: MmConfig,
    m3_cfg: M3Config,
}

impl<B: ConfigBackend> Station<B> {
    /// `loco_backend`/`turnout_backend` are the two persisted stores (§6
    /// "Persistent config"); they may be the same concrete type backed by
    /// different files/keys.
    pub fn new(config: StationConfig, mut loco_backend: B, mut turnout_backend: B) -> Result<Self> {
        config.dcc.validate()?;
        config.mm.validate()?;
        config.m3.validate()?;
        if config.factory_reset {
            loco_backend.delete()?;
            turnout_backend.delete()?;
        }
        let loco_db = LocoDb::load(loco_backend)?;
        let turnout_db = TurnoutDb::load(turnout_backend)?;
        let refresh = RefreshBuffer::new(config.refresh_capacity, config.locopurge_min)?;
        Ok(Self {
            sequencer: Sequencer::new(),
            booster: Booster::new(config.booster),
            bus: EventBus::new(),
            loco_db,
            turnout_db,
            refresh,
            queue: RequestQueue::new(REQUEST_QUEUE_CAPACITY),
            dcc_cfg: config.dcc,
            mm_cfg: config.mm,
            m3_cfg: config.m3,
        })
    }

    /// A cloneable handle any caller (panel, network boundary, CLI) submits
    /// mutating requests through (§4.1).
    pub fn request_sender(&self) -> RequestSender {
        self.queue.sender()
    }

    /// One iteration of the high-priority signal-generation task (§4.3,
    /// §5): drain the request queue, apply any pending mode transition,
    /// purge idle locos, then build and emit the next due slot, if any.
    pub fn run_once(&mut self, now_ms: u64, sink: &mut dyn TimerSink) -> Result<Option<SlotDecision>> {
        let events = self.sequencer.drain_requests(&self.queue, &mut self.refresh, now_ms);
        for event in events {
            let fired = match event {
                DrainEvent::LocoCreated(addr) => Some(Event::new(EventKind::NewLoco, addr as i64)),
                DrainEvent::LocoRemoved(addr) => Some(Event::new(EventKind::NewLoco, -(addr as i64))),
                DrainEvent::TurnoutChanged(addr) => Some(Event::new(EventKind::Turnout, addr as i64)),
                DrainEvent::ModeRequested(_) => None,
            };
            if let Some(event) = fired {
                let _ = self.bus.fire(event, now_ms);
            }
        }
        self.sequencer.apply_pending_mode();
        for addr in self.refresh.purge_idle(now_ms) {
            let _ = self.bus.fire(Event::new(EventKind::NewLoco, -(addr as i64)), now_ms);
        }

        let Some(decision) = self.sequencer.next_slot(&mut self.refresh, None, now_ms)? else {
            return Ok(None);
        };
        let bits = self.encode_decision(&decision)?;
        sink.emit_all(&bits)?;
        Ok(Some(decision))
    }

    /// Advance the booster loop by one 1 ms tick, forcing the sequencer
    /// into `Short` the moment a short is declared (§4.4, §7 "surfaced, not
    /// hidden").
    pub fn tick_booster(&mut self, actual_current_ma: u32, now_ms: u64) {
        let outcome = self.booster.tick(actual_current_ma);
        if outcome.short_declared {
            self.booster.force_off();
            self.sequencer.force_mode(Mode::Short);
            log::warn!("station: booster short declared, forcing SHORT mode");
            let _ = self.bus.fire(Event::new(EventKind::Current, actual_current_ma as i64), now_ms);
        }
    }

    /// Drive the event bus's timeout path and the persistence coalescer;
    /// called from the low-priority task (§5).
    pub fn low_priority_tick(&mut self, now_ms: u64) {
        self.bus.drive_timeouts(now_ms);
        self.loco_db.tick(now_ms);
        self.turnout_db.tick(now_ms);
    }

    /// Force an immediate flush of both databases, bypassing the
    /// coalescing window (used on `PowerFail`, which is terminal).
    pub fn flush_now(&mut self) -> Result<()> {
        self.loco_db.flush_now()?;
        self.turnout_db.flush_now()?;
        Ok(())
    }

    fn encode_decision(&self, decision: &SlotDecision) -> Result<Vec<BitInterval>> {
        match decision.packet.protocol {
            WireProtocol::Dcc => crate::protocol::dcc::encode_bits(&decision.packet.payload, &self.dcc_cfg, decision.railcom_cutout),
            WireProtocol::Mm => {
                let payload = mm::payload_from_bytes(&decision.packet.payload)
                    .ok_or_else(|| Error::InvalidParam("malformed MM packet payload".into()))?;
                // The generic rotation only ever schedules loco refresh
                // packets in MM, which use the slow pulse form (§4.2);
                // fast-form accessory commands are built and emitted
                // directly by the caller that issues the switch, bypassing
                // this path.
                mm::encode_packet(payload, MmForm::Slow, &self.mm_cfg)
            }
            WireProtocol::M3 => {
                if decision.packet.payload.len() != 3 {
                    return Err(Error::InvalidParam("malformed M3 packet payload".into()));
                }
                let frame = M3Frame::Command {
                    address: decision.packet.address,
                    payload: decision.packet.payload[2],
                };
                m3::encode_frame(frame)
            }
        }
    }
}
