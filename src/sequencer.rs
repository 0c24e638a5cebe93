//! The track sequencer: the mode-aware state machine that selects slots,
//! inserts RailCom cutouts, and enforces STOP/GO/HALT/SHORT/PROG/... (§4.3).
//!
//! Mode transitions take effect only between packets (§9 design note:
//! "Cooperative mode transitions between packets replace the ad-hoc flag
//! polling by a single `pending_mode: Option<Mode>` consulted at packet
//! boundaries"), which this struct implements literally.

use crate::error::{Error, Result};
use crate::protocol::{Packet, WireProtocol};
use crate::queue::{DrainEvent, RequestQueue, SwitchActivation};
use crate::refresh::RefreshBuffer;

/// System mode (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Stop,
    Short,
    Halt,
    Go,
    SigOn,
    DccProg,
    TamsProg,
    TestDrive,
    OverTemp,
    PowerFail,
}

impl Mode {
    /// Whether the rotation loop drains the request queue and emits
    /// packets in this mode (§4.3 table, SPEC_FULL.md §4.3 supplement:
    /// "no packets are drained from the request queue while in these
    /// states").
    pub fn drains_queue(self) -> bool {
        matches!(self, Mode::Go | Mode::Halt | Mode::TestDrive)
    }

    pub fn booster_should_be_on(self) -> bool {
        matches!(self, Mode::Go | Mode::Halt | Mode::TestDrive | Mode::DccProg | Mode::TamsProg)
    }

    /// Valid transitions per the §4.3 state table. `PowerFail` is terminal.
    pub fn can_transition_to(self, next: Mode) -> bool {
        use Mode::*;
        match self {
            Stop => matches!(next, Go | Stop | SigOn | DccProg | TamsProg),
            Short => matches!(next, Stop),
            Halt => matches!(next, Go | Stop),
            Go => matches!(next, Stop | Halt | Short | DccProg | TamsProg | TestDrive | OverTemp),
            SigOn => matches!(next, Go | Stop),
            DccProg => matches!(next, Stop),
            TamsProg => matches!(next, Stop),
            TestDrive => matches!(next, Stop | Go),
            OverTemp => matches!(next, Stop),
            PowerFail => false,
        }
    }
}

/// One packet-emission decision: which bytes to send and whether a RailCom
/// cutout must follow (§4.3 item 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecision {
    pub packet: Packet,
    pub railcom_cutout: bool,
}

/// Feature flags gating RailCom/DCC-A (§4.3 item 4: "DCC-A is enabled only
/// after RailCom is on").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalFlags {
    pub railcom: bool,
    pub dcc_a: bool,
}

impl SignalFlags {
    pub fn railcom_cutout_enabled(self) -> bool {
        self.railcom && (!self.dcc_a || self.railcom)
    }
}

/// The cooperative state machine driving packet selection (§4.3).
pub struct Sequencer {
    mode: Mode,
    pending_mode: Option<Mode>,
    pub flags: SignalFlags,
    rc_tailbits: u8,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            mode: Mode::Stop,
            pending_mode: None,
            flags: SignalFlags::default(),
            rc_tailbits: 4,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Request a mode transition. Applied at the next packet boundary
    /// (§4.3), never mid-packet. Silently ignores a transition the state
    /// table disallows rather than erroring: external callers get no
    /// synchronous feedback from the sequencer (the request queue
    /// already validated the request's shape).
    pub fn request_mode(&mut self, mode: Mode) {
        if self.mode.can_transition_to(mode) || mode == Mode::Stop {
            self.pending_mode = Some(mode);
        } else {
            log::warn!("sequencer: ignoring disallowed transition {:?} -> {:?}", self.mode, mode);
        }
    }

    /// Force a transition regardless of the state table (booster short,
    /// over-temp, power-fail: §7 "they are surfaced, not hidden").
    pub fn force_mode(&mut self, mode: Mode) {
        self.pending_mode = Some(mode);
    }

    /// Consult and apply any pending transition. Must only be called
    /// between packets (§4.3, §9).
    pub fn apply_pending_mode(&mut self) -> Option<Mode> {
        if let Some(next) = self.pending_mode.take() {
            if next != self.mode {
                log::info!("sequencer: mode {:?} -> {:?}", self.mode, next);
            }
            self.mode = next;
            Some(next)
        } else {
            None
        }
    }

    /// Drain the request queue into the refresh buffer (§4.3 rotation
    /// step 1), applying any `SetMode` request to `pending_mode` rather
    /// than directly, so it still only takes effect at a packet boundary.
    pub fn drain_requests(&mut self, queue: &RequestQueue, buffer: &mut RefreshBuffer, now_ms: u64) -> Vec<DrainEvent> {
        let events = queue.drain(buffer, now_ms);
        for event in &events {
            if let DrainEvent::ModeRequested(mode) = event {
                self.request_mode(*mode);
            }
        }
        events
    }

    /// Pick the next due candidate and build its [`SlotDecision`], or
    /// `None` if nothing is due (silent modes, or an empty buffer).
    ///
    /// Priority order (§4.3 item 2): pending POM/XPOM/service reply
    /// window > accessory commands with pending repetitions > loco with
    /// oldest last-transmit timestamp. This crate models the first two as
    /// inputs the caller (station wiring) already resolved into a
    /// `Packet` before calling [`Self::next_slot`] with an explicit
    /// override, since they are transient and don't live in the refresh
    /// buffer; absent an override, the loco rotation is consulted.
    ///
    /// Takes `buffer` mutably: once an entry is selected, its
    /// last-transmit timestamp is bumped to `now_ms` so the *next* call
    /// picks a different loco instead of re-selecting the same
    /// lowest-address entry forever (§4.3 rotation).
    pub fn next_slot(&self, buffer: &mut RefreshBuffer, priority_override: Option<Packet>, now_ms: u64) -> Result<Option<SlotDecision>> {
        if !self.mode.drains_queue() {
            return Ok(None);
        }
        if let Some(packet) = priority_override {
            let cutout = self.wants_cutout(&packet);
            return Ok(Some(SlotDecision { packet, railcom_cutout: cutout }));
        }
        let Some(entry) = buffer.oldest_due() else {
            return Ok(None);
        };
        let address = entry.address;
        let speed_byte = if self.mode == Mode::Halt || entry.estop {
            0x00
        } else {
            entry.speed
        };
        let payload = crate::protocol::dcc::build_speed_packet(
            address,
            crate::protocol::dcc::SpeedSteps::Steps28,
            crate::protocol::SpeedCommand::from_byte(speed_byte),
        );
        buffer.mark_transmitted(address, now_ms);
        let packet = Packet::new(WireProtocol::Dcc, address, payload, 3);
        let cutout = self.wants_cutout(&packet);
        Ok(Some(SlotDecision { packet, railcom_cutout: cutout }))
    }

    fn wants_cutout(&self, packet: &Packet) -> bool {
        packet.protocol == WireProtocol::Dcc && self.flags.railcom_cutout_enabled()
    }

    pub fn rc_tailbits(&self) -> u8 {
        self.rc_tailbits
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a turnout switch request into the packet pair described in §8
/// scenario 2: an "on" packet, followed (for `Timed`) by an "off" packet
/// once the deadline elapses. Kept free of any DB/track state so it is
/// trivially unit-testable.
pub fn switch_packets(address: u16, direction: crate::db::Direction, activation: SwitchActivation) -> Result<Vec<Packet>> {
    use crate::db::Direction;
    let thrown = matches!(direction, Direction::Thrown);
    let on = crate::protocol::dcc::build_accessory_packet(address, match direction {
        Direction::Straight => crate::protocol::dcc::AccessoryDirection::Straight,
        Direction::Thrown => crate::protocol::dcc::AccessoryDirection::Thrown,
    }, true);
    let mut packets = vec![Packet::new(WireProtocol::Dcc, address, on, 1)];
    match activation {
        SwitchActivation::On => {}
        SwitchActivation::Off | SwitchActivation::Timed(_) => {
            let off = crate::protocol::dcc::build_accessory_packet(address, match direction {
                Direction::Straight => crate::protocol::dcc::AccessoryDirection::Straight,
                Direction::Thrown => crate::protocol::dcc::AccessoryDirection::Thrown,
            }, false);
            packets.push(Packet::new(WireProtocol::Dcc, address, off, 1));
        }
    }
    let _ = thrown;
    Ok(packets)
}
