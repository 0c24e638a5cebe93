//! The request queue: serialises mutating requests from every caller
//! (operator panels, external buses, the JSON/HTTP front-end) into the
//! refresh buffer and DBs (§4.1).
//!
//! Implemented as a bounded `crossbeam-channel` MPSC: every request,
//! regardless of origin, funnels through the same channel, which preserves
//! submission order by construction — "same address" ordering (§4.1, §5)
//! falls out of total ordering of the queue, so no per-address sub-queues
//! are needed. Validation happens synchronously in [`RequestSender`], at
//! the queue boundary, per §7 ("a malformed outgoing request is rejected
//! at the queue boundary with `InvalidParam`"); only already-valid
//! requests are ever enqueued.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::db::{loco, turnout, Direction};
use crate::error::{Error, Result};
use crate::refresh::RefreshBuffer;
use crate::sequencer::Mode;

/// How a timed/untimed switch command should be applied (§6 "mode command
/// boundary": `switchTurnout(addr, dir, on|off|timed)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchActivation {
    On,
    Off,
    /// Switch on, then automatically switch off after this many ms.
    Timed(u32),
}

/// A programming-on-main CV read or write request (§4.6). `value = None`
/// is a read, `Some(v)` is a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PomRequest {
    pub address: u16,
    pub cv: u16,
    pub value: Option<u8>,
}

/// One validated, queued mutation (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    SetSpeed { address: u16, speed_byte: u8 },
    SetFuncMasked { address: u16, group: u8, bits: u32, mask: u32 },
    SetFunc { address: u16, idx: u8, on: bool },
    EmergencyStop { address: u16 },
    Switch { address: u16, direction: Direction, activation: SwitchActivation },
    Pom(PomRequest),
    SetMode(Mode),
}

/// A cloneable handle callers use to submit requests. Every clone shares
/// the same bounded channel, so ordering across callers is preserved.
#[derive(Clone)]
pub struct RequestSender {
    tx: Sender<Request>,
}

impl RequestSender {
    fn push(&self, request: Request) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => Error::BusyRetry,
            TrySendError::Disconnected(_) => Error::InvalidParam("request queue is closed".into()),
        })
    }

    pub fn set_speed(&self, address: u16, speed_byte: u8) -> Result<()> {
        loco::validate_address(address)?;
        self.push(Request::SetSpeed { address, speed_byte })
    }

    pub fn set_func_masked(&self, address: u16, group: u8, bits: u32, mask: u32) -> Result<()> {
        loco::validate_address(address)?;
        if group > 3 {
            return Err(Error::InvalidParam(format!("function group {group} out of range 0..=3")));
        }
        self.push(Request::SetFuncMasked { address, group, bits, mask })
    }

    pub fn set_func(&self, address: u16, idx: u8, on: bool) -> Result<()> {
        loco::validate_address(address)?;
        if idx > 127 {
            return Err(Error::InvalidParam(format!("function index {idx} out of range 0..=127")));
        }
        self.push(Request::SetFunc { address, idx, on })
    }

    pub fn emergency_stop(&self, address: u16) -> Result<()> {
        loco::validate_address(address)?;
        self.push(Request::EmergencyStop { address })
    }

    pub fn switch(&self, address: u16, direction: Direction, activation: SwitchActivation) -> Result<()> {
        turnout::validate_address(address)?;
        self.push(Request::Switch { address, direction, activation })
    }

    pub fn pom(&self, request: PomRequest) -> Result<()> {
        loco::validate_address(request.address)?;
        self.push(Request::Pom(request))
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.push(Request::SetMode(mode))
    }
}

/// Fired for every refresh-buffer create/remove (§4.1: "A removal fires
/// `NEWLOCO(-addr)`; a creation fires `NEWLOCO(+addr)`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEvent {
    LocoCreated(u16),
    LocoRemoved(u16),
    ModeRequested(Mode),
    TurnoutChanged(u16),
}

/// Owns the receiving end; drained by the sequencer at packet boundaries,
/// never mid-packet (§4.1 concurrency contract).
pub struct RequestQueue {
    tx: Sender<Request>,
    rx: Receiver<Request>,
}

impl RequestQueue {
    /// `capacity` bounds the channel; event-bus-style backpressure (an
    /// overflowing queue yields `BusyRetry` to the submitter) falls out of
    /// `crossbeam_channel::bounded`'s own full-channel behaviour.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub fn sender(&self) -> RequestSender {
        RequestSender { tx: self.tx.clone() }
    }

    /// Drain every currently queued request into the refresh buffer,
    /// returning the bus-worthy events it produced in submission order.
    pub fn drain(&self, buffer: &mut RefreshBuffer, now_ms: u64) -> Vec<DrainEvent> {
        let mut events = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            match request {
                Request::SetSpeed { address, speed_byte } => {
                    let created = buffer.call(address, false, now_ms).unwrap_or(None).is_none();
                    let _ = buffer.set_speed(address, speed_byte, now_ms);
                    if created {
                        events.push(DrainEvent::LocoCreated(address));
                    }
                }
                Request::SetFuncMasked { address, group, bits, mask } => {
                    let _ = buffer.set_func_masked(address, group, bits, mask, now_ms);
                }
                Request::SetFunc { address, idx, on } => {
                    let _ = buffer.set_func(address, idx, on, now_ms);
                }
                Request::EmergencyStop { address } => {
                    let _ = buffer.emergency_stop(address, now_ms);
                }
                Request::Switch { address, .. } => {
                    events.push(DrainEvent::TurnoutChanged(address));
                }
                Request::Pom(_) => {}
                Request::SetMode(mode) => events.push(DrainEvent::ModeRequested(mode)),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_drain_preserves_order_for_same_address() {
        let queue = RequestQueue::new(16);
        let sender = queue.sender();
        sender.set_speed(3, 0x8A).unwrap();
        sender.set_func(3, 0, true).unwrap();
        sender.set_speed(3, 0x00).unwrap();

        let mut buffer = RefreshBuffer::new(128, 0).unwrap();
        queue.drain(&mut buffer, 0);
        // last write wins because drain applies in submission order
        assert_eq!(buffer.get(3).unwrap().speed, 0x00);
        assert!(buffer.get(3).unwrap().function(0));
    }

    #[test]
    fn invalid_address_rejected_at_submission_not_drain() {
        let queue = RequestQueue::new(16);
        let sender = queue.sender();
        assert!(sender.set_speed(10240, 0).is_err());
    }

    #[test]
    fn full_queue_yields_busy_retry() {
        let queue = RequestQueue::new(1);
        let sender = queue.sender();
        sender.set_speed(3, 0).unwrap();
        assert_eq!(sender.set_speed(3, 1), Err(Error::BusyRetry));
    }

    #[test]
    fn mode_requests_drain_as_events() {
        let queue = RequestQueue::new(16);
        let sender = queue.sender();
        sender.set_mode(Mode::Stop).unwrap();
        let mut buffer = RefreshBuffer::new(128, 0).unwrap();
        let events = queue.drain(&mut buffer, 0);
        assert_eq!(events, vec![DrainEvent::ModeRequested(Mode::Stop)]);
    }
}
