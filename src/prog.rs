//! The programming-track controller: service-mode DCC CV access and MM
//! decoder addressing, entered by putting the sequencer into `DccProg` or
//! `TamsProg` (§4.6).
//!
//! Everything here is driven the same way the booster loop is: explicit
//! `feed_current`/`timeout` calls from a caller-owned tick counter, never a
//! blocking wait. A real embedder samples track current once per millisecond
//! while a programming packet's response window is open and feeds that
//! sample in; nothing in this module reads a clock directly.

use std::collections::VecDeque;

use crate::db::loco;
use crate::error::{Error, Result};
use crate::protocol::dcc::{self, CvOp};

/// Current surge required to count as a positive decoder acknowledge: "a
/// positive acknowledge is a current surge >= 60 mA for >= 5 ms inside the
/// response window" (§4.6, resolving the threshold the spec leaves open).
pub const ACK_CURRENT_THRESHOLD_MA: u32 = 60;
pub const ACK_MIN_DURATION_MS: u32 = 5;

/// How many times a service-mode write packet is repeated before the
/// controller reads it back (NMRA practice for reliable programming-track
/// reception; a single packet is easily missed on an unterminated siding).
pub const SERVICE_WRITE_REPEATS: u8 = 5;

/// Which CV-addressing scheme a service-mode session uses (§4.6:
/// "direct, paged, and physical register").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    Direct,
    Paged,
    Register,
}

impl ServiceMode {
    /// Only direct-mode addressing is implemented; paged and physical
    /// register modes are modeled as variants but rejected until a decoder
    /// is known to need them, per §9's framing ("implementers should pick
    /// one authoritative behaviour and document it").
    fn require_direct(self) -> Result<()> {
        match self {
            ServiceMode::Direct => Ok(()),
            ServiceMode::Paged | ServiceMode::Register => Err(Error::InvalidParam(format!(
                "service mode {self:?} is not implemented, only Direct"
            ))),
        }
    }
}

/// Tracks a stream of 1 ms current readings looking for the ACK pulse.
/// Latches once found: a decoder's acknowledge pulse can be longer than the
/// minimum, and later samples must not un-ack it.
#[derive(Debug, Clone, Copy)]
pub struct AckDetector {
    above_ms: u32,
    acked: bool,
}

impl Default for AckDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AckDetector {
    pub fn new() -> Self {
        Self { above_ms: 0, acked: false }
    }

    /// Feed one current sample; returns whether an ACK has now been seen.
    pub fn sample(&mut self, current_ma: u32) -> bool {
        if self.acked {
            return true;
        }
        if current_ma >= ACK_CURRENT_THRESHOLD_MA {
            self.above_ms += 1;
        } else {
            self.above_ms = 0;
        }
        if self.above_ms >= ACK_MIN_DURATION_MS {
            self.acked = true;
        }
        self.acked
    }

    pub fn acked(&self) -> bool {
        self.acked
    }
}

/// Result of a completed [`CvWriteOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The repeated write was acknowledged, then confirmed by a verify
    /// read-back (§4.6: "Writes verify by re-reading").
    Written,
    NoAck,
}

/// A service-mode CV write: repeat the write packet, then read it back with
/// a byte-verify packet and require an ACK on the verify before considering
/// the write confirmed.
pub struct CvWriteOp {
    pending: VecDeque<Vec<u8>>,
    verify_packet: Vec<u8>,
    verify_sent: bool,
    ack: AckDetector,
    outcome: Option<WriteOutcome>,
}

impl CvWriteOp {
    pub fn new(mode: ServiceMode, cv: u16, value: u8) -> Result<Self> {
        mode.require_direct()?;
        let write_packet = dcc::service_mode_byte_packet(cv, CvOp::WriteByte, value);
        let pending = std::iter::repeat(write_packet).take(SERVICE_WRITE_REPEATS as usize).collect();
        Ok(Self {
            pending,
            verify_packet: dcc::service_mode_byte_packet(cv, CvOp::VerifyByte, value),
            verify_sent: false,
            ack: AckDetector::new(),
            outcome: None,
        })
    }

    /// The next packet bytes to emit on the programming track, or `None`
    /// once every packet this op needs has been handed out.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        if let Some(p) = self.pending.pop_front() {
            return Some(p);
        }
        if !self.verify_sent {
            self.verify_sent = true;
            return Some(self.verify_packet.clone());
        }
        None
    }

    /// Feed one 1 ms current reading taken while the verify packet's
    /// response window is open.
    pub fn feed_current(&mut self, current_ma: u32) -> Option<WriteOutcome> {
        if !self.verify_sent || self.outcome.is_some() {
            return self.outcome;
        }
        if self.ack.sample(current_ma) {
            self.outcome = Some(WriteOutcome::Written);
        }
        self.outcome
    }

    /// The verify window elapsed with no ACK.
    pub fn timeout(&mut self) -> WriteOutcome {
        *self.outcome.get_or_insert(WriteOutcome::NoAck)
    }
}

/// Result of a completed [`CvReadOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Value(u8),
    NoAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    TestBit { bit_pos: u8, value: bool },
    FinalVerify,
}

/// A service-mode CV read via the NMRA bit-verify sequence: for each of the
/// 8 bits, ask "is bit N == 1?"; an ACK confirms it, a timeout means it's 0
/// and the controller re-asks with `value = false` to confirm that instead.
/// Once all 8 bits are known the assembled byte is confirmed with one final
/// byte-verify packet.
pub struct CvReadOp {
    cv: u16,
    phase: ReadPhase,
    accumulated: u8,
    ack: AckDetector,
    packet_in_flight: bool,
    outcome: Option<ReadOutcome>,
}

impl CvReadOp {
    pub fn new(mode: ServiceMode, cv: u16) -> Result<Self> {
        mode.require_direct()?;
        Ok(Self {
            cv,
            phase: ReadPhase::TestBit { bit_pos: 0, value: true },
            accumulated: 0,
            ack: AckDetector::new(),
            packet_in_flight: false,
            outcome: None,
        })
    }

    /// The next packet bytes to emit, or `None` if a packet is already
    /// awaiting its ACK/timeout resolution, or the op is finished.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        if self.outcome.is_some() || self.packet_in_flight {
            return None;
        }
        self.packet_in_flight = true;
        Some(match self.phase {
            ReadPhase::TestBit { bit_pos, value } => dcc::service_mode_bit_verify_packet(self.cv, bit_pos, value),
            ReadPhase::FinalVerify => dcc::service_mode_byte_packet(self.cv, CvOp::VerifyByte, self.accumulated),
        })
    }

    pub fn feed_current(&mut self, current_ma: u32) -> Option<ReadOutcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }
        if self.ack.sample(current_ma) {
            self.on_ack();
        }
        self.outcome
    }

    /// The current packet's response window elapsed with no ACK.
    pub fn timeout(&mut self) -> Option<ReadOutcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }
        match self.phase {
            ReadPhase::TestBit { bit_pos, value: true } => {
                self.phase = ReadPhase::TestBit { bit_pos, value: false };
                self.ack = AckDetector::new();
                self.packet_in_flight = false;
                None
            }
            ReadPhase::TestBit { .. } | ReadPhase::FinalVerify => {
                self.outcome = Some(ReadOutcome::NoAck);
                self.outcome
            }
        }
    }

    fn on_ack(&mut self) {
        match self.phase {
            ReadPhase::TestBit { bit_pos, value } => {
                if value {
                    self.accumulated |= 1 << bit_pos;
                }
                self.phase = if bit_pos == 7 {
                    ReadPhase::FinalVerify
                } else {
                    ReadPhase::TestBit { bit_pos: bit_pos + 1, value: true }
                };
                self.ack = AckDetector::new();
                self.packet_in_flight = false;
            }
            ReadPhase::FinalVerify => {
                self.outcome = Some(ReadOutcome::Value(self.accumulated));
            }
        }
    }
}

/// MM decoder addressing: older Motorola decoders learn a new address by
/// counting track power-interruption pulses while sitting on the
/// programming track, not a CV-style protocol (§4.6 "MM programming"). This
/// models that pulse-count handshake rather than pretending MM has CV
/// access.
pub struct MmAddressingOp {
    pulses_remaining: u16,
}

impl MmAddressingOp {
    pub fn new(new_address: u16) -> Result<Self> {
        loco::validate_address(new_address)?;
        Ok(Self { pulses_remaining: new_address })
    }

    pub fn pulses_remaining(&self) -> u16 {
        self.pulses_remaining
    }

    pub fn done(&self) -> bool {
        self.pulses_remaining == 0
    }

    /// Record that one power-interruption pulse was applied.
    pub fn apply_pulse(&mut self) {
        self.pulses_remaining = self.pulses_remaining.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paged_and_register_modes_are_rejected() {
        assert!(CvWriteOp::new(ServiceMode::Paged, 1, 0).is_err());
        assert!(CvReadOp::new(ServiceMode::Register, 1).is_err());
    }

    #[test]
    fn ack_detector_requires_sustained_current() {
        let mut ack = AckDetector::new();
        for _ in 0..4 {
            assert!(!ack.sample(100));
        }
        assert!(ack.sample(100));
        assert!(ack.acked());
        // Latches even if current later drops.
        assert!(ack.sample(0));
    }

    #[test]
    fn ack_detector_resets_on_a_dip_below_threshold() {
        let mut ack = AckDetector::new();
        for _ in 0..3 {
            ack.sample(100);
        }
        ack.sample(0); // dip resets the run
        for _ in 0..4 {
            assert!(!ack.sample(100));
        }
        assert!(ack.sample(100));
    }

    #[test]
    fn cv_write_sends_repeats_then_a_verify_and_acks() {
        let mut op = CvWriteOp::new(ServiceMode::Direct, 29, 0x06).unwrap();
        let mut emitted = 0;
        while let Some(_packet) = op.next_packet() {
            emitted += 1;
        }
        assert_eq!(emitted, SERVICE_WRITE_REPEATS as usize + 1);
        let mut outcome = None;
        for _ in 0..5 {
            outcome = op.feed_current(100);
            if outcome.is_some() {
                break;
            }
        }
        assert_eq!(outcome, Some(WriteOutcome::Written));
    }

    #[test]
    fn cv_write_times_out_to_no_ack() {
        let mut op = CvWriteOp::new(ServiceMode::Direct, 1, 1).unwrap();
        while op.next_packet().is_some() {}
        assert_eq!(op.feed_current(0), None);
        assert_eq!(op.timeout(), WriteOutcome::NoAck);
    }

    #[test]
    fn cv_read_reassembles_byte_from_bit_acks() {
        // Decoder holds CV value 0b0000_0101 (5): only bits 0 and 2 are 1.
        let target: u8 = 0b0000_0101;
        let mut op = CvReadOp::new(ServiceMode::Direct, 5).unwrap();
        let mut outcome = None;
        for _ in 0..64 {
            if outcome.is_some() {
                break;
            }
            let Some(packet) = op.next_packet() else {
                // packet already in flight; this test drives step by step so
                // this should not happen before a resolution call below
                unreachable!();
            };
            // Decode the packet from its own wire bytes rather than peeking
            // at internal state: CC (bits 3-2 of byte0) tells a bit-verify
            // (0b10) apart from the final byte-verify (0b01).
            let is_bit_verify = packet[0] & 0x0C == 0x08;
            let decoder_should_ack = if is_bit_verify {
                let bit_pos = packet[2] & 0x07;
                let tested_value = packet[2] & 0x08 != 0;
                tested_value == ((target >> bit_pos) & 1 != 0)
            } else {
                packet[2] == target
            };
            if decoder_should_ack {
                for _ in 0..ACK_MIN_DURATION_MS {
                    outcome = op.feed_current(100);
                }
            } else {
                outcome = op.timeout();
            }
        }
        assert_eq!(outcome, Some(ReadOutcome::Value(target)));
    }

    #[test]
    fn cv_read_with_no_responding_decoder_yields_no_ack() {
        let mut op = CvReadOp::new(ServiceMode::Direct, 5).unwrap();
        op.next_packet();
        assert_eq!(op.timeout(), Some(ReadOutcome::NoAck));
    }

    #[test]
    fn mm_addressing_counts_down_to_done() {
        let mut op = MmAddressingOp::new(3).unwrap();
        assert!(!op.done());
        for _ in 0..3 {
            op.apply_pulse();
        }
        assert!(op.done());
    }

    #[test]
    fn mm_addressing_rejects_invalid_address() {
        assert!(MmAddressingOp::new(10240).is_err());
    }
}
