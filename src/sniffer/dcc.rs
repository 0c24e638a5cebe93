//! DCC edge decoder (§4.5).
//!
//! Classifies each inter-edge interval as short (`< 800` in 100 ns units,
//! i.e. `< 80 µs`) or long, pairs them into bits (a bit is two equal-class
//! half-periods), and assembles bytes MSB-first behind a preamble of at
//! least ten consecutive one-bits. A phase mismatch between a bit's two
//! halves aborts the in-progress packet and resynchronizes rather than
//! erroring (§7).

use crate::timer::Edge;

/// Threshold between a "short" (one-bit) and "long" (zero-bit) half-period,
/// in 100 ns ticks (§4.5: "threshold 800 = 80 µs").
pub const SHORT_LONG_THRESHOLD_100NS: u32 = 800;

/// Minimum consecutive one-bits this sniffer requires before it will
/// accept a start bit (the real preamble is 9..30 bits; this is a
/// deliberately relaxed floor so a truncated capture still syncs).
pub const MIN_PREAMBLE_BITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HalfClass {
    Short,
    Long,
}

fn classify(delta_100ns: u32) -> HalfClass {
    if delta_100ns < SHORT_LONG_THRESHOLD_100NS {
        HalfClass::Short
    } else {
        HalfClass::Long
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sync,
    RxByte,
    /// Just finished a byte; the next single bit says whether another byte
    /// follows (`0`) or this is the stop bit (`1`).
    AwaitingByteOrStop,
}

/// One fully decoded, checksum-valid DCC packet's bytes (§3 "Packet").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccFrame {
    pub bytes: Vec<u8>,
}

/// Outcome of feeding one more edge to [`DccSniffer::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DccSniffResult {
    Pending,
    Packet(DccFrame),
    ChecksumInvalid,
    Resync,
}

/// Stateful per-edge DCC decoder (§4.5).
pub struct DccSniffer {
    last_edge: Option<Edge>,
    pending_half: Option<HalfClass>,
    state: State,
    ones_run: u32,
    current_byte: u8,
    bits_in_byte: u8,
    bytes: Vec<u8>,
}

impl Default for DccSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DccSniffer {
    pub fn new() -> Self {
        Self {
            last_edge: None,
            pending_half: None,
            state: State::Sync,
            ones_run: 0,
            current_byte: 0,
            bits_in_byte: 0,
            bytes: Vec::new(),
        }
    }

    fn reset_to_sync(&mut self) {
        self.state = State::Sync;
        self.ones_run = 0;
        self.current_byte = 0;
        self.bits_in_byte = 0;
        self.bytes.clear();
        self.pending_half = None;
    }

    /// Feed one captured edge. Returns `Pending` until a full packet (or a
    /// resync/checksum failure) resolves.
    ///
    /// A bit is two equal-duration half-periods: a high hold then a low
    /// hold. `edge.rising` tells us which phase the interval *ending* at
    /// this edge was (a rising edge ends a low phase, a falling edge ends
    /// a high phase), so pairing always starts at a high-phase half
    /// regardless of where in the bit stream this sniffer started
    /// listening — no assumption about edge parity is needed.
    pub fn consume(&mut self, edge: Edge) -> DccSniffResult {
        let Some(last) = self.last_edge else {
            self.last_edge = Some(edge);
            return DccSniffResult::Pending;
        };
        self.last_edge = Some(edge);
        let delta = last.delta_to(edge).unsigned_abs() as u32;
        let half = classify(delta);
        let ends_high_phase = !edge.rising;

        match self.pending_half {
            None => {
                if ends_high_phase {
                    self.pending_half = Some(half);
                }
                // else: stray low-phase tail from before we started
                // listening; discard and wait for a high-phase half.
                DccSniffResult::Pending
            }
            Some(first) => {
                if ends_high_phase {
                    // Two high-phase halves in a row: lost alignment.
                    // Restart the pair on this one.
                    self.pending_half = Some(half);
                    return DccSniffResult::Pending;
                }
                self.pending_half = None;
                if first != half {
                    self.reset_to_sync();
                    return DccSniffResult::Resync;
                }
                let bit_one = first == HalfClass::Short;
                self.on_bit(bit_one)
            }
        }
    }

    fn on_bit(&mut self, one: bool) -> DccSniffResult {
        match self.state {
            State::Sync => {
                if one {
                    self.ones_run += 1;
                } else if self.ones_run >= MIN_PREAMBLE_BITS {
                    self.state = State::RxByte;
                } else {
                    self.ones_run = 0;
                }
                DccSniffResult::Pending
            }
            State::RxByte => {
                self.current_byte = (self.current_byte << 1) | one as u8;
                self.bits_in_byte += 1;
                if self.bits_in_byte < 8 {
                    return DccSniffResult::Pending;
                }
                self.bytes.push(self.current_byte);
                self.current_byte = 0;
                self.bits_in_byte = 0;
                self.state = State::AwaitingByteOrStop;
                DccSniffResult::Pending
            }
            State::AwaitingByteOrStop => {
                if !one {
                    self.state = State::RxByte;
                    return DccSniffResult::Pending;
                }
                let xor = self.bytes.iter().fold(0u8, |acc, b| acc ^ b);
                let bytes = std::mem::take(&mut self.bytes);
                self.reset_to_sync();
                if xor == 0 && !bytes.is_empty() {
                    DccSniffResult::Packet(DccFrame { bytes })
                } else {
                    DccSniffResult::ChecksumInvalid
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dcc::{build_speed_packet, encode_bits, DccConfig, SpeedCommand, SpeedSteps};

    fn edges_from_bits(bytes: &[u8], cfg: &DccConfig) -> Vec<Edge> {
        // Each bit is High(half) then Low(half), so the first boundary is
        // a falling edge (rising = false), then alternates.
        let intervals = encode_bits(bytes, cfg, false).unwrap();
        let mut ts = 0u32;
        let mut edges = Vec::new();
        let mut rising = false;
        for iv in intervals {
            ts += iv.duration_us as u32 * 10; // µs -> 100 ns ticks
            edges.push(Edge { timestamp_100ns: ts, rising });
            rising = !rising;
        }
        edges
    }

    #[test]
    fn decodes_a_valid_speed_packet_round_trip() {
        let bytes = build_speed_packet(3, SpeedSteps::Steps28, SpeedCommand { forward: true, step: 10 });
        assert_eq!(bytes, vec![0x03, 0x6A, 0x69]);
        // The sniffer's short/long threshold (80 µs, §4.5) sits inside the
        // nominal NMRA one/zero timing, not this crate's own configurable
        // `DccConfig` bounds (which allow a one-bit half period up to 150
        // µs, above the threshold). Use nominal values here so the two
        // sides of the round trip agree, same as a real decoder feeding
        // our sniffer would.
        let cfg = DccConfig {
            one_half_period_us: 58,
            zero_half_period_us: 100,
            ..DccConfig::default()
        };
        let edges = edges_from_bits(&bytes, &cfg);

        let mut sniffer = DccSniffer::new();
        let mut result = DccSniffResult::Pending;
        for edge in edges {
            result = sniffer.consume(edge);
            if matches!(result, DccSniffResult::Packet(_)) {
                break;
            }
        }
        match result {
            DccSniffResult::Packet(frame) => assert_eq!(frame.bytes, bytes),
            other => panic!("expected a decoded packet, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_half_periods_cause_resync() {
        let mut sniffer = DccSniffer::new();
        // First edge only seeds `last_edge`; no delta yet.
        sniffer.consume(Edge { timestamp_100ns: 0, rising: true });
        // Falling edge ends a high-phase half below the threshold (short).
        sniffer.consume(Edge { timestamp_100ns: 500, rising: false });
        // Rising edge ends the low-phase half above the threshold (long):
        // the two halves of this bit disagree.
        let result = sniffer.consume(Edge { timestamp_100ns: 500 + 2000, rising: true });
        assert_eq!(result, DccSniffResult::Resync);
    }
}
