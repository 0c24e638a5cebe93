//! Motorola/MM packet framing and bit timing (§4.2).
//!
//! A full logical MM packet is the same 18-bit half transmitted twice, with
//! an inter-half pause between them; decoders (and this crate's sniffer)
//! reject packets whose two halves differ. The 18 bits are nine trits
//! (three-state symbols); this module keeps trits as a first-class `Trit`
//! type rather than packing them into raw bits, so the encode and decode
//! paths stay symmetric (see SPEC_FULL.md §4.2).
//!
//! Trit layout (resolves the spec's own "A..H" vs "nine trits" mismatch,
//! see DESIGN.md): four address trits (8 address bits via the reversal
//! table), one function trit (2 function bits), four data trits (4 data
//! bits, one bit each). 4 + 1 + 4 = 9.

use crate::error::{Error, Result};
use crate::timer::{BitInterval, Level};

use super::{Packet, WireProtocol};

/// Inter-half pause and output-form selection (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmConfig {
    pub pause_us: u16,
    pub repeat: u8,
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            pause_us: 1500,
            repeat: 1,
        }
    }
}

impl MmConfig {
    pub const MIN_PAUSE_US: u16 = 1000;
    pub const MAX_PAUSE_US: u16 = 5000;

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_PAUSE_US..=Self::MAX_PAUSE_US).contains(&self.pause_us) {
            return Err(Error::InvalidParam(format!(
                "mm.pause {} out of range {}..={}",
                self.pause_us,
                Self::MIN_PAUSE_US,
                Self::MAX_PAUSE_US
            )));
        }
        Ok(())
    }

    /// Clamp a requested pause into the valid range rather than rejecting
    /// it outright (§8 boundary behaviour: `pause=999` clamps to `1000`).
    pub fn clamp_pause(pause_us: u32) -> u16 {
        pause_us.clamp(Self::MIN_PAUSE_US as u32, Self::MAX_PAUSE_US as u32) as u16
    }
}

/// Which pulse-width family a packet uses: fast carries accessory/function
/// decoder payloads, slow carries loco payloads (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmForm {
    Fast,
    Slow,
}

impl MmForm {
    /// `(short_us, long_us)` pulse halves for this form, matching the four
    /// timing buckets the sniffer classifies edges into (§4.5).
    pub fn timing(self) -> (u16, u16) {
        match self {
            MmForm::Fast => (13, 91),
            MmForm::Slow => (26, 182),
        }
    }
}

/// A ternary symbol. Real Motorola decoders tolerate an `Open` (neither
/// fully high nor low) reading for backward compatibility with rotary
/// keyboard controllers; this crate only ever emits `Zero`/`One` for data
/// trits, but keeps `Open` representable so address/function trits built
/// from a mixed bit pair round-trip through the sniffer unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trit {
    Zero,
    One,
    Open,
}

impl Trit {
    fn from_bit_pair(hi: bool, lo: bool) -> Self {
        match (hi, lo) {
            (false, false) => Trit::Zero,
            (true, true) => Trit::One,
            _ => Trit::Open,
        }
    }

    fn to_bit_pair(self) -> (bool, bool) {
        match self {
            Trit::Zero => (false, false),
            Trit::One => (true, true),
            Trit::Open => (false, true),
        }
    }
}

/// Physical trit-slot ordering for the 8 address bits. Real hardware wires
/// the rotary-switch positions in reverse nibble order; this table
/// reproduces that permutation so our own encode/decode stay paired (no
/// external decoder needs to agree with the exact order, only our sniffer).
const ADDR_TRIT_ORDER: [usize; 4] = [3, 2, 1, 0];

fn address_trits(address: u8) -> [Trit; 4] {
    let mut trits = [Trit::Zero; 4];
    for (slot, &group) in ADDR_TRIT_ORDER.iter().enumerate() {
        let hi = (address >> (group * 2 + 1)) & 1 != 0;
        let lo = (address >> (group * 2)) & 1 != 0;
        trits[slot] = Trit::from_bit_pair(hi, lo);
    }
    trits
}

fn trits_to_address(trits: &[Trit; 4]) -> u8 {
    let mut address = 0u8;
    for (slot, &group) in ADDR_TRIT_ORDER.iter().enumerate() {
        let (hi, lo) = trits[slot].to_bit_pair();
        address |= (hi as u8) << (group * 2 + 1);
        address |= (lo as u8) << (group * 2);
    }
    address
}

fn function_trit(bits: u8) -> Trit {
    Trit::from_bit_pair(bits & 0x2 != 0, bits & 0x1 != 0)
}

fn trit_to_function(trit: Trit) -> u8 {
    let (hi, lo) = trit.to_bit_pair();
    (hi as u8) << 1 | lo as u8
}

fn data_trits(data: u8) -> [Trit; 4] {
    let mut trits = [Trit::Zero; 4];
    for i in 0..4 {
        trits[i] = if (data >> (3 - i)) & 1 != 0 {
            Trit::One
        } else {
            Trit::Zero
        };
    }
    trits
}

fn trits_to_data(trits: &[Trit; 4]) -> u8 {
    let mut data = 0u8;
    for (i, t) in trits.iter().enumerate() {
        let bit = matches!(t, Trit::One) as u8;
        data |= bit << (3 - i);
    }
    data
}

/// A decoded/to-be-encoded MM payload: 8-bit address, 2-bit function
/// selector, 4-bit data (speed step or accessory sub-state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmPayload {
    pub address: u8,
    pub function_bits: u8,
    pub data: u8,
}

/// The nine trits (A..D address, E function, F..I data) for one half-packet.
pub fn build_trits(payload: MmPayload) -> [Trit; 9] {
    let addr = address_trits(payload.address);
    let func = function_trit(payload.function_bits);
    let data = data_trits(payload.data);
    [
        addr[0], addr[1], addr[2], addr[3], func, data[0], data[1], data[2], data[3],
    ]
}

pub fn decode_trits(trits: &[Trit; 9]) -> MmPayload {
    let addr = [trits[0], trits[1], trits[2], trits[3]];
    let data = [trits[5], trits[6], trits[7], trits[8]];
    MmPayload {
        address: trits_to_address(&addr),
        function_bits: trit_to_function(trits[4]),
        data: trits_to_data(&data),
    }
}

/// Expand nine trits into the 18 bits that make up one half-packet.
fn trits_to_bits(trits: &[Trit; 9]) -> [bool; 18] {
    let mut bits = [false; 18];
    for (i, t) in trits.iter().enumerate() {
        let (hi, lo) = t.to_bit_pair();
        bits[i * 2] = hi;
        bits[i * 2 + 1] = lo;
    }
    bits
}

fn bits_to_trits(bits: &[bool; 18]) -> [Trit; 9] {
    let mut trits = [Trit::Zero; 9];
    for i in 0..9 {
        trits[i] = Trit::from_bit_pair(bits[i * 2], bits[i * 2 + 1]);
    }
    trits
}

/// Emit one 18-bit half as a pulse-interval stream: each bit is a high
/// pulse of `short` or `long` duration (per `form`) followed by a low
/// pulse of the complementary duration, so the total bit period is fixed.
fn encode_half(trits: &[Trit; 9], form: MmForm) -> Result<Vec<BitInterval>> {
    let (short, long) = form.timing();
    let bits = trits_to_bits(trits);
    let mut out = Vec::with_capacity(36);
    for bit in bits {
        let (high, low) = if bit { (long, short) } else { (short, long) };
        out.push(BitInterval::new(Level::High, high as u32)?);
        out.push(BitInterval::new(Level::Low, low as u32)?);
    }
    Ok(out)
}

/// Recover one half's trits from its 36 pulse durations, classifying each
/// pulse into the nearest of the four timing buckets (§4.5).
pub fn decode_half_pulses(pulses: &[u16], form: MmForm) -> Result<[Trit; 9]> {
    if pulses.len() != 36 {
        return Err(Error::ProtocolOutOfSync);
    }
    let (short, long) = form.timing();
    let mid = (short + long) / 2;
    let mut bits = [false; 18];
    for i in 0..18 {
        let high_pulse = pulses[i * 2];
        bits[i] = high_pulse > mid;
    }
    Ok(bits_to_trits(&bits))
}

/// Build the full two-half packet with its inter-half pause, ready for the
/// sequencer to splice into the track output.
pub fn encode_packet(payload: MmPayload, form: MmForm, cfg: &MmConfig) -> Result<Vec<BitInterval>> {
    let trits = build_trits(payload);
    let half = encode_half(&trits, form)?;
    let mut out = half.clone();
    out.push(BitInterval::new(Level::Low, cfg.pause_us as u32)?);
    out.extend(half);
    Ok(out)
}

/// Assemble a loco speed [`Packet`] (slow form).
pub fn loco_speed_packet(address: u8, function_on: bool, speed_step: u8, cfg: &MmConfig) -> Packet {
    let payload = MmPayload {
        address,
        function_bits: (function_on as u8) << 1,
        data: speed_step & 0x0F,
    };
    Packet::new(WireProtocol::Mm, address as u16, encode_payload_bytes(payload), cfg.repeat.max(1))
}

/// Assemble an accessory/turnout [`Packet`] (fast form).
pub fn accessory_packet(address: u8, thrown: bool, on: bool, cfg: &MmConfig) -> Packet {
    let payload = MmPayload {
        address,
        function_bits: (thrown as u8) << 1 | on as u8,
        data: 0,
    };
    Packet::new(WireProtocol::Mm, address as u16, encode_payload_bytes(payload), cfg.repeat.max(1))
}

/// Pack an [`MmPayload`] into the 3 logical bytes `Packet::payload` carries
/// (address, function_bits, data); the sequencer hands this straight back
/// into [`encode_packet`] when it is this address's turn.
fn encode_payload_bytes(payload: MmPayload) -> Vec<u8> {
    vec![payload.address, payload.function_bits, payload.data]
}

/// Decode 18 already-recovered bits (two per trit) into a payload; used by
/// the sniffer once it has a matching pair of halves in hand.
pub(crate) fn decode_bits(bits: &[bool; 18]) -> MmPayload {
    decode_trits(&bits_to_trits(bits))
}

pub fn payload_from_bytes(bytes: &[u8]) -> Option<MmPayload> {
    if bytes.len() != 3 {
        return None;
    }
    Some(MmPayload {
        address: bytes[0],
        function_bits: bytes[1],
        data: bytes[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_trits_round_trip() {
        for addr in [0u8, 1, 24, 0x55, 0xAA, 255] {
            let trits = address_trits(addr);
            assert_eq!(trits_to_address(&trits), addr);
        }
    }

    #[test]
    fn payload_round_trips_through_trits() {
        let payload = MmPayload {
            address: 24,
            function_bits: 0b10,
            data: 0b0110,
        };
        let trits = build_trits(payload);
        assert_eq!(decode_trits(&trits), payload);
    }

    #[test]
    fn config_pause_clamps_to_bounds() {
        assert_eq!(MmConfig::clamp_pause(999), 1000);
        assert_eq!(MmConfig::clamp_pause(6000), 5000);
        assert_eq!(MmConfig::clamp_pause(1500), 1500);
    }

    #[test]
    fn encoded_halves_are_bitwise_identical() {
        let payload = MmPayload {
            address: 24,
            function_bits: 0b01,
            data: 5,
        };
        let cfg = MmConfig::default();
        let stream = encode_packet(payload, MmForm::Fast, &cfg).unwrap();
        // 18 bits * 2 intervals (high+low) per half, plus one pause interval.
        let (first, rest) = stream.split_at(36);
        let (pause, second) = rest.split_at(1);
        assert_eq!(pause[0].level, Level::Low);
        assert_eq!(pause[0].duration_us, cfg.pause_us);
        assert_eq!(first, second);
    }

    #[test]
    fn decode_half_pulses_recovers_trits() {
        let payload = MmPayload {
            address: 24,
            function_bits: 0b10,
            data: 9,
        };
        let trits = build_trits(payload);
        let half = encode_half(&trits, MmForm::Slow).unwrap();
        let pulses: Vec<u16> = half.iter().map(|iv| iv.duration_us).collect();
        assert_eq!(pulses.len(), 36);
        let decoded = decode_half_pulses(&pulses, MmForm::Slow).unwrap();
        assert_eq!(decode_trits(&decoded), payload);
    }
}
