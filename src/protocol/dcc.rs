//! NMRA DCC packet framing and bit timing.

use crate::error::{Error, Result};
use crate::timer::{BitInterval, Level};

use super::{Packet, SpeedCommand, WireProtocol};

/// Track-bit timing and framing parameters (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DccConfig {
    pub preamble_bits: u8,
    pub one_half_period_us: u16,
    pub zero_half_period_us: u16,
    pub tail_bits: u8,
    pub repeat: u8,
    pub pom_repeat: u8,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            preamble_bits: 16,
            one_half_period_us: 116,
            zero_half_period_us: 200,
            tail_bits: 2,
            repeat: 3,
            pom_repeat: 3,
        }
    }
}

impl DccConfig {
    pub fn validate(&self) -> Result<()> {
        if !(9..=30).contains(&self.preamble_bits) {
            return Err(Error::InvalidParam(format!(
                "dcc preamble_bits {} out of range 9..=30",
                self.preamble_bits
            )));
        }
        if !(80..=150).contains(&self.one_half_period_us) {
            return Err(Error::InvalidParam(format!(
                "dcc one_half_period_us {} out of range 80..=150",
                self.one_half_period_us
            )));
        }
        if !(160..=800).contains(&self.zero_half_period_us) {
            return Err(Error::InvalidParam(format!(
                "dcc zero_half_period_us {} out of range 160..=800",
                self.zero_half_period_us
            )));
        }
        if self.tail_bits != 2 && self.tail_bits != 4 {
            return Err(Error::InvalidParam(format!(
                "dcc tail_bits {} must be 2 or 4",
                self.tail_bits
            )));
        }
        if !(1..=10).contains(&self.repeat) {
            return Err(Error::InvalidParam(format!(
                "dcc repeat {} out of range 1..=10",
                self.repeat
            )));
        }
        if !(1..=30).contains(&self.pom_repeat) {
            return Err(Error::InvalidParam(format!(
                "dcc pom_repeat {} out of range 1..=30",
                self.pom_repeat
            )));
        }
        Ok(())
    }
}

/// Speed-step granularity a loco's DCC format was configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedSteps {
    Steps14,
    Steps28,
    Steps126,
}

/// Straight or thrown, as commanded to an accessory decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessoryDirection {
    Straight,
    Thrown,
}

/// Build the address bytes for a loco packet: short form for 1..127, long
/// form (`11AAAAAA AAAAAAAA`) for 128..10239.
fn address_bytes(address: u16) -> Vec<u8> {
    if address == 0 || address > 10239 {
        // caller validates; degrade gracefully rather than panic
        return vec![(address & 0x7F) as u8];
    }
    if address <= 127 {
        vec![address as u8]
    } else {
        let high = ((address >> 8) & 0x3F) as u8;
        let low = (address & 0xFF) as u8;
        vec![0xC0 | high, low]
    }
}

/// Encode a 28-step/14-step/126-step speed-and-direction instruction.
fn speed_instruction(steps: SpeedSteps, cmd: SpeedCommand) -> Vec<u8> {
    let dir_bit = cmd.forward as u8;
    match steps {
        SpeedSteps::Steps14 => vec![0x40 | (dir_bit << 5) | (cmd.step & 0x0F)],
        SpeedSteps::Steps28 => vec![0x40 | (dir_bit << 5) | (cmd.step & 0x1F)],
        SpeedSteps::Steps126 => vec![0x3F, (dir_bit << 7) | (cmd.step & 0x7F)],
    }
}

/// Build a speed-and-direction loco packet's payload bytes (address + data +
/// XOR checksum), ready for bit-level encoding.
pub fn build_speed_packet(address: u16, steps: SpeedSteps, cmd: SpeedCommand) -> Vec<u8> {
    let mut bytes = address_bytes(address);
    bytes.extend(speed_instruction(steps, cmd));
    push_checksum(&mut bytes);
    bytes
}

/// Build a function-group packet (F0..F4, F5..F8, F9..F12, F13..F20,
/// F21..F28) from the 32-bit function mask's relevant group.
pub fn build_function_packet(address: u16, group: u8, bits: u8) -> Vec<u8> {
    let mut bytes = address_bytes(address);
    let instruction = match group {
        0 => 0x80 | ((bits & 0x01) << 4) | (bits & 0x0F) >> 1 | ((bits & 0x1E) >> 1),
        1 => 0xB0 | (bits & 0x0F),
        2 => 0xA0 | (bits & 0x0F),
        _ => 0xDE, // unused groups fold onto a no-op CV access style filler
    };
    bytes.push(instruction);
    push_checksum(&mut bytes);
    bytes
}

/// Map a layout accessory address (1..2048) plus requested direction and
/// activate state onto the basic accessory packet `10AAAAAA 1AAACDDR`.
pub fn build_accessory_packet(address: u16, direction: AccessoryDirection, activate: bool) -> Vec<u8> {
    let wire_adr = address.saturating_sub(1);
    let byte0 = 0x80 | (((wire_adr >> 2) & 0x3F) as u8);
    let addr_high = ((wire_adr >> 8) & 0x7) as u8;
    let inv_addr_high = (!addr_high) & 0x7;
    let dir_bit = matches!(direction, AccessoryDirection::Thrown) as u8;
    let dd = (wire_adr & 0x3) as u8;
    let byte1 = 0x80 | (inv_addr_high << 4) | (dir_bit << 3) | (dd << 1) | (activate as u8);
    let mut bytes = vec![byte0, byte1];
    push_checksum(&mut bytes);
    bytes
}

/// Recover `(address, direction, activate)` from a sniffed accessory packet.
pub fn decode_accessory_packet(byte0: u8, byte1: u8) -> (u16, AccessoryDirection, bool) {
    let inv_addr_high = (byte1 & 0x70) ^ 0x70;
    let adr = (((byte0 & 0x3F) as u16) << 2) | ((inv_addr_high as u16) << 4) | (((byte1 & 0x06) as u16) >> 1);
    let direction = if byte1 & 0x08 != 0 {
        AccessoryDirection::Thrown
    } else {
        AccessoryDirection::Straight
    };
    (adr + 1, direction, byte1 & 0x01 != 0)
}

/// The idle packet every station must interleave when nothing else is due.
pub fn idle_packet() -> Vec<u8> {
    vec![0xFF, 0x00, 0xFF]
}

/// Which CV access instruction a direct-mode or POM packet carries
/// (NMRA S-9.2.3 configuration variable access instruction, short form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvOp {
    VerifyByte,
    WriteByte,
}

impl CvOp {
    fn cc_bits(self) -> u8 {
        match self {
            CvOp::VerifyByte => 0b01,
            CvOp::WriteByte => 0b11,
        }
    }
}

/// `0111CCVV`/`1110CCVV` instruction byte plus the CV's low 8 bits and the
/// data byte, `prefix` distinguishing service-mode direct (`0x70`) from the
/// long form used inside an addressed POM packet (`0xE0`).
fn cv_instruction_bytes(prefix: u8, cv: u16, op: CvOp, value: u8) -> [u8; 3] {
    let cv0 = cv.saturating_sub(1).min(1023);
    let byte0 = prefix | (op.cc_bits() << 2) | ((cv0 >> 8) as u8 & 0x03);
    [byte0, (cv0 & 0xFF) as u8, value]
}

/// `111KDBBB` bit-manipulation instruction byte testing (`K=0`) or writing
/// (`K=1`) a single bit of `cv`, used by the service-mode bit-verify read
/// sequence.
fn cv_bit_instruction_bytes(cv: u16, bit_pos: u8, bit_value: bool, write: bool) -> [u8; 3] {
    let cv0 = cv.saturating_sub(1).min(1023);
    let byte0 = 0x78 | ((cv0 >> 8) as u8 & 0x03);
    let byte1 = (cv0 & 0xFF) as u8;
    let byte2 = 0xE0 | ((write as u8) << 4) | ((bit_value as u8) << 3) | (bit_pos & 0x07);
    [byte0, byte1, byte2]
}

/// Build a service-mode direct CV byte packet: no address bytes, broadcast
/// on the programming track (§4.6).
pub fn service_mode_byte_packet(cv: u16, op: CvOp, value: u8) -> Vec<u8> {
    let mut bytes = cv_instruction_bytes(0x70, cv, op, value).to_vec();
    push_checksum(&mut bytes);
    bytes
}

/// Build a service-mode direct bit-verify packet testing bit `bit_pos`
/// (0..8, MSB-first per NMRA convention) of `cv` against `bit_value`.
pub fn service_mode_bit_verify_packet(cv: u16, bit_pos: u8, bit_value: bool) -> Vec<u8> {
    let mut bytes = cv_bit_instruction_bytes(cv, bit_pos, bit_value, false).to_vec();
    push_checksum(&mut bytes);
    bytes
}

/// Build a programming-on-main (POM) CV access packet: address bytes
/// followed by the long-form CV instruction (§4.6, GLOSSARY "POM / XPOM").
pub fn pom_cv_packet(address: u16, cv: u16, op: CvOp, value: u8) -> Vec<u8> {
    let mut bytes = address_bytes(address);
    bytes.extend(cv_instruction_bytes(0xE0, cv, op, value));
    push_checksum(&mut bytes);
    bytes
}

fn push_checksum(bytes: &mut Vec<u8>) {
    let xor = bytes.iter().fold(0u8, |acc, b| acc ^ b);
    bytes.push(xor);
}

/// Turn framed packet bytes into a bit-interval stream: preamble, a `0`
/// separator before every byte, 8 data bits MSB-first, and a final `1` stop
/// bit after the last byte.
pub fn encode_bits(bytes: &[u8], cfg: &DccConfig, railcom_cutout: bool) -> Result<Vec<BitInterval>> {
    let mut out = Vec::new();
    for _ in 0..cfg.preamble_bits {
        push_bit(&mut out, true, cfg)?;
    }
    for (i, byte) in bytes.iter().enumerate() {
        push_bit(&mut out, false, cfg)?;
        for bit_idx in (0..8).rev() {
            push_bit(&mut out, (byte >> bit_idx) & 1 != 0, cfg)?;
        }
        if i == bytes.len() - 1 {
            push_bit(&mut out, true, cfg)?;
        }
    }
    if railcom_cutout {
        out.push(BitInterval::new(Level::HiZ, 454)?);
    }
    Ok(out)
}

fn push_bit(out: &mut Vec<BitInterval>, one: bool, cfg: &DccConfig) -> Result<()> {
    let half = if one {
        cfg.one_half_period_us
    } else {
        cfg.zero_half_period_us
    };
    out.push(BitInterval::new(Level::High, half as u32)?);
    out.push(BitInterval::new(Level::Low, half as u32)?);
    Ok(())
}

/// Assemble a full loco speed [`Packet`] for the sequencer.
pub fn speed_packet(address: u16, steps: SpeedSteps, cmd: SpeedCommand, cfg: &DccConfig) -> Packet {
    Packet::new(
        WireProtocol::Dcc,
        address,
        build_speed_packet(address, steps, cmd),
        cfg.repeat,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_packet_matches_reference_bytes() {
        // loco 3, DCC-28, forward, step 10 -> 0x03 0x6A 0x69
        let bytes = build_speed_packet(3, SpeedSteps::Steps28, SpeedCommand {
            forward: true,
            step: 10,
        });
        assert_eq!(bytes, vec![0x03, 0x6A, 0x69]);
    }

    #[test]
    fn accessory_on_off_pulse_matches_reference_bytes() {
        let on = build_accessory_packet(5, AccessoryDirection::Thrown, true);
        assert_eq!(on, vec![0x81, 0xF9, 0x78]);
        let off = build_accessory_packet(5, AccessoryDirection::Thrown, false);
        assert_eq!(off, vec![0x81, 0xF8, 0x79]);
    }

    #[test]
    fn accessory_round_trips_through_decode() {
        let (addr, dir, on) = decode_accessory_packet(0x81, 0xF9);
        assert_eq!(addr, 5);
        assert_eq!(dir, AccessoryDirection::Thrown);
        assert!(on);
    }

    #[test]
    fn idle_packet_is_all_ones_zero_checksum() {
        assert_eq!(idle_packet(), vec![0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn config_validates_ranges() {
        assert!(DccConfig::default().validate().is_ok());
        let mut bad = DccConfig::default();
        bad.preamble_bits = 8;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn long_address_uses_two_bytes() {
        let bytes = address_bytes(1000);
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0] & 0xC0, 0xC0);
    }

    #[test]
    fn service_mode_write_packet_has_no_address_bytes() {
        // CV 29, write 0x06: cv0 = 28 = 0x01C, vv = 0.
        let bytes = service_mode_byte_packet(29, CvOp::WriteByte, 0x06);
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0], 0x7C); // 0111 11 00
        assert_eq!(bytes[1], 28);
        assert_eq!(bytes[2], 0x06);
    }

    #[test]
    fn service_mode_verify_and_write_differ_only_in_cc_bits() {
        let verify = service_mode_byte_packet(1, CvOp::VerifyByte, 3);
        let write = service_mode_byte_packet(1, CvOp::WriteByte, 3);
        assert_eq!(verify[0] & 0x03, write[0] & 0x03); // same VV
        assert_ne!(verify[0] & 0x0C, write[0] & 0x0C); // different CC
    }

    #[test]
    fn bit_verify_packet_encodes_position_and_value() {
        let bytes = service_mode_bit_verify_packet(1, 3, true);
        assert_eq!(bytes[2] & 0x07, 3);
        assert_eq!(bytes[2] & 0x08, 0x08);
        assert_eq!(bytes[2] & 0x10, 0, "K must be 0 for a verify, not a write");
    }

    #[test]
    fn pom_packet_carries_the_loco_address() {
        let bytes = pom_cv_packet(3, 29, CvOp::WriteByte, 0x06);
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1], 0xEC); // 1110 11 00
        assert_eq!(bytes[2], 28);
        assert_eq!(bytes[3], 0x06);
    }
}
