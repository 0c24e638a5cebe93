//! M3 packet framing: Manchester-like payload bits behind a fixed sync
//! pattern (§4.2). The sniffer side (§4.5) only ever decodes the sync
//! pattern and discards the payload — that asymmetry is intentional and
//! spelled out as conformant in §9's Open Questions — but the encoder still
//! has to produce a real payload for any M3 decoder on the layout to act
//! on, so this module encodes address/command/beacon frames in full.

use crate::error::{Error, Result};
use crate::timer::{BitInterval, Level};

use super::{Packet, WireProtocol};

/// Repetition count and beacon identity (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct M3Config {
    pub repeat: u8,
    pub station_id: u16,
    pub announce_counter: u8,
}

impl Default for M3Config {
    fn default() -> Self {
        Self {
            repeat: 3,
            station_id: 0x1234,
            announce_counter: 0xA5,
        }
    }
}

impl M3Config {
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.repeat) {
            return Err(Error::InvalidParam(format!(
                "m3.repeat {} out of range 1..=10",
                self.repeat
            )));
        }
        Ok(())
    }
}

/// One half-bit edge level in the six-edge sync pattern: Long or Short hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEdge {
    Long,
    Short,
}

/// The fixed `LSLLSL` sync pattern the sniffer watches for (§4.5).
pub const SYNC_PATTERN: [SyncEdge; 6] = [
    SyncEdge::Long,
    SyncEdge::Short,
    SyncEdge::Long,
    SyncEdge::Long,
    SyncEdge::Short,
    SyncEdge::Long,
];

const SYNC_LONG_US: u16 = 100;
const SYNC_SHORT_US: u16 = 50;
const BIT_PERIOD_US: u16 = 50;

/// An M3 frame kind. Beacon frames announce the station so decoders can
/// bind; command frames carry an address plus a 1-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M3Frame {
    Beacon { station_id: u16, announce_counter: u8 },
    Command { address: u16, payload: u8 },
}

fn manchester_bit(out: &mut Vec<BitInterval>, one: bool) -> Result<()> {
    // IEEE convention: a `1` is high-then-low, a `0` is low-then-high, each
    // half the bit period.
    let (first, second) = if one {
        (Level::High, Level::Low)
    } else {
        (Level::Low, Level::High)
    };
    out.push(BitInterval::new(first, (BIT_PERIOD_US / 2) as u32)?);
    out.push(BitInterval::new(second, (BIT_PERIOD_US / 2) as u32)?);
    Ok(())
}

fn manchester_byte(out: &mut Vec<BitInterval>, byte: u8) -> Result<()> {
    for i in (0..8).rev() {
        manchester_bit(out, (byte >> i) & 1 != 0)?;
    }
    Ok(())
}

fn sync_preamble() -> Result<Vec<BitInterval>> {
    let mut out = Vec::with_capacity(SYNC_PATTERN.len());
    let mut level = Level::High;
    for edge in SYNC_PATTERN {
        let dur = match edge {
            SyncEdge::Long => SYNC_LONG_US,
            SyncEdge::Short => SYNC_SHORT_US,
        };
        out.push(BitInterval::new(level, dur as u32)?);
        level = if level == Level::High { Level::Low } else { Level::High };
    }
    Ok(out)
}

/// Build the bit-interval stream for one frame: sync pattern followed by
/// Manchester-encoded payload bytes.
pub fn encode_frame(frame: M3Frame) -> Result<Vec<BitInterval>> {
    let mut out = sync_preamble()?;
    match frame {
        M3Frame::Beacon {
            station_id,
            announce_counter,
        } => {
            manchester_byte(&mut out, (station_id >> 8) as u8)?;
            manchester_byte(&mut out, station_id as u8)?;
            manchester_byte(&mut out, announce_counter)?;
        }
        M3Frame::Command { address, payload } => {
            manchester_byte(&mut out, (address >> 8) as u8)?;
            manchester_byte(&mut out, address as u8)?;
            manchester_byte(&mut out, payload)?;
        }
    }
    Ok(out)
}

/// Assemble a station-beacon [`Packet`] using the configured identity.
pub fn beacon_packet(cfg: &M3Config) -> Packet {
    Packet::new(
        WireProtocol::M3,
        0,
        vec![
            (cfg.station_id >> 8) as u8,
            cfg.station_id as u8,
            cfg.announce_counter,
        ],
        cfg.repeat,
    )
}

/// Assemble a loco/accessory command [`Packet`].
pub fn command_packet(address: u16, payload: u8, cfg: &M3Config) -> Packet {
    Packet::new(
        WireProtocol::M3,
        address,
        vec![(address >> 8) as u8, address as u8, payload],
        cfg.repeat,
    )
}
