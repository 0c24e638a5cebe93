//! Real-time signal engine and layout state store for a model-railroad
//! command station.
//!
//! This crate drives one or more tracks with precisely timed digital
//! signals in three coexisting legacy protocols (Motorola/MM, DCC, M3),
//! receives RailCom telemetry during signal gaps, supervises booster power
//! (voltage ramp, current limiting, short detection), and multiplexes
//! mutating requests from any number of callers into a single authoritative
//! layout state.
//!
//! The physical pulse output, the network/FTP/HTTP boundary, the flash
//! filesystem, and the presentation layer (LEDs, audio, wireless) are not
//! implemented here — see [`timer`] for the hardware-facing contract this
//! crate expects from its embedder.

pub mod booster;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod prog;
pub mod protocol;
pub mod queue;
pub mod refresh;
pub mod sequencer;
pub mod sniffer;
pub mod station;
pub mod timer;

pub use error::Error;
pub use station::Station;
