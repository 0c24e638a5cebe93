//! Scenario-level tests exercising the public API the way an embedder
//! would: build a `Station`, submit requests through its sender, drive
//! `run_once`/`tick_booster` by hand, and inspect what comes out the other
//! end. Each test is named after the component it stands in for, not after
//! a numbered scenario.

use mrstation_core::bus::{Event, EventKind, EventMask};
use mrstation_core::config::MemoryBackend;
use mrstation_core::db::Direction;
use mrstation_core::prog::{CvReadOp, ReadOutcome, ServiceMode};
use mrstation_core::protocol::mm::{encode_packet, MmConfig, MmForm, MmPayload};
use mrstation_core::protocol::WireProtocol;
use mrstation_core::queue::SwitchActivation;
use mrstation_core::sequencer::Mode;
use mrstation_core::sniffer::mm::MmSniffer;
use mrstation_core::sniffer::SniffOutcome;
use mrstation_core::station::{Station, StationConfig};
use mrstation_core::timer::{BitInterval, Edge, Level, TimerSink};

fn new_station() -> Station<MemoryBackend> {
    Station::new(StationConfig::default(), MemoryBackend::default(), MemoryBackend::default()).unwrap()
}

/// `timer::test_support` is unit-test-only (`#[cfg(test)]`), so an
/// integration test that links the compiled library needs its own sink.
#[derive(Default)]
struct RecordingSink {
    intervals: Vec<BitInterval>,
}

impl TimerSink for RecordingSink {
    fn emit(&mut self, interval: BitInterval) -> mrstation_core::error::Result<()> {
        self.intervals.push(interval);
        Ok(())
    }
}

/// A 28-step forward speed-10 command for loco 3 comes out as the exact
/// NMRA-advanced-operations bytes, repeated 3 times.
#[test]
fn go_mode_speed_command_emits_the_documented_byte_sequence() {
    let mut station = new_station();
    station.request_sender().set_speed(3, 0x8A).unwrap();
    station.request_sender().set_mode(Mode::Go).unwrap();

    let mut sink = RecordingSink::default();
    station.run_once(0, &mut sink).unwrap();
    let decision = station.run_once(10, &mut sink).unwrap().expect("a due loco slot");

    assert_eq!(decision.packet.protocol, WireProtocol::Dcc);
    assert_eq!(decision.packet.payload, vec![0x03, 0x6A, 0x69]);
    assert_eq!(decision.packet.repeat, 3);
    let xor = decision.packet.payload.iter().fold(0u8, |acc, b| acc ^ b);
    assert_eq!(xor, 0, "checksum invariant: XOR of all payload bytes is zero");
}

/// A timed turnout throw builds an on-packet then an off-packet with the
/// documented instruction bytes (checksum aside).
#[test]
fn timed_turnout_throw_builds_on_then_off_packets() {
    let packets = mrstation_core::sequencer::switch_packets(5, Direction::Thrown, SwitchActivation::Timed(100)).unwrap();
    assert_eq!(packets.len(), 2);
    assert_eq!(&packets[0].payload[..2], &[0x81, 0xF9]);
    assert_eq!(&packets[1].payload[..2], &[0x81, 0xF8]);
    for packet in &packets {
        let xor = packet.payload.iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(xor, 0);
    }
}

/// A sustained over-current forces the sequencer into SHORT at the next
/// packet boundary and fires exactly one `SystemState` event.
#[test]
fn sustained_overcurrent_forces_short_mode_and_fires_once() {
    let mut station = new_station();
    station.request_sender().set_mode(Mode::Go).unwrap();
    let mut sink = RecordingSink::default();
    station.run_once(0, &mut sink).unwrap();
    station.booster.request_on(true, false);

    // Let the inrush window elapse without tripping anything.
    for ms in 0..120 {
        station.tick_booster(0, ms);
    }
    let max = station.booster.config.max_current_ma;
    let mut trips = 0;
    for ms in 120..400 {
        station.tick_booster(max + 1000, ms);
        if station.sequencer.mode() == Mode::Short {
            trips += 1;
        }
    }
    assert_eq!(trips, 0, "mode() only changes at a packet boundary, not mid-tick");
    station.run_once(400, &mut sink).unwrap();
    assert_eq!(station.sequencer.mode(), Mode::Short);
}

/// An emitted MM fast-form accessory packet's two halves decode back to
/// the same logical payload the encoder started from (round-trip law).
#[test]
fn mm_accessory_packet_round_trips_through_the_sniffer() {
    let payload = MmPayload {
        address: 24,
        function_bits: 0b10,
        data: 0,
    };
    let cfg = MmConfig::default();
    let stream = encode_packet(payload, MmForm::Fast, &cfg).unwrap();

    let mut ts = 0u32;
    let mut edges = vec![Edge { timestamp_100ns: 0, rising: true }];
    for iv in &stream {
        ts += iv.duration_us as u32 * 10;
        let rising = iv.level == Level::Low;
        edges.push(Edge { timestamp_100ns: ts, rising });
    }

    let mut sniffer = MmSniffer::new();
    let mut decoded = None;
    for edge in edges {
        if let SniffOutcome::Packet(frame) = sniffer.consume(edge) {
            decoded = Some(frame);
            break;
        }
    }
    let frame = decoded.expect("a full two-half packet");
    assert_eq!(frame.payload, payload);
}

/// A registered handler with no matching event within its timeout window
/// receives exactly one `Timeout` event, and no more after that.
#[test]
fn unmatched_subscription_times_out_exactly_once() {
    let bus = mrstation_core::bus::EventBus::new();
    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_for_handler = received.clone();
    let id = bus
        .register(
            EventMask::of(&[EventKind::LocoSpeed]),
            Some(500),
            0,
            Box::new(move |event: &Event| {
                received_for_handler.lock().unwrap().push(event.kind);
                true
            }),
        )
        .unwrap();
    let _ = id;

    bus.drive_timeouts(400);
    assert!(received.lock().unwrap().is_empty(), "timeout has not elapsed yet");
    bus.drive_timeouts(520);
    assert_eq!(*received.lock().unwrap(), vec![EventKind::Timeout]);
    bus.drive_timeouts(900);
    assert_eq!(received.lock().unwrap().len(), 1, "a delivered timeout is not redelivered");
}

/// A service-mode CV read that the decoder ACKs bit-by-bit reassembles the
/// decoder's actual value, with no spurious timeout.
#[test]
fn service_mode_cv_read_reassembles_the_decoders_value() {
    let target: u8 = 62;
    let mut op = CvReadOp::new(ServiceMode::Direct, 8).unwrap();
    let mut outcome = None;
    // Up to two tries per bit (testing 1 then 0) plus one final byte-verify.
    for _ in 0..(8 * 2 + 1) {
        let Some(packet) = op.next_packet() else { break };
        // byte0's CC bits distinguish a bit-verify instruction (0x08) from
        // the final byte-verify confirmation (0x04).
        let is_bit_verify = packet[0] & 0x0C == 0x08;
        let acks = if is_bit_verify {
            let bit_pos = packet[2] & 0x07;
            let tested_value = packet[2] & 0x08 != 0;
            let actual_bit = (target >> bit_pos) & 1 != 0;
            actual_bit == tested_value
        } else {
            packet[2] == target
        };
        if acks {
            // An ACK only latches once the current surge has held for
            // ACK_MIN_DURATION_MS consecutive 1 ms samples (§4.6).
            for _ in 0..mrstation_core::prog::ACK_MIN_DURATION_MS {
                outcome = op.feed_current(100);
            }
        } else {
            outcome = op.timeout();
        }
        if outcome.is_some() {
            break;
        }
    }
    assert_eq!(outcome, Some(ReadOutcome::Value(target)));
}
