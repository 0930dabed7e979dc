//! Integration tests for the splice transport.
//!
//! These tests verify that a splice wrapped around a transport correctly:
//! - Captures payloads while the inbound channel is absent
//! - Holds back substitution until the first inbound packet
//! - Substitutes only the newest pending payload
//! - Passes packets through untouched on any exchange failure
//! - Pairs each concurrent sender with the answer to its own payload
//! - Tears down channels and writes the timing log once, at detach

use bytes::BytesMut;
use ipc::{Cancellation, ChannelKey, ExchangeChannel, MemoryBus, MessageClass};
use rtc_splice::{
    ExchangeEngine, MediaTransport, NoopTransport, OpTag, SpliceBuilder, SpliceConfig,
    SpliceTransport,
};
use shared::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Helper Functions
// =============================================================================

/// Helper to create a raw RTP packet carrying `payload`.
fn rtp_packet(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0x80, 0x60];
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&[0, 0, 0x0b, 0xb8]);
    pkt.extend_from_slice(&0x1234_5678u32.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

fn log_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "rtc-splice-it-{}-{}.log",
        name,
        std::process::id()
    ))
}

fn test_config(name: &str) -> SpliceConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    SpliceConfig {
        receive_timeout: Duration::from_millis(50),
        timing_log_path: log_path(name),
        ..Default::default()
    }
}

/// Attaches `splice` with an RTP callback collecting delivered packets.
fn attach_collecting(splice: &mut SpliceTransport<NoopTransport>) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    splice
        .attach(
            Box::new(move |pkt: &[u8]| sink.lock().unwrap().push(pkt.to_vec())),
            Box::new(|_: &[u8]| {}),
        )
        .unwrap();
    delivered
}

fn read_log(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).unwrap();
    text.lines().map(str::to_string).collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_capture_only_when_inbound_absent() {
    let bus = MemoryBus::new();
    let outbound = bus.create(ChannelKey::OUTBOUND);
    let engine = ExchangeEngine::new(test_config("capture-only"), &bus);
    assert!(!engine.substitution());

    for seq in 0..5u16 {
        let mut pkt = rtp_packet(seq, &[seq as u8; 20]);
        let original = pkt.clone();
        let outcome = engine.send_leg(&mut pkt).unwrap();
        assert!(outcome.captured);
        assert!(!outcome.substituted);
        assert_eq!(pkt, original);
    }

    for seq in 0..5u8 {
        let msg = outbound.try_recv(MessageClass::PAYLOAD).unwrap().unwrap();
        assert_eq!(msg, vec![seq; 20]);
    }
    let records = engine.timing().records();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.tag == OpTag::Capture));
}

#[test]
fn test_capture_only_adapter_transmits_unchanged() {
    let bus = MemoryBus::new();
    bus.create(ChannelKey::OUTBOUND);
    let mut splice = SpliceTransport::new(NoopTransport::new(), test_config("adapter-a"), &bus);
    let injector = splice.inner().injector();
    let delivered = attach_collecting(&mut splice);

    assert!(injector.deliver_rtp(&rtp_packet(1, b"incoming")));
    // without substitution the gate stays closed
    assert!(!splice.gate().is_open());

    let pkt = rtp_packet(2, b"outgoing");
    splice.send_rtp(BytesMut::from(&pkt[..])).unwrap();
    assert_eq!(&splice.inner_mut().poll_rtp_sent().unwrap()[..], &pkt[..]);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[test]
fn test_substitution_waits_for_gate() {
    let bus = MemoryBus::new();
    let outbound = bus.create(ChannelKey::OUTBOUND);
    let inbound = bus.create(ChannelKey::INBOUND);
    let mut splice = NoopTransport::new().with(
        SpliceBuilder::new()
            .with_config(test_config("gate"))
            .with_remove_channels_on_detach(false)
            .build(&bus),
    );
    let injector = splice.inner().injector();
    let delivered = attach_collecting(&mut splice);

    // closed gate: exchange skipped entirely
    let before = rtp_packet(1, b"AAAA");
    splice.send_rtp(BytesMut::from(&before[..])).unwrap();
    assert_eq!(&splice.inner_mut().poll_rtp_sent().unwrap()[..], &before[..]);
    assert_eq!(outbound.pending().unwrap(), 0);

    let incoming = rtp_packet(7, b"peer");
    assert!(injector.deliver_rtp(&incoming));
    assert!(splice.gate().is_open());
    assert_eq!(delivered.lock().unwrap()[0], incoming);

    inbound.publish(MessageClass::PAYLOAD, b"ZZZZ").unwrap();
    let after = rtp_packet(2, b"BBBB");
    splice.send_rtp(BytesMut::from(&after[..])).unwrap();

    let sent = splice.inner_mut().poll_rtp_sent().unwrap();
    assert_eq!(&sent[..12], &after[..12]);
    assert_eq!(&sent[12..], b"ZZZZ");
    assert_eq!(
        outbound.try_recv(MessageClass::PAYLOAD).unwrap().unwrap(),
        &b"BBBB"[..]
    );

    let stats = splice.stats();
    assert_eq!(stats.observed, 1);
    assert_eq!(stats.captured, 1);
    assert_eq!(stats.substituted, 1);

    splice.detach().unwrap();
    std::fs::remove_file(log_path("gate")).unwrap();
}

#[test]
fn test_stale_messages_are_drained() {
    let bus = MemoryBus::new();
    let inbound = bus.create(ChannelKey::INBOUND);
    let engine = ExchangeEngine::new(test_config("drain"), &bus);

    for msg in [b"old1", b"old2", b"new!"] {
        inbound.publish(MessageClass::PAYLOAD, msg).unwrap();
    }
    let mut pkt = rtp_packet(3, b"....");
    let outcome = engine.send_leg(&mut pkt).unwrap();

    assert_eq!(outcome.drained, 2);
    assert!(outcome.substituted);
    assert_eq!(&pkt[12..], b"new!");
    assert_eq!(inbound.pending().unwrap(), 0);
    assert_eq!(engine.stats().drained, 2);
}

#[test]
fn test_longer_message_is_truncated_to_payload() {
    let bus = MemoryBus::new();
    let inbound = bus.create(ChannelKey::INBOUND);
    let engine = ExchangeEngine::new(test_config("truncate"), &bus);

    inbound
        .publish(MessageClass::PAYLOAD, b"0123456789")
        .unwrap();
    let mut pkt = rtp_packet(4, b"abc");
    engine.send_leg(&mut pkt).unwrap();
    assert_eq!(pkt.len(), 15);
    assert_eq!(&pkt[12..], b"012");
}

#[test]
fn test_receive_waits_for_late_message() {
    let bus = MemoryBus::new();
    let inbound = bus.create(ChannelKey::INBOUND);
    let engine = ExchangeEngine::new(
        SpliceConfig {
            receive_timeout: Duration::from_secs(2),
            ..test_config("late")
        },
        &bus,
    );

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        inbound.publish(MessageClass::PAYLOAD, b"late").unwrap();
    });

    let mut pkt = rtp_packet(5, b"????");
    let outcome = engine.send_leg(&mut pkt).unwrap();
    producer.join().unwrap();

    assert_eq!(outcome.drained, 0);
    assert_eq!(&pkt[12..], b"late");
}

#[test]
fn test_malformed_packets_pass_through() {
    let bus = MemoryBus::new();
    bus.create(ChannelKey::OUTBOUND);
    bus.create(ChannelKey::INBOUND);
    let mut splice = SpliceTransport::new(NoopTransport::new(), test_config("malformed"), &bus);
    let injector = splice.inner().injector();
    let delivered = attach_collecting(&mut splice);

    // opens the gate, malformed or not
    assert!(injector.deliver_rtp(&[0x80, 0x60, 0x00]));
    assert_eq!(delivered.lock().unwrap()[0], vec![0x80, 0x60, 0x00]);

    // csrc count 3 claims 24 header bytes
    let short = vec![0x83, 0x60, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 9, 9];
    splice.send_rtp(BytesMut::from(&short[..])).unwrap();
    assert_eq!(&splice.inner_mut().poll_rtp_sent().unwrap()[..], &short[..]);
    assert_eq!(splice.stats().malformed, 1);
}

#[test]
fn test_timeout_passes_through() {
    let bus = MemoryBus::new();
    bus.create(ChannelKey::INBOUND);
    let mut splice = SpliceTransport::new(
        NoopTransport::new(),
        SpliceConfig {
            receive_timeout: Duration::from_millis(10),
            ..test_config("timeout")
        },
        &bus,
    );
    splice.gate().open();

    let pkt = rtp_packet(6, b"keep");
    let start = Instant::now();
    splice.send_rtp(BytesMut::from(&pkt[..])).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(&splice.inner_mut().poll_rtp_sent().unwrap()[..], &pkt[..]);
    assert_eq!(splice.stats().timeouts, 1);
}

#[test]
fn test_other_message_classes_are_left_queued() {
    let bus = MemoryBus::new();
    let inbound = bus.create(ChannelKey::INBOUND);
    let engine = ExchangeEngine::new(test_config("mixed-class"), &bus);

    inbound.publish(MessageClass(2), b"xx").unwrap();
    inbound.publish(MessageClass(2), b"yy").unwrap();
    inbound.publish(MessageClass::PAYLOAD, b"SUBS").unwrap();

    let mut pkt = rtp_packet(8, b"orig");
    let outcome = engine.send_leg(&mut pkt).unwrap();

    assert!(outcome.substituted);
    assert_eq!(outcome.drained, 0);
    assert_eq!(&pkt[12..], b"SUBS");
    assert_eq!(inbound.pending().unwrap(), 2);

    let stats = engine.stats();
    assert_eq!(stats.substituted, 1);
    assert_eq!(stats.drained, 0);
    assert_eq!(stats.timeouts, 0);
}

#[test]
fn test_full_outbound_passes_through() {
    let bus = MemoryBus::new();
    let outbound = bus.create_with_capacity(ChannelKey::OUTBOUND, 1);
    let inbound = bus.create(ChannelKey::INBOUND);
    outbound.publish(MessageClass::PAYLOAD, b"backlog").unwrap();
    inbound.publish(MessageClass::PAYLOAD, b"SUBS").unwrap();
    let engine = ExchangeEngine::new(test_config("outbound-full"), &bus);

    let mut pkt = rtp_packet(9, b"orig");
    let original = pkt.clone();
    assert_eq!(
        engine.send_leg(&mut pkt),
        Err(Error::ErrChannelFull(ChannelKey::OUTBOUND.0))
    );

    assert_eq!(pkt, original);
    assert!(engine.timing().is_empty());
    assert_eq!(engine.stats().failures, 1);
    assert_eq!(engine.stats().substituted, 0);
    // neither queue was consumed
    assert_eq!(outbound.pending().unwrap(), 1);
    assert_eq!(inbound.pending().unwrap(), 1);
}

#[test]
fn test_removed_outbound_passes_through() {
    let bus = MemoryBus::new();
    let outbound = bus.create(ChannelKey::OUTBOUND);
    let inbound = bus.create(ChannelKey::INBOUND);
    inbound.publish(MessageClass::PAYLOAD, b"SUBS").unwrap();
    let engine = ExchangeEngine::new(test_config("outbound-removed"), &bus);
    outbound.destroy().unwrap();

    let mut pkt = rtp_packet(10, b"orig");
    let original = pkt.clone();
    assert_eq!(engine.send_leg(&mut pkt), Err(Error::ErrChannelRemoved));

    assert_eq!(pkt, original);
    assert!(engine.timing().is_empty());
    assert_eq!(engine.stats().failures, 1);
    assert_eq!(inbound.pending().unwrap(), 1);
}

#[test]
fn test_concurrent_senders_get_their_own_answers() {
    const SENDERS: u8 = 8;
    const ROUNDS: u8 = 10;

    let bus = MemoryBus::new();
    let captured = bus.create(ChannelKey::OUTBOUND);
    let answers = bus.create(ChannelKey::INBOUND);
    let engine = Arc::new(ExchangeEngine::new(
        SpliceConfig {
            receive_timeout: Duration::from_secs(2),
            remove_channels_on_detach: false,
            ..test_config("concurrent")
        },
        &bus,
    ));

    // answers every captured payload with its bitwise complement
    let stop = Cancellation::new();
    let peer = {
        let stop = stop.clone();
        thread::spawn(move || {
            loop {
                let poll = Duration::from_millis(50);
                match captured.recv_timeout(MessageClass::PAYLOAD, poll, &stop) {
                    Ok(payload) => {
                        let answer: Vec<u8> = payload.iter().map(|b| !b).collect();
                        answers.publish(MessageClass::PAYLOAD, &answer).unwrap();
                    }
                    Err(err) if err.is_timeout() => continue,
                    Err(_) => break,
                }
            }
        })
    };

    let senders: Vec<_> = (0..SENDERS)
        .map(|sender| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let payload = [sender * ROUNDS + round; 16];
                    let mut pkt = rtp_packet(round as u16, &payload);
                    let outcome = engine.send_leg(&mut pkt).unwrap();
                    assert!(outcome.substituted);
                    let expected: Vec<u8> = payload.iter().map(|b| !b).collect();
                    assert_eq!(&pkt[12..], &expected[..], "sender {} round {}", sender, round);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }
    stop.cancel();
    peer.join().unwrap();

    let stats = engine.stats();
    let total = u64::from(SENDERS) * u64::from(ROUNDS);
    assert_eq!(stats.captured, total);
    assert_eq!(stats.substituted, total);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(engine.timing().len() as u64, 2 * total);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_detach_cancels_blocked_send() {
    let bus = MemoryBus::new();
    bus.create(ChannelKey::INBOUND);
    let engine = Arc::new(ExchangeEngine::new(
        SpliceConfig {
            receive_timeout: Duration::from_secs(30),
            ..test_config("cancel")
        },
        &bus,
    ));

    let sender = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut pkt = rtp_packet(8, b"wait");
            let result = engine.send_leg(&mut pkt);
            (result, pkt)
        })
    };

    thread::sleep(Duration::from_millis(30));
    let start = Instant::now();
    engine.teardown();
    let (result, pkt) = sender.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        result,
        Err(Error::ErrExchangeCancelled) | Err(Error::ErrChannelRemoved)
    ));
    assert_eq!(&pkt[12..], b"wait");
    std::fs::remove_file(log_path("cancel")).unwrap();
}

#[test]
fn test_detach_tears_down_once() {
    let bus = MemoryBus::new();
    let outbound = bus.create(ChannelKey::OUTBOUND);
    let inbound = bus.create(ChannelKey::INBOUND);
    let mut splice = SpliceTransport::new(NoopTransport::new(), test_config("teardown"), &bus);
    let injector = splice.inner().injector();
    attach_collecting(&mut splice);

    injector.deliver_rtp(&rtp_packet(1, b"open"));
    inbound.publish(MessageClass::PAYLOAD, b"swap").unwrap();
    splice
        .send_rtp(BytesMut::from(&rtp_packet(2, b"orig")[..]))
        .unwrap();

    splice.detach().unwrap();
    assert!(outbound.is_removed());
    assert!(inbound.is_removed());
    assert!(!splice.inner().is_attached());
    assert!(splice.engine().timing().is_sealed());

    let lines = read_log(&log_path("teardown"));
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("capture "));
    assert!(lines[1].starts_with("substitute "));

    // detached packets no longer reach the consumer
    assert!(!injector.deliver_rtp(&rtp_packet(3, b"late")));

    // second detach is rejected and leaves the log alone
    assert_eq!(splice.detach(), Err(Error::ErrNotAttached));
    std::fs::write(log_path("teardown"), "kept").unwrap();
    splice.close().unwrap();
    assert_eq!(
        std::fs::read_to_string(log_path("teardown")).unwrap(),
        "kept"
    );
    std::fs::remove_file(log_path("teardown")).unwrap();
}

#[test]
fn test_inbound_kept_when_substitution_disabled() {
    let bus = MemoryBus::new();
    let outbound = bus.create(ChannelKey::OUTBOUND);
    let inbound = bus.create(ChannelKey::INBOUND);
    let mut splice = NoopTransport::new().with(
        SpliceBuilder::new()
            .with_config(test_config("no-substitute"))
            .with_substitute(false)
            .build(&bus),
    );
    assert!(!splice.engine().substitution());

    attach_collecting(&mut splice);
    splice.detach().unwrap();
    assert!(outbound.is_removed());
    assert!(!inbound.is_removed());
    std::fs::remove_file(log_path("no-substitute")).unwrap();
}

#[test]
fn test_close_propagates_to_owned_inner() {
    let bus = MemoryBus::new();
    let mut splice = SpliceTransport::new(NoopTransport::new(), test_config("close"), &bus);
    attach_collecting(&mut splice);

    splice.close().unwrap();
    assert!(!splice.is_attached());
    assert!(splice.inner().is_closed());
    assert!(splice.cancellation().is_cancelled());
    assert_eq!(
        splice.send_rtp(BytesMut::from(&rtp_packet(1, b"x")[..])),
        Err(Error::ErrTransportClosed)
    );
    // closing twice is harmless
    splice.close().unwrap();
    std::fs::remove_file(log_path("close")).unwrap();
}

#[test]
fn test_adapters_do_not_share_state() {
    let bus_a = MemoryBus::new();
    let bus_b = MemoryBus::new();
    bus_a.create(ChannelKey::INBOUND);
    bus_b.create(ChannelKey::INBOUND);

    let mut a = SpliceTransport::new(NoopTransport::new(), test_config("iso-a"), &bus_a);
    let b = SpliceTransport::new(NoopTransport::new(), test_config("iso-b"), &bus_b);
    let injector = a.inner().injector();
    attach_collecting(&mut a);

    injector.deliver_rtp(&rtp_packet(1, b"only"));
    assert!(a.gate().is_open());
    assert!(!b.gate().is_open());
}
