//! Engine-level tests: the four control operations, the reservation
//! protocol under real thread concurrency, and the reader-facing binary
//! layout, all driven through the registry with the RAM backing store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use quill_core::codec::{slot_layout, unpack_compact, Encoding, EventHeader};
use quill_core::error::{ReadError, TraceError};
use quill_core::header::{BlockStartHeader, HeaderFlags, SUBBUF_HEADER_LEN, TRACE_MAGIC};
use quill_core::prelude::*;
use quill_transport::RamTransport;

fn make_registry(producers: u32) -> (Arc<TraceRegistry>, Arc<RamTransport>) {
    let registry = Arc::new(TraceRegistry::new(
        producers,
        Arc::new(TickClock::new(1_000_000)),
    ));
    let transport = Arc::new(RamTransport::new());
    registry.transports().register(transport.clone()).unwrap();
    (registry, transport)
}

fn cpu_sized(mode: TraceMode, subbuf_size: u64, n_subbufs: u64) -> TraceConfig {
    TraceConfig::new(mode).with_channel(ChannelRole::Cpu, subbuf_size, n_subbufs)
}

// Walk one sealed subbuffer and count the events in it.
fn count_events(pages: &BufferPages, geometry: Geometry, consumed: u64) -> usize {
    let base = geometry.buffer_offset(consumed);
    let header = BlockStartHeader::read_from(pages, base);
    assert_eq!(header.trace.magic, TRACE_MAGIC);
    let data_end = geometry.subbuf_size - header.lost_size as u64;

    let mut off = SUBBUF_HEADER_LEN;
    let mut count = 0;
    while off < data_end {
        let mut raw = [0u8; 8];
        pages.read((base + off) as usize, &mut raw);
        let event = EventHeader::decode(Encoding::Heartbeat, &raw);
        count += 1;
        off += slot_layout(Encoding::Heartbeat, event.size as u64).total_size;
    }
    count
}

// ----------------------------------------------------------------------
// Control plane
// ----------------------------------------------------------------------

#[test]
fn test_create_twice_fails_with_already_exists() {
    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4))
        .unwrap();
    assert_eq!(
        registry.create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4)),
        Err(TraceError::AlreadyExists)
    );
}

#[test]
fn test_destroy_releases_backing_storage() {
    let (registry, transport) = make_registry(1);
    registry
        .create("t1", "ram", TraceConfig::new(TraceMode::Normal))
        .unwrap();
    assert_eq!(transport.channel_count(), ChannelRole::ALL.len());

    registry.destroy("t1").unwrap();
    assert_eq!(transport.channel_count(), 0);
}

#[test]
fn test_flight_channels_carry_prefix_and_flags() {
    let (registry, transport) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4))
        .unwrap();

    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);
    assert_eq!(cpu.name(), "flight-cpu");

    // The block header of subbuffer 0 is stamped at creation and
    // self-describes the channel.
    let pages = transport
        .pages("t1", "flight-cpu", ProducerId::new(0))
        .unwrap();
    let header = BlockStartHeader::read_from(&pages, 0);
    assert_eq!(header.trace.magic, TRACE_MAGIC);
    assert!(header.trace.flags.contains(HeaderFlags::FLIGHT));
    assert!(header.trace.flags.contains(HeaderFlags::HEARTBEAT));

    let compact_pages = transport
        .pages("t1", "flight-compact", ProducerId::new(0))
        .unwrap();
    let compact_header = BlockStartHeader::read_from(&compact_pages, 0);
    assert!(compact_header.trace.flags.contains(HeaderFlags::COMPACT));
}

// ----------------------------------------------------------------------
// Reservation semantics through the full stack
// ----------------------------------------------------------------------

#[test]
fn test_flight_crossing_records_lost_size_and_never_fails() {
    let (registry, transport) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);

    // Fill subbuffer 0 to offset 3800, then force a crossing.
    cpu.log_event(producer, EventId::new(1), &[7u8; 3696]).unwrap();
    cpu.log_event(producer, EventId::new(2), &[9u8; 500]).unwrap();

    let pages = transport
        .pages("t1", "flight-cpu", producer)
        .unwrap();
    let sealed = BlockStartHeader::read_from(&pages, 0);
    assert_eq!(sealed.lost_size, 296);
    assert_eq!(cpu.buffer(producer).unwrap().events_lost(), 0);
}

#[test]
fn test_normal_mode_full_channel_returns_no_space() {
    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Normal, 4096, 2))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);

    cpu.log_event(producer, EventId::new(1), &[0u8; 3696]).unwrap();
    cpu.log_event(producer, EventId::new(1), &[0u8; 500]).unwrap();
    cpu.log_event(producer, EventId::new(1), &[0u8; 3376]).unwrap();

    // Nothing consumed: the next crossing has nowhere to go.
    assert_eq!(
        cpu.log_event(producer, EventId::new(1), &[0u8; 500]),
        Err(TraceError::NoSpace)
    );
    assert_eq!(cpu.buffer(producer).unwrap().events_lost(), 1);
}

#[test]
fn test_oversized_payload_is_invalid_configuration() {
    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", TraceConfig::new(TraceMode::Normal))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);
    assert_eq!(
        cpu.reserve(producer, 0x1_0000),
        Err(TraceError::InvalidConfiguration)
    );
}

#[test]
fn test_compact_channel_packs_single_words() {
    let (registry, transport) = make_registry(1);
    registry
        .create("t1", "ram", TraceConfig::new(TraceMode::Normal))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let compact = trace.channel(ChannelRole::Compact);

    // Payloads are rejected; packed data rides in the header word.
    assert_eq!(
        compact.reserve(producer, 8),
        Err(TraceError::InvalidConfiguration)
    );
    compact.log_compact(producer, EventId::new(5), 0x15).unwrap();

    let pages = transport.pages("t1", "compact", producer).unwrap();
    let word = pages.read_u32(SUBBUF_HEADER_LEN as usize);
    let (data, id, _tsc) = unpack_compact(word);
    assert_eq!(data, 0x15);
    assert_eq!(id, 5);
}

// ----------------------------------------------------------------------
// Wakeup scheduling
// ----------------------------------------------------------------------

#[test]
fn test_wakeup_tick_reaches_transport() {
    let (registry, transport) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);

    cpu.log_event(producer, EventId::new(1), &[0u8; 3696]).unwrap();
    cpu.log_event(producer, EventId::new(1), &[0u8; 500]).unwrap();

    assert_eq!(transport.wakeup_count("t1", "flight-cpu"), 0);
    registry.wakeup_tick();
    assert_eq!(transport.wakeup_count("t1", "flight-cpu"), 1);
    registry.wakeup_tick();
    assert_eq!(transport.wakeup_count("t1", "flight-cpu"), 1);
}

// ----------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------

#[test]
fn test_stop_blocks_until_in_flight_commit_completes() {
    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Flight, 4096, 4))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let committed = Arc::new(AtomicBool::new(false));
    let (reserved_tx, reserved_rx) = mpsc::channel();

    let writer = {
        let registry = registry.clone();
        let committed = committed.clone();
        thread::spawn(move || {
            let trace = registry.get("t1").unwrap();
            let cpu = trace.channel(ChannelRole::Cpu);
            let slot = cpu.reserve(producer, 64).unwrap();
            reserved_tx.send(()).unwrap();
            // Hold the reservation open while stop is being requested.
            thread::sleep(Duration::from_millis(50));
            committed.store(true, Ordering::SeqCst);
            cpu.commit(producer, slot);
        })
    };

    reserved_rx.recv().unwrap();
    // Stop must wait for the in-flight reserve/commit pair.
    registry.stop("t1").unwrap();
    assert!(committed.load(Ordering::SeqCst));
    writer.join().unwrap();
}

#[test]
fn test_commit_completeness_under_concurrent_producers() {
    const THREADS: u32 = 4;
    const EVENTS: usize = 300;
    const PAYLOAD: usize = 24;

    let (registry, _) = make_registry(THREADS);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Normal, 1024, 8))
        .unwrap();
    registry.start("t1").unwrap();

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let producer = registry.register_producer().unwrap();
        let registry = registry.clone();
        workers.push(thread::spawn(move || {
            let trace = registry.get("t1").unwrap();
            let cpu = trace.channel(ChannelRole::Cpu);
            let mut logged = 0usize;
            for i in 0..EVENTS {
                let payload = [i as u8; PAYLOAD];
                match cpu.log_event(producer, EventId::new(1), &payload) {
                    Ok(()) => logged += 1,
                    Err(TraceError::NoSpace) => {},
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            (producer, logged)
        }));
    }

    let results: Vec<(ProducerId, usize)> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();

    // Flushes every buffer after quiescing.
    registry.stop("t1").unwrap();

    // Every committed event is present in the drained stream exactly once:
    // the sum of decoded events equals the successful log count, and lost
    // events are accounted separately.
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);
    for (producer, logged) in results {
        let buffer = cpu.buffer(producer).unwrap();
        let mut decoded = 0usize;
        loop {
            match buffer.consumer_get() {
                Ok(consumed) => {
                    decoded += count_events(buffer.pages(), buffer.geometry(), consumed);
                    buffer.consumer_put(consumed).unwrap();
                },
                Err(ReadError::NotReady) => break,
                Err(other) => panic!("unexpected read error: {other}"),
            }
        }
        assert_eq!(decoded, logged);
        // Every attempt either landed or was counted lost.
        assert_eq!(buffer.events_lost() as usize + logged, EVENTS);
    }
}

#[test]
fn test_no_over_reservation_with_shared_producer_slot() {
    // Two threads share one producer slot: the compare-exchange claim loop
    // must keep slots disjoint and the capacity invariant intact even
    // without the one-writer-per-slot convention.
    const THREADS: usize = 2;
    const EVENTS: usize = 500;

    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", cpu_sized(TraceMode::Normal, 1024, 4))
        .unwrap();
    registry.start("t1").unwrap();

    let producer = registry.register_producer().unwrap();
    let max_outstanding = Arc::new(AtomicU64::new(0));

    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let registry = registry.clone();
        let max_outstanding = max_outstanding.clone();
        workers.push(thread::spawn(move || {
            let trace = registry.get("t1").unwrap();
            let cpu = trace.channel(ChannelRole::Cpu);
            let buffer = cpu.buffer(producer).unwrap();
            let mut logged = 0usize;
            for i in 0..EVENTS {
                let payload = [i as u8; 16];
                if cpu.log_event(producer, EventId::new(1), &payload).is_ok() {
                    logged += 1;
                }
                let outstanding = buffer.write_offset() - buffer.consumed();
                max_outstanding.fetch_max(outstanding, Ordering::Relaxed);
            }
            logged
        }));
    }
    let logged_total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

    let trace = registry.get("t1").unwrap();
    let buffer = trace.channel(ChannelRole::Cpu).buffer(producer).unwrap();
    let capacity = buffer.geometry().buf_size();
    assert!(max_outstanding.load(Ordering::Relaxed) <= capacity);
    assert_eq!(buffer.in_flight(), 0);

    // Every committed slot decodes exactly once after the stop-time flush.
    registry.stop("t1").unwrap();
    let mut decoded = 0usize;
    while let Ok(consumed) = buffer.consumer_get() {
        decoded += count_events(buffer.pages(), buffer.geometry(), consumed);
        buffer.consumer_put(consumed).unwrap();
    }
    assert_eq!(decoded, logged_total);

    registry.destroy("t1").unwrap();
}

// ----------------------------------------------------------------------
// Filter hook
// ----------------------------------------------------------------------

#[test]
fn test_filter_gate_consulted_before_reserve() {
    let (registry, _) = make_registry(1);
    registry
        .create("t1", "ram", TraceConfig::new(TraceMode::Normal))
        .unwrap();
    registry.start("t1").unwrap();
    registry.filter().set_policy("t1", false);

    let producer = registry.register_producer().unwrap();
    let trace = registry.get("t1").unwrap();
    let cpu = trace.channel(ChannelRole::Cpu);
    let before = cpu.buffer(producer).unwrap().write_offset();

    // The probe layer checks the policy first and skips the reservation.
    if registry.filter().should_trace("t1") {
        cpu.log_event(producer, EventId::new(1), &[0u8; 8]).unwrap();
    }
    assert_eq!(cpu.buffer(producer).unwrap().write_offset(), before);
}
