//! # Per-Producer Ring Buffer
//!
//! One ring of power-of-two subbuffers for one producer context, owning the
//! lock-free reservation/commit protocol.
//!
//! ## Protocol
//!
//! A reservation computes its slot size, then claims `[old, end)` by a
//! compare-exchange retry loop on the monotonic `write_offset`. A claim that
//! would cross a subbuffer boundary never splits the event: it seals the old
//! subbuffer (recording the unused tail as lost size), restarts at the next
//! boundary behind a fresh block header, and in non-overwrite mode fails
//! with a drop-and-count outcome when the ring has no consumed room left.
//!
//! Commits are an independent free-running counter per subbuffer: each
//! commit adds its slot size, and the subbuffer becomes reader-eligible
//! exactly when the counter reaches subbuffer-size parity. Commit order
//! therefore never has to match reservation order, which is what makes
//! nested/interrupting reservations on the same context safe.
//!
//! Reservation and commit never block and never take a lock.

mod consumer;

pub use consumer::Poll;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::codec::{slot_layout, Encoding, EventHeader};
use crate::header::{write_block_end, write_block_start, HeaderFlags, SUBBUF_HEADER_LEN};
use crate::storage::BufferPages;
use crate::time::CycleClock;
use crate::trace::TraceInfo;
use crate::types::{EventId, Geometry};

// ============================================================================
// RESERVATION OUTCOME
// ============================================================================

/// Why a reservation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveFail {
    /// Non-overwrite ring full: event dropped and counted
    Full,
    /// Event larger than an empty subbuffer: dropped and counted
    TooBig,
}

/// A successfully reserved slot.
///
/// The region `[begin, end)` belongs exclusively to the reserving producer
/// until the matching [`ProducerBuffer::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Monotonic offset of the slot start
    pub begin: u64,
    /// Monotonic offset one past the slot end
    pub end: u64,
    /// Total slot size (header + payload + padding)
    pub size: u64,
    /// Event header length at the slot start
    pub header_len: u64,
    /// Cycle counter sampled at reservation
    pub tsc: u64,
}

/// Forced-switch flavor: `Active` opens a fresh subbuffer for continued
/// tracing, `Flush` only seals the current one (final drain on stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceSwitch {
    /// Switch and keep tracing into a new subbuffer
    Active,
    /// Seal without opening a new subbuffer
    Flush,
}

// Working set of one reservation attempt, recomputed on every retry.
#[derive(Debug, Default, Clone, Copy)]
struct SwitchOffsets {
    begin: u64,
    end: u64,
    old: u64,
    begin_switch: bool,
    end_switch_current: bool,
    end_switch_old: bool,
    reserve_commit_diff: u64,
    size: u64,
    header_len: u64,
    tsc: u64,
}

// ============================================================================
// PRODUCER BUFFER
// ============================================================================

/// One producer context's ring buffer
pub struct ProducerBuffer {
    geometry: Geometry,
    encoding: Encoding,
    overwrite: bool,
    flags: HeaderFlags,
    info: Arc<TraceInfo>,
    clock: Arc<dyn CycleClock>,
    pages: Arc<BufferPages>,

    /// Monotonic byte count ever reserved
    write_offset: AtomicU64,
    /// Monotonic byte count released to the reader
    consumed: AtomicU64,
    /// Free-running committed byte count, one per subbuffer
    commit_count: Box<[AtomicU64]>,
    events_lost: AtomicU32,
    corrupted_subbuffers: AtomicU32,
    active_readers: AtomicU32,
    /// Reserve/commit pairs currently in flight (stop quiescence)
    active_writers: AtomicU32,
    wakeup_readers: AtomicBool,
    finalized: AtomicBool,
    /// Serializes consumer put operations
    put_lock: Mutex<()>,
}

impl ProducerBuffer {
    /// Create a buffer over `pages` and stamp the first block header.
    ///
    /// `pages` must span exactly `geometry.buf_size()` bytes.
    pub fn new(
        geometry: Geometry,
        encoding: Encoding,
        overwrite: bool,
        flags: HeaderFlags,
        info: Arc<TraceInfo>,
        clock: Arc<dyn CycleClock>,
        pages: Arc<BufferPages>,
    ) -> Self {
        debug_assert_eq!(pages.len() as u64, geometry.buf_size());

        let commit_count: Box<[AtomicU64]> = (0..geometry.n_subbufs)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let buf = Self {
            geometry,
            encoding,
            overwrite,
            flags,
            info,
            clock,
            pages,
            write_offset: AtomicU64::new(SUBBUF_HEADER_LEN),
            consumed: AtomicU64::new(0),
            commit_count,
            events_lost: AtomicU32::new(0),
            corrupted_subbuffers: AtomicU32::new(0),
            active_readers: AtomicU32::new(0),
            active_writers: AtomicU32::new(0),
            wakeup_readers: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            put_lock: Mutex::new(()),
        };

        // The first subbuffer opens at creation time with the trace start
        // timestamp; its header bytes count as committed from the start so
        // commit parity stays exact.
        write_block_start(
            &buf.pages,
            0,
            buf.info.start_tsc(),
            buf.info.start_freq(),
            geometry.subbuf_size,
            &buf.info,
            buf.flags,
        );
        buf.commit_count[0].store(SUBBUF_HEADER_LEN, Ordering::Relaxed);

        buf
    }

    // ------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------

    /// Reserve a slot for `payload_len` bytes of event payload.
    ///
    /// Lock-free and reentrant-safe: callable from contexts where blocking
    /// is illegal. On failure the event is already counted as lost.
    pub fn reserve(&self, payload_len: u64) -> Result<Slot, ReserveFail> {
        self.active_writers.fetch_add(1, Ordering::AcqRel);

        let mut offsets = SwitchOffsets::default();
        loop {
            if let Err(fail) = self.try_reserve(&mut offsets, payload_len) {
                self.events_lost.fetch_add(1, Ordering::Relaxed);
                self.active_writers.fetch_sub(1, Ordering::Release);
                return Err(fail);
            }
            // Another reservation from this context may have interleaved
            // (nested logging): retry against the fresh offset.
            if self
                .write_offset
                .compare_exchange(
                    offsets.old,
                    offsets.end,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        self.push_reader(&offsets);

        if offsets.end_switch_old {
            self.switch_old_subbuf(&offsets);
        }
        if offsets.begin_switch {
            self.switch_new_subbuf(&offsets);
        }
        if offsets.end_switch_current {
            self.end_switch_current(&offsets);
        }

        Ok(Slot {
            begin: offsets.begin,
            end: offsets.end,
            size: offsets.size,
            header_len: offsets.header_len,
            tsc: offsets.tsc,
        })
    }

    // Compute the next consistent reservation. Returns Err when execution
    // must be aborted (ring full or event unfittable).
    fn try_reserve(&self, o: &mut SwitchOffsets, payload_len: u64) -> Result<(), ReserveFail> {
        let geo = &self.geometry;

        o.begin = self.write_offset.load(Ordering::Acquire);
        o.old = o.begin;
        o.begin_switch = false;
        o.end_switch_current = false;
        o.end_switch_old = false;
        o.reserve_commit_diff = 0;

        if geo.subbuf_offset(o.begin) == 0 {
            // True first reservation into a fresh subbuffer.
            o.begin_switch = true;
        } else {
            let layout = slot_layout(self.encoding, payload_len);
            o.size = layout.total_size;
            o.header_len = layout.header_len;
            if geo.subbuf_offset(o.begin) + o.size > geo.subbuf_size {
                // Never split an event across subbuffers.
                o.end_switch_old = true;
                o.begin_switch = true;
            }
        }

        if o.begin_switch {
            if o.end_switch_old {
                o.begin = geo.subbuf_align(o.begin);
            }
            o.begin += SUBBUF_HEADER_LEN;

            // Parity probe of the subbuffer we are about to enter: nonzero
            // means a writer died between reserve and commit and the
            // subbuffer is corrupted.
            let committed = self.commit_count[geo.subbuf_index(o.begin)].load(Ordering::Acquire);
            o.reserve_commit_diff = geo.subbuf_offset(geo.subbuf_size.wrapping_sub(committed));

            if o.reserve_commit_diff == 0 {
                let consumed = self.consumed.load(Ordering::Acquire);
                if !self.overwrite
                    && geo.subbuf_trunc(o.begin) - geo.subbuf_trunc(consumed) >= geo.buf_size()
                {
                    // Full and not allowed to recycle: event is lost.
                    return Err(ReserveFail::Full);
                }
            }
            // Nonzero diff: next subbuffer corrupted. The reader is pushed
            // across it even in non-overwrite mode; writing is safe.

            let layout = slot_layout(self.encoding, payload_len);
            o.size = layout.total_size;
            o.header_len = layout.header_len;
            if geo.subbuf_offset(o.begin) + o.size > geo.subbuf_size {
                // Event cannot fit even an empty subbuffer; do not complete
                // the switch.
                return Err(ReserveFail::TooBig);
            }
        }

        o.end = o.begin + o.size;
        if geo.subbuf_offset(o.end) == 0 {
            // The slot ends flush on a boundary: this reservation also
            // seals the subbuffer it filled.
            o.end_switch_current = true;
        }

        o.tsc = self.clock.cycles();
        Ok(())
    }

    // In overwrite mode, push the reader's consumed count out of the
    // subbuffer the writer is entering. Many writers may race here; the one
    // at the farthest write position wins the loop.
    fn push_reader(&self, o: &SwitchOffsets) {
        let geo = &self.geometry;
        loop {
            let consumed_old = self.consumed.load(Ordering::Acquire);
            if geo.subbuf_trunc(o.end - 1) - geo.subbuf_trunc(consumed_old) < geo.buf_size() {
                return;
            }
            let consumed_new = geo.subbuf_align(consumed_old);
            if self
                .consumed
                .compare_exchange(
                    consumed_old,
                    consumed_new,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // We won the push. If the entered subbuffer had a
                // reserve/commit imbalance it is corrupted: re-equilibrate
                // the commit count so parity tracking survives, and count
                // it. It will never be delivered.
                if o.reserve_commit_diff != 0 {
                    self.commit_count[geo.subbuf_index(o.begin)]
                        .fetch_add(o.reserve_commit_diff, Ordering::AcqRel);
                    self.corrupted_subbuffers.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }
    }

    // Seal the subbuffer that `o.old` points into. Only the thread that won
    // the boundary-crossing CAS reaches this for a given subbuffer
    // generation, so the header writes are unshared.
    fn switch_old_subbuf(&self, o: &SwitchOffsets) {
        let geo = &self.geometry;
        let idx = geo.subbuf_index(o.old - 1);
        let base = geo.buffer_offset(geo.subbuf_trunc(o.old - 1));
        let lost = geo.subbuf_offset(geo.subbuf_size - geo.subbuf_offset(o.old));

        write_block_end(&self.pages, base, o.tsc, self.clock.frequency(), lost as u32);

        // Count the padding as committed; header bytes must be visible
        // before the parity check can deliver.
        let padding = geo.subbuf_size - (geo.subbuf_offset(o.old - 1) + 1);
        let committed = self.commit_count[idx].fetch_add(padding, Ordering::AcqRel) + padding;
        if geo.subbuf_offset(committed) == 0 {
            self.deliver();
        }
    }

    // Stamp the block header of the subbuffer `o.begin` opens. Writers may
    // already be writing payloads further in; the commit counter ensures
    // delivery waits for this header.
    fn switch_new_subbuf(&self, o: &SwitchOffsets) {
        let geo = &self.geometry;
        let idx = geo.subbuf_index(o.begin);
        let base = geo.buffer_offset(geo.subbuf_trunc(o.begin));

        write_block_start(
            &self.pages,
            base,
            o.tsc,
            self.clock.frequency(),
            geo.subbuf_size,
            &self.info,
            self.flags,
        );

        let committed =
            self.commit_count[idx].fetch_add(SUBBUF_HEADER_LEN, Ordering::AcqRel) + SUBBUF_HEADER_LEN;
        if geo.subbuf_offset(committed) == 0 {
            self.deliver();
        }
    }

    // The reservation ended exactly on a boundary: seal the subbuffer it
    // filled with zero lost bytes.
    fn end_switch_current(&self, o: &SwitchOffsets) {
        let geo = &self.geometry;
        let idx = geo.subbuf_index(o.end - 1);
        let base = geo.buffer_offset(geo.subbuf_trunc(o.end - 1));
        let lost = geo.subbuf_offset(geo.subbuf_size - geo.subbuf_offset(o.end));

        write_block_end(&self.pages, base, o.tsc, self.clock.frequency(), lost as u32);

        let padding = geo.subbuf_size - (geo.subbuf_offset(o.end - 1) + 1);
        let committed = self.commit_count[idx].fetch_add(padding, Ordering::AcqRel) + padding;
        if geo.subbuf_offset(committed) == 0 {
            self.deliver();
        }
    }

    fn deliver(&self) {
        // Delivery is asynchronous: commit may run where blocking work is
        // illegal, so only a flag is raised here and the periodic scheduler
        // does the reader wakeup.
        self.wakeup_readers.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Commit a reserved slot.
    ///
    /// Unordered relative to other commits: only the running totals matter.
    /// The subbuffer is delivered when every reservation targeting it has
    /// committed.
    pub fn commit(&self, slot: Slot) {
        let geo = &self.geometry;
        let idx = geo.subbuf_index(slot.end - 1);

        // Release: slot data must be visible before the commit count is.
        let committed = self.commit_count[idx].fetch_add(slot.size, Ordering::AcqRel) + slot.size;
        if geo.subbuf_offset(committed) == 0 {
            self.deliver();
        }

        self.active_writers.fetch_sub(1, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Slot I/O
    // ------------------------------------------------------------------

    /// Encode the event header at the start of a reserved slot
    pub fn write_event_header(&self, slot: &Slot, id: EventId, payload_len: u16) {
        let mut raw = [0u8; 12];
        let header = EventHeader {
            tsc: slot.tsc,
            id,
            size: payload_len,
        };
        let len = header.encode(self.encoding, &mut raw);
        self.pages
            .write(self.geometry.buffer_offset(slot.begin) as usize, &raw[..len]);
    }

    /// Write a packed compact event word into a reserved slot
    pub fn write_compact(&self, slot: &Slot, word: u32) {
        self.pages.write_u32(
            self.geometry.buffer_offset(slot.begin) as usize,
            word,
        );
    }

    /// Write the payload bytes following the slot's event header
    pub fn write_payload(&self, slot: &Slot, payload: &[u8]) {
        debug_assert!(slot.header_len + payload.len() as u64 <= slot.size);
        let pos = self.geometry.buffer_offset(slot.begin) + slot.header_len;
        self.pages.write(pos as usize, payload);
    }

    // ------------------------------------------------------------------
    // Forced switch
    // ------------------------------------------------------------------

    /// Force a subbuffer switch.
    ///
    /// Completely reentrant: callable while tracing is active with no lock
    /// held. `Flush` seals the current subbuffer so partially-filled data
    /// reaches readers; `Active` additionally opens a fresh one.
    pub fn force_switch(&self, mode: ForceSwitch) {
        let mut offsets = SwitchOffsets::default();
        loop {
            if self.try_switch(mode, &mut offsets).is_none() {
                return;
            }
            if self
                .write_offset
                .compare_exchange(
                    offsets.old,
                    offsets.end,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        if mode == ForceSwitch::Active {
            self.push_reader(&offsets);
        }

        if offsets.end_switch_old {
            self.switch_old_subbuf(&offsets);
        }
        if mode == ForceSwitch::Active {
            self.switch_new_subbuf(&offsets);
        }
    }

    fn try_switch(&self, mode: ForceSwitch, o: &mut SwitchOffsets) -> Option<()> {
        let geo = &self.geometry;

        o.begin = self.write_offset.load(Ordering::Acquire);
        o.old = o.begin;
        o.end_switch_old = false;
        o.reserve_commit_diff = 0;
        o.size = 0;

        if geo.subbuf_offset(o.begin) == 0 {
            // Current subbuffer is empty: nothing to switch.
            return None;
        }
        o.begin = geo.subbuf_align(o.begin);
        o.end_switch_old = true;

        if mode == ForceSwitch::Active {
            o.begin += SUBBUF_HEADER_LEN;
            let committed = self.commit_count[geo.subbuf_index(o.begin)].load(Ordering::Acquire);
            o.reserve_commit_diff = geo.subbuf_offset(geo.subbuf_size.wrapping_sub(committed));
            if o.reserve_commit_diff == 0 {
                let consumed = self.consumed.load(Ordering::Acquire);
                if !self.overwrite && o.begin - consumed >= geo.buf_size() {
                    // Full and non-overwrite: ignore the switch.
                    return None;
                }
            }
        }

        o.end = o.begin;
        o.tsc = self.clock.cycles();
        Some(())
    }

    /// Finalize the buffer and flush its open subbuffer (stop-time drain)
    pub fn flush(&self) {
        self.finalized.store(true, Ordering::Release);
        self.force_switch(ForceSwitch::Flush);
    }

    // ------------------------------------------------------------------
    // Counters & state
    // ------------------------------------------------------------------

    /// Buffer geometry
    #[inline(always)]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Event header encoding
    #[inline(always)]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Backing storage
    #[inline(always)]
    pub fn pages(&self) -> &Arc<BufferPages> {
        &self.pages
    }

    /// Events dropped because the ring was full or the event unfittable
    pub fn events_lost(&self) -> u32 {
        self.events_lost.load(Ordering::Relaxed)
    }

    /// Subbuffers skipped because a reservation never committed
    pub fn corrupted_subbuffers(&self) -> u32 {
        self.corrupted_subbuffers.load(Ordering::Relaxed)
    }

    /// Monotonic reserved byte count
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Monotonic consumed byte count
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Reserve/commit pairs currently in flight
    pub fn in_flight(&self) -> u32 {
        self.active_writers.load(Ordering::Acquire)
    }

    /// Whether the buffer has been finalized by a flush
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Consume the pending reader-wakeup flag
    pub fn take_wakeup(&self) -> bool {
        self.wakeup_readers.swap(false, Ordering::AcqRel)
    }

    /// Log teardown diagnostics for unread or damaged data.
    ///
    /// Lost data is countable and acceptable; it is reported, never raised.
    pub fn log_pending_errors(&self, trace: &str, channel: &str, slot: usize) {
        let lost = self.events_lost();
        if lost != 0 {
            log::warn!(
                "{trace}/{channel}: {lost} events lost in producer buffer {slot}"
            );
        }
        let corrupted = self.corrupted_subbuffers();
        if corrupted != 0 {
            log::warn!(
                "{trace}/{channel}: {corrupted} corrupted subbuffers in producer buffer {slot}"
            );
        }

        let geo = &self.geometry;
        let produced = geo.subbuf_trunc(self.write_offset.load(Ordering::Acquire));
        let mut cons_off = self.consumed.load(Ordering::Acquire);
        if produced > geo.subbuf_trunc(cons_off) {
            log::warn!(
                "{trace}/{channel}: unread data in producer buffer {slot} \
                 (write {produced}, consumed {cons_off})"
            );
            while produced.saturating_sub(cons_off) > 0 {
                let idx = geo.subbuf_index(cons_off);
                let committed = self.commit_count[idx].load(Ordering::Acquire);
                if geo.subbuf_offset(committed) != 0 {
                    log::error!(
                        "{trace}/{channel}: subbuffer {idx} has non-zero commit parity \
                         ({committed} committed, subbuf size {})",
                        geo.subbuf_size
                    );
                }
                cons_off = geo.subbuf_align(cons_off);
            }
        }
    }
}
