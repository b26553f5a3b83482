//! # Reader-Facing Binary Headers
//!
//! Every subbuffer begins with a [`BlockStartHeader`]: begin/end cycle
//! count + frequency pairs (so readers can interpolate timestamps across
//! frequency changes), the lost size filled in when the subbuffer is
//! sealed, and an embedded trace header copy that makes each subbuffer
//! self-describing.
//!
//! All fields are little-endian at fixed offsets; the layout constants are
//! pinned by `static_assertions` so the wire format cannot drift silently.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::codec::{COMPACT_EVENT_BITS, COMPACT_TSC_BITS, TSC_LSB_TRUNCATE, WORD_ALIGN};
use crate::storage::BufferPages;
use crate::trace::TraceInfo;

// ============================================================================
// LAYOUT CONSTANTS
// ============================================================================

/// Magic number opening every trace header
pub const TRACE_MAGIC: u32 = 0x00D6_B7ED;

/// Format major version
pub const TRACE_MAJOR: u8 = 2;

/// Format minor version
pub const TRACE_MINOR: u8 = 0;

/// Trace header length in bytes
pub const TRACE_HEADER_LEN: u64 = 56;

/// Block start header length in bytes; every subbuffer's first reservation
pub const SUBBUF_HEADER_LEN: u64 = 40 + TRACE_HEADER_LEN;

/// Sentinel stored in `lost_size` while the subbuffer is still open
pub const LOST_SIZE_OPEN: u32 = 0xFFFF_FFFF;

// The subbuffer header must keep every following slot word-aligned.
const_assert_eq!(SUBBUF_HEADER_LEN % WORD_ALIGN, 0);
const_assert_eq!(SUBBUF_HEADER_LEN, 96);

// Field offsets within the block start header
const OFF_BEGIN_TSC: u64 = 0;
const OFF_BEGIN_FREQ: u64 = 8;
const OFF_END_TSC: u64 = 16;
const OFF_END_FREQ: u64 = 24;
const OFF_LOST_SIZE: u64 = 32;
const OFF_BUF_SIZE: u64 = 36;
const OFF_TRACE: u64 = 40;

bitflags! {
    /// Trace header feature flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Channel is in overwrite (flight recorder) mode
        const FLIGHT = 1 << 0;
        /// Events carry truncated timestamps refreshed by heartbeats
        const HEARTBEAT = 1 << 1;
        /// Channel uses the packed 32-bit compact encoding
        const COMPACT = 1 << 2;
    }
}

// ============================================================================
// WRITERS
// ============================================================================

/// Stamp a fresh block start header at `base`.
///
/// Called exactly once per subbuffer, by whichever reservation first crosses
/// into it. `lost_size` is left at the open sentinel until the subbuffer is
/// sealed.
pub fn write_block_start(
    pages: &BufferPages,
    base: u64,
    tsc: u64,
    freq: u64,
    subbuf_size: u64,
    info: &TraceInfo,
    flags: HeaderFlags,
) {
    let base = base as usize;
    pages.write_u64(base + OFF_BEGIN_TSC as usize, tsc);
    pages.write_u64(base + OFF_BEGIN_FREQ as usize, freq);
    pages.write_u32(base + OFF_LOST_SIZE as usize, LOST_SIZE_OPEN);
    pages.write_u32(base + OFF_BUF_SIZE as usize, subbuf_size as u32);
    write_trace_header(pages, base as u64 + OFF_TRACE, info, flags);
}

/// Seal a subbuffer: record its end timestamp pair and the unused tail.
pub fn write_block_end(pages: &BufferPages, base: u64, tsc: u64, freq: u64, lost_size: u32) {
    let base = base as usize;
    pages.write_u32(base + OFF_LOST_SIZE as usize, lost_size);
    pages.write_u64(base + OFF_END_TSC as usize, tsc);
    pages.write_u64(base + OFF_END_FREQ as usize, freq);
}

fn write_trace_header(pages: &BufferPages, base: u64, info: &TraceInfo, flags: HeaderFlags) {
    let base = base as usize;
    pages.write_u32(base, TRACE_MAGIC);
    pages.write(
        base + 4,
        &[
            TRACE_MAJOR,
            TRACE_MINOR,
            WORD_ALIGN as u8,
            WORD_ALIGN as u8,
        ],
    );
    pages.write_u32(base + 8, flags.bits());
    pages.write(
        base + 12,
        &[
            TSC_LSB_TRUNCATE as u8,
            COMPACT_TSC_BITS as u8,
            COMPACT_EVENT_BITS as u8,
            0,
        ],
    );
    pages.write_u32(base + 16, info.freq_scale());
    pages.write_u32(base + 20, 0);
    pages.write_u64(base + 24, info.start_freq());
    pages.write_u64(base + 32, info.start_tsc());
    let (sec, nsec) = info.start_time();
    pages.write_u64(base + 40, sec);
    pages.write_u64(base + 48, nsec);
}

// ============================================================================
// READERS
// ============================================================================

/// Decoded block start header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStartHeader {
    /// Cycle count when the subbuffer was opened
    pub begin_tsc: u64,
    /// Counter frequency when the subbuffer was opened
    pub begin_freq: u64,
    /// Cycle count when the subbuffer was sealed
    pub end_tsc: u64,
    /// Counter frequency when the subbuffer was sealed
    pub end_freq: u64,
    /// Unused trailing bytes, or [`LOST_SIZE_OPEN`] while open
    pub lost_size: u32,
    /// Subbuffer size in bytes
    pub buf_size: u32,
    /// Embedded trace header
    pub trace: TraceHeader,
}

/// Decoded trace header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHeader {
    /// Magic number ([`TRACE_MAGIC`])
    pub magic: u32,
    /// Format major version
    pub major: u8,
    /// Format minor version
    pub minor: u8,
    /// Architecture word size in bytes
    pub word_bytes: u8,
    /// Event header alignment in bytes
    pub alignment: u8,
    /// Feature flags
    pub flags: HeaderFlags,
    /// Cycle counter bits dropped before compact truncation
    pub tsc_lsb_truncate: u8,
    /// Compact timestamp window width in bits
    pub tsc_bits: u8,
    /// Compact event id window width in bits
    pub compact_event_bits: u8,
    /// Frequency interpolation scale
    pub freq_scale: u32,
    /// Counter frequency at trace start
    pub start_freq: u64,
    /// Cycle count at trace start
    pub start_tsc: u64,
    /// Wall-clock seconds at trace start
    pub start_sec: u64,
    /// Wall-clock nanoseconds at trace start
    pub start_nsec: u64,
}

impl BlockStartHeader {
    /// Decode the block start header at `base`
    pub fn read_from(pages: &BufferPages, base: u64) -> Self {
        let b = base as usize;
        Self {
            begin_tsc: pages.read_u64(b + OFF_BEGIN_TSC as usize),
            begin_freq: pages.read_u64(b + OFF_BEGIN_FREQ as usize),
            end_tsc: pages.read_u64(b + OFF_END_TSC as usize),
            end_freq: pages.read_u64(b + OFF_END_FREQ as usize),
            lost_size: pages.read_u32(b + OFF_LOST_SIZE as usize),
            buf_size: pages.read_u32(b + OFF_BUF_SIZE as usize),
            trace: TraceHeader::read_from(pages, base + OFF_TRACE),
        }
    }
}

impl TraceHeader {
    /// Decode the trace header at `base`
    pub fn read_from(pages: &BufferPages, base: u64) -> Self {
        let b = base as usize;
        let mut versions = [0u8; 4];
        pages.read(b + 4, &mut versions);
        let mut tsc_cfg = [0u8; 4];
        pages.read(b + 12, &mut tsc_cfg);
        Self {
            magic: pages.read_u32(b),
            major: versions[0],
            minor: versions[1],
            word_bytes: versions[2],
            alignment: versions[3],
            flags: HeaderFlags::from_bits_truncate(pages.read_u32(b + 8)),
            tsc_lsb_truncate: tsc_cfg[0],
            tsc_bits: tsc_cfg[1],
            compact_event_bits: tsc_cfg[2],
            freq_scale: pages.read_u32(b + 16),
            start_freq: pages.read_u64(b + 24),
            start_tsc: pages.read_u64(b + 32),
            start_sec: pages.read_u64(b + 40),
            start_nsec: pages.read_u64(b + 48),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TickClock;
    use crate::types::TraceMode;

    #[test]
    fn test_block_header_round_trip() {
        let pages = BufferPages::zeroed(4096);
        let clock = TickClock::new(1_000_000);
        let info = TraceInfo::new("t0", TraceMode::Flight, true, &clock);

        let flags = HeaderFlags::FLIGHT | HeaderFlags::HEARTBEAT;
        write_block_start(&pages, 0, 77, 1_000_000, 4096, &info, flags);

        let open = BlockStartHeader::read_from(&pages, 0);
        assert_eq!(open.begin_tsc, 77);
        assert_eq!(open.lost_size, LOST_SIZE_OPEN);
        assert_eq!(open.buf_size, 4096);
        assert_eq!(open.trace.magic, TRACE_MAGIC);
        assert_eq!(open.trace.flags, flags);
        assert_eq!(open.trace.tsc_bits, COMPACT_TSC_BITS as u8);
        assert_eq!(open.trace.start_freq, 1_000_000);

        write_block_end(&pages, 0, 99, 1_000_000, 296);
        let sealed = BlockStartHeader::read_from(&pages, 0);
        assert_eq!(sealed.end_tsc, 99);
        assert_eq!(sealed.lost_size, 296);
        // Begin pair untouched by sealing
        assert_eq!(sealed.begin_tsc, 77);
    }
}
