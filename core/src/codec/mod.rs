//! # Event Header Codec
//!
//! Encodes and decodes the per-event header in one of three binary layouts.
//! The layout is a per-channel property fixed at trace creation and recorded
//! in the trace header, so readers self-describe the format:
//!
//! - [`Encoding::Compact`]: a single packed 32-bit word
//!   `data:(32-E-T) | event_id:E | tsc:T`. No payload length field; the
//!   payload is carried in the data bits themselves.
//! - [`Encoding::Heartbeat`]: `{ timestamp: u32, event_id: u16,
//!   event_size: u16 }`, 8 bytes packed. The timestamp is the low 32 bits of
//!   the cycle counter; full 64-bit time is reconstructed from the nearest
//!   preceding subbuffer header or heartbeat event.
//! - [`Encoding::Full`]: same fields with a full 64-bit timestamp, 12 bytes
//!   packed.
//!
//! Non-compact slots are padded out to the word boundary so that every
//! header lands word-aligned; the compact channel packs 4-byte slots with no
//! padding at all.

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

use crate::types::EventId;

// ============================================================================
// PROCESS-WIDE ENCODING CONSTANTS
// ============================================================================

/// Alignment of non-compact event headers (pointer size)
pub const WORD_ALIGN: u64 = 8;

/// Bits of the compact word holding the event id
pub const COMPACT_EVENT_BITS: u32 = 6;

/// Bits of the compact word holding the truncated cycle counter
pub const COMPACT_TSC_BITS: u32 = 20;

/// Bits of the compact word left for event data
pub const COMPACT_DATA_BITS: u32 = 32 - COMPACT_EVENT_BITS - COMPACT_TSC_BITS;

/// Cycle counter bits dropped before truncation to [`COMPACT_TSC_BITS`]
pub const TSC_LSB_TRUNCATE: u32 = 4;

/// Maximum encodable payload length
pub const MAX_EVENT_SIZE: u64 = 0xFFFF;

const_assert!(COMPACT_EVENT_BITS + COMPACT_TSC_BITS < 32);
const_assert_eq!(COMPACT_DATA_BITS, 6);

// ============================================================================
// ENCODING
// ============================================================================

/// Per-channel event header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Packed 32-bit header, no payload
    Compact,
    /// 32-bit truncated timestamp + id + size
    Heartbeat,
    /// 64-bit timestamp + id + size
    Full,
}

impl Encoding {
    /// Header length in bytes
    #[inline(always)]
    pub const fn header_len(&self) -> u64 {
        match self {
            Self::Compact => 4,
            Self::Heartbeat => 8,
            Self::Full => 12,
        }
    }

    /// Whether events of this encoding carry truncated timestamps that
    /// need heartbeat resynchronization
    #[inline(always)]
    pub const fn needs_heartbeat(&self) -> bool {
        matches!(self, Self::Compact | Self::Heartbeat)
    }
}

// ============================================================================
// SLOT LAYOUT
// ============================================================================

/// Computed size of one reserved slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Bytes of event header at the start of the slot
    pub header_len: u64,
    /// Total slot size: header + payload + trailing alignment padding
    pub total_size: u64,
}

/// Compute the slot layout for a payload of `payload_len` bytes.
///
/// Non-compact slots are padded to [`WORD_ALIGN`]; since the subbuffer
/// header length is also word-aligned, every slot start stays aligned
/// without per-slot leading padding. Compact slots are exactly one word of
/// four bytes.
#[inline]
pub const fn slot_layout(encoding: Encoding, payload_len: u64) -> SlotLayout {
    let header_len = encoding.header_len();
    let total_size = match encoding {
        Encoding::Compact => header_len,
        _ => (header_len + payload_len + WORD_ALIGN - 1) & !(WORD_ALIGN - 1),
    };
    SlotLayout {
        header_len,
        total_size,
    }
}

// ============================================================================
// EVENT HEADER
// ============================================================================

/// Decoded per-event header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Cycle counter at reservation (truncated per the encoding on the wire)
    pub tsc: u64,
    /// Event identifier
    pub id: EventId,
    /// Payload length in bytes (zero for compact events)
    pub size: u16,
}

impl EventHeader {
    /// Encode into `out`, which must hold at least `encoding.header_len()`
    /// bytes. Returns the number of bytes written.
    pub fn encode(&self, encoding: Encoding, out: &mut [u8]) -> usize {
        match encoding {
            Encoding::Compact => {
                let word = pack_compact(self.id, self.tsc, 0);
                out[..4].copy_from_slice(&word.to_le_bytes());
                4
            },
            Encoding::Heartbeat => {
                out[..4].copy_from_slice(&(self.tsc as u32).to_le_bytes());
                out[4..6].copy_from_slice(&self.id.raw().to_le_bytes());
                out[6..8].copy_from_slice(&self.size.to_le_bytes());
                8
            },
            Encoding::Full => {
                out[..8].copy_from_slice(&self.tsc.to_le_bytes());
                out[8..10].copy_from_slice(&self.id.raw().to_le_bytes());
                out[10..12].copy_from_slice(&self.size.to_le_bytes());
                12
            },
        }
    }

    /// Decode from `raw`, which must hold at least `encoding.header_len()`
    /// bytes. Timestamps come back truncated exactly as stored on the wire.
    pub fn decode(encoding: Encoding, raw: &[u8]) -> Self {
        match encoding {
            Encoding::Compact => {
                let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let (_, id, tsc) = unpack_compact(word);
                Self {
                    tsc: tsc as u64,
                    id: EventId::new(id),
                    size: 0,
                }
            },
            Encoding::Heartbeat => Self {
                tsc: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64,
                id: EventId::new(u16::from_le_bytes([raw[4], raw[5]])),
                size: u16::from_le_bytes([raw[6], raw[7]]),
            },
            Encoding::Full => Self {
                tsc: u64::from_le_bytes([
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ]),
                id: EventId::new(u16::from_le_bytes([raw[8], raw[9]])),
                size: u16::from_le_bytes([raw[10], raw[11]]),
            },
        }
    }
}

// ============================================================================
// COMPACT PACKING
// ============================================================================

/// Pack a compact event word: `data | event_id | truncated_tsc`.
///
/// The cycle counter loses its [`TSC_LSB_TRUNCATE`] low bits, then keeps
/// [`COMPACT_TSC_BITS`] bits. `data` and `id` are masked to their windows.
#[inline]
pub const fn pack_compact(id: EventId, tsc: u64, data: u32) -> u32 {
    let tsc_mask = (1u32 << COMPACT_TSC_BITS) - 1;
    let id_mask = (1u32 << COMPACT_EVENT_BITS) - 1;
    let data_mask = (1u32 << COMPACT_DATA_BITS) - 1;

    let tsc = ((tsc >> TSC_LSB_TRUNCATE) as u32) & tsc_mask;
    let id = (id.raw() as u32) & id_mask;
    let data = data & data_mask;

    (data << (COMPACT_EVENT_BITS + COMPACT_TSC_BITS)) | (id << COMPACT_TSC_BITS) | tsc
}

/// Unpack a compact event word into `(data, event_id, truncated_tsc)`
#[inline]
pub const fn unpack_compact(word: u32) -> (u32, u16, u32) {
    let tsc_mask = (1u32 << COMPACT_TSC_BITS) - 1;
    let id_mask = (1u32 << COMPACT_EVENT_BITS) - 1;

    let tsc = word & tsc_mask;
    let id = (word >> COMPACT_TSC_BITS) & id_mask;
    let data = word >> (COMPACT_EVENT_BITS + COMPACT_TSC_BITS);

    (data, id as u16, tsc)
}

// ============================================================================
// TESTS
// ============================================================================
