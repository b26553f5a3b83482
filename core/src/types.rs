//! Core trace engine types
//!
//! Identifiers, channel roles, trace modes, and the power-of-two buffer
//! geometry that every offset computation in the engine relies on.

use core::fmt;

// ============================================================================
// EVENT ID
// ============================================================================

/// Event identifier carried in every event header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u16);

impl EventId {
    /// Heartbeat event (full 64-bit timestamp resynchronization point)
    pub const HEARTBEAT: Self = Self(0);

    /// First identifier available to instrumentation call-sites
    pub const FIRST_USER: Self = Self(1);

    /// Create a new event ID
    #[inline(always)]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    #[inline(always)]
    pub const fn raw(&self) -> u16 {
        self.0
    }
}

// ============================================================================
// PRODUCER ID
// ============================================================================

/// Dense index of a registered producer context.
///
/// A producer context is one logical writer (conceptually "per CPU"); every
/// channel owns exactly one ring buffer per registered producer slot, so a
/// producer only ever reserves into its own buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProducerId(pub u32);

impl ProducerId {
    /// Create a new producer ID
    #[inline(always)]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw index value
    #[inline(always)]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Index into per-producer arrays
    #[inline(always)]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// CHANNEL ROLE
// ============================================================================

/// Fixed role of a channel inside a trace.
///
/// Every trace owns exactly one channel per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelRole {
    /// Facility/serializer registration metadata
    Facilities,
    /// Interrupt entry/exit events
    Interrupts,
    /// Process lifecycle events
    Processes,
    /// Module load/unload events
    Modules,
    /// Network events
    Network,
    /// Per-CPU high-rate events
    Cpu,
    /// Fixed-shape events with the packed 32-bit header
    Compact,
}

impl ChannelRole {
    /// All channel roles, in on-disk order
    pub const ALL: [ChannelRole; 7] = [
        Self::Facilities,
        Self::Interrupts,
        Self::Processes,
        Self::Modules,
        Self::Network,
        Self::Cpu,
        Self::Compact,
    ];

    /// Get the channel name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Facilities => "facilities",
            Self::Interrupts => "interrupts",
            Self::Processes => "processes",
            Self::Modules => "modules",
            Self::Network => "network",
            Self::Cpu => "cpu",
            Self::Compact => "compact",
        }
    }

    /// Whether this role carries decoding metadata.
    ///
    /// Metadata channels are never placed in overwrite mode by `Hybrid`
    /// traces: losing them would make the rest of the trace undecodable.
    pub const fn is_metadata(&self) -> bool {
        matches!(self, Self::Facilities | Self::Modules)
    }

    /// Index into per-role arrays
    #[inline(always)]
    pub const fn index(&self) -> usize {
        match self {
            Self::Facilities => 0,
            Self::Interrupts => 1,
            Self::Processes => 2,
            Self::Modules => 3,
            Self::Network => 4,
            Self::Cpu => 5,
            Self::Compact => 6,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// TRACE MODE
// ============================================================================

/// Backpressure policy of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// No channel overwrites: a full channel drops events and counts them
    Normal,
    /// Flight recorder: every channel silently recycles its oldest data
    Flight,
    /// Bulk channels overwrite, metadata channels drop-and-count
    Hybrid,
}

impl TraceMode {
    /// Whether a channel with the given role overwrites in this mode
    pub const fn overwrites(&self, role: ChannelRole) -> bool {
        match self {
            Self::Normal => false,
            Self::Flight => true,
            Self::Hybrid => !role.is_metadata(),
        }
    }

    /// Get the mode name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Flight => "flight",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// BUFFER GEOMETRY
// ============================================================================

/// Power-of-two ring buffer geometry.
///
/// `subbuf_size` and `n_subbufs` are both powers of two, so every offset
/// computation below is a mask, never a modulo. Offsets are monotonic byte
/// counts; only `buffer_offset` folds them into the backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Size of one subbuffer in bytes (power of two)
    pub subbuf_size: u64,
    /// Number of subbuffers (power of two)
    pub n_subbufs: u64,
}

impl Geometry {
    /// Build a geometry, rounding both dimensions up to powers of two.
    ///
    /// Returns `None` when a requested dimension is zero or the rounding
    /// would overflow.
    pub fn new(subbuf_size: u64, n_subbufs: u64) -> Option<Self> {
        if subbuf_size == 0 || n_subbufs == 0 {
            return None;
        }
        let subbuf_size = subbuf_size.checked_next_power_of_two()?;
        let n_subbufs = n_subbufs.checked_next_power_of_two()?;
        subbuf_size.checked_mul(n_subbufs)?;
        Some(Self {
            subbuf_size,
            n_subbufs,
        })
    }

    /// Total buffer capacity in bytes
    #[inline(always)]
    pub const fn buf_size(&self) -> u64 {
        self.subbuf_size * self.n_subbufs
    }

    /// Offset within the containing subbuffer
    #[inline(always)]
    pub const fn subbuf_offset(&self, offset: u64) -> u64 {
        offset & (self.subbuf_size - 1)
    }

    /// Index of the containing subbuffer
    #[inline(always)]
    pub const fn subbuf_index(&self, offset: u64) -> usize {
        ((offset & (self.buf_size() - 1)) / self.subbuf_size) as usize
    }

    /// Offset truncated down to its subbuffer start (monotonic)
    #[inline(always)]
    pub const fn subbuf_trunc(&self, offset: u64) -> u64 {
        offset & !(self.subbuf_size - 1)
    }

    /// Offset aligned up to the next subbuffer start (monotonic)
    #[inline(always)]
    pub const fn subbuf_align(&self, offset: u64) -> u64 {
        (offset + self.subbuf_size) & !(self.subbuf_size - 1)
    }

    /// Byte offset into the backing storage
    #[inline(always)]
    pub const fn buffer_offset(&self, offset: u64) -> u64 {
        offset & (self.buf_size() - 1)
    }
}

// ============================================================================
// TESTS
// ============================================================================
