//! # Trace
//!
//! A named collection of fixed-role channels plus lifecycle state and the
//! timing-reference metadata stamped into every subbuffer header.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::channel::Channel;
use crate::time::CycleClock;
use crate::transport::Transport;
use crate::types::{ChannelRole, Geometry, TraceMode};

// ============================================================================
// TRACE CONFIG
// ============================================================================

/// Sizing of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Requested subbuffer size (rounded up to a power of two)
    pub subbuf_size: u64,
    /// Requested subbuffer count (rounded up to a power of two)
    pub n_subbufs: u64,
}

impl ChannelConfig {
    /// Default sizing for a role: bulk channels get more room
    pub const fn for_role(role: ChannelRole) -> Self {
        match role {
            ChannelRole::Cpu | ChannelRole::Network => Self {
                subbuf_size: 16384,
                n_subbufs: 4,
            },
            ChannelRole::Compact => Self {
                subbuf_size: 8192,
                n_subbufs: 4,
            },
            _ => Self {
                subbuf_size: 4096,
                n_subbufs: 4,
            },
        }
    }
}

/// Creation-time configuration of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Backpressure policy
    pub mode: TraceMode,
    /// Whether events carry truncated heartbeat-resynchronized timestamps
    pub heartbeat: bool,
    /// Per-role channel sizing
    pub channels: [ChannelConfig; ChannelRole::ALL.len()],
}

impl TraceConfig {
    /// Default configuration for a mode
    pub fn new(mode: TraceMode) -> Self {
        let mut channels = [ChannelConfig {
            subbuf_size: 0,
            n_subbufs: 0,
        }; ChannelRole::ALL.len()];
        let mut i = 0;
        while i < ChannelRole::ALL.len() {
            channels[i] = ChannelConfig::for_role(ChannelRole::ALL[i]);
            i += 1;
        }
        Self {
            mode,
            heartbeat: true,
            channels,
        }
    }

    /// Override the sizing of one channel
    pub fn with_channel(mut self, role: ChannelRole, subbuf_size: u64, n_subbufs: u64) -> Self {
        self.channels[role.index()] = ChannelConfig {
            subbuf_size,
            n_subbufs,
        };
        self
    }

    /// Disable heartbeat timestamping: every event carries 64 bits
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = false;
        self
    }
}

// ============================================================================
// TRACE INFO
// ============================================================================

/// Immutable identity plus restampable timing reference of one trace.
///
/// Shared by every channel and buffer of the trace; the timing fields are
/// refreshed on every start so stop/start cycles never produce a timestamp
/// discontinuity.
pub struct TraceInfo {
    name: String,
    mode: TraceMode,
    heartbeat: bool,
    freq_scale: u32,
    start_freq: AtomicU64,
    start_tsc: AtomicU64,
    start_sec: AtomicU64,
    start_nsec: AtomicU64,
}

impl TraceInfo {
    /// Build the info block and take the first timing snapshot
    pub fn new(name: &str, mode: TraceMode, heartbeat: bool, clock: &dyn CycleClock) -> Self {
        let (sec, nsec) = clock.wall_time();
        Self {
            name: String::from(name),
            mode,
            heartbeat,
            freq_scale: clock.freq_scale(),
            start_freq: AtomicU64::new(clock.frequency()),
            start_tsc: AtomicU64::new(clock.cycles()),
            start_sec: AtomicU64::new(sec),
            start_nsec: AtomicU64::new(nsec),
        }
    }

    /// Take a fresh timing snapshot (called on every start)
    pub fn restamp(&self, clock: &dyn CycleClock) {
        let (sec, nsec) = clock.wall_time();
        self.start_freq.store(clock.frequency(), Ordering::Relaxed);
        self.start_tsc.store(clock.cycles(), Ordering::Relaxed);
        self.start_sec.store(sec, Ordering::Relaxed);
        self.start_nsec.store(nsec, Ordering::Relaxed);
    }

    /// Trace name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backpressure policy
    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Whether heartbeat timestamping is enabled
    pub fn heartbeat(&self) -> bool {
        self.heartbeat
    }

    /// Frequency interpolation scale
    pub fn freq_scale(&self) -> u32 {
        self.freq_scale
    }

    /// Counter frequency at the last start
    pub fn start_freq(&self) -> u64 {
        self.start_freq.load(Ordering::Relaxed)
    }

    /// Cycle count at the last start
    pub fn start_tsc(&self) -> u64 {
        self.start_tsc.load(Ordering::Relaxed)
    }

    /// Wall-clock instant of the last start
    pub fn start_time(&self) -> (u64, u64) {
        (
            self.start_sec.load(Ordering::Relaxed),
            self.start_nsec.load(Ordering::Relaxed),
        )
    }
}

// ============================================================================
// TRACE
// ============================================================================

/// One named trace: fixed-role channels plus lifecycle state
pub struct Trace {
    info: Arc<TraceInfo>,
    channels: Vec<Channel>,
    transport: Arc<dyn Transport>,
    active: AtomicBool,
    paused: AtomicBool,
}

impl Trace {
    /// Assemble a trace from already-built channels.
    ///
    /// `channels` must hold one channel per role, in role order.
    pub(crate) fn new(
        info: Arc<TraceInfo>,
        channels: Vec<Channel>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        debug_assert_eq!(channels.len(), ChannelRole::ALL.len());
        Self {
            info,
            channels,
            transport,
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Trace name
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Shared metadata block
    pub fn info(&self) -> &Arc<TraceInfo> {
        &self.info
    }

    /// The transport owning this trace's backing storage
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The channel with the given role
    pub fn channel(&self, role: ChannelRole) -> &Channel {
        &self.channels[role.index()]
    }

    /// Iterate all channels in role order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Whether the trace is currently recording
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Whether event delivery is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause or resume event delivery without tearing down buffers
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Gate consulted by instrumentation before reserving: recording only
    /// while active and not paused
    pub fn should_log(&self) -> bool {
        self.is_active() && !self.is_paused()
    }

    /// Spin until every in-flight reserve/commit pair has finished.
    ///
    /// Called after deactivation: producers observing `active == false`
    /// stop issuing new reservations, so the in-flight count is strictly
    /// draining while we wait.
    pub(crate) fn quiesce(&self) {
        for channel in &self.channels {
            while channel.in_flight() != 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Finalize and flush every channel so readers can drain the tail
    pub(crate) fn finish(&self) {
        for channel in &self.channels {
            channel.finish();
        }
    }

    /// Report teardown diagnostics and release transport storage
    pub(crate) fn teardown(&self) {
        for channel in &self.channels {
            channel.log_pending_errors(self.name());
            self.transport.remove_channel(self.name(), channel.name());
        }
    }

    /// Subbuffer geometry of one channel (engine-effective, post-rounding)
    pub fn geometry(&self, role: ChannelRole) -> Geometry {
        self.channel(role).geometry()
    }
}
