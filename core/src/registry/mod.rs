//! # Trace Registry
//!
//! Process-wide control plane: the list of all traces, the four lifecycle
//! operations, and the global counters gating the wakeup scheduler and
//! heartbeat generator.
//!
//! Concurrency discipline: all four control operations run under one global
//! control lock that is never held while logging an event. The trace list
//! itself is an immutable snapshot swapped under that lock, so the periodic
//! scheduler iterates a stable snapshot while Create/Destroy replace it —
//! neither side ever waits for the other.

mod scheduler;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, RwLock};

use crate::channel::{channel_name, Channel};
use crate::codec::Encoding;
use crate::error::{TraceError, TraceResult};
use crate::filter::FilterTable;
use crate::producer::ProducerRegistry;
use crate::time::CycleClock;
use crate::trace::{Trace, TraceConfig, TraceInfo};
use crate::transport::TransportRegistry;
use crate::types::{ChannelRole, Geometry, ProducerId, TraceMode};

// ============================================================================
// TRACE REGISTRY
// ============================================================================

/// Process-wide list of traces plus the async wakeup machinery
pub struct TraceRegistry {
    /// Single global control lock (Create/Destroy/Start/Stop only)
    control: Mutex<()>,
    /// Immutable snapshot of all traces, swapped on mutation
    snapshot: RwLock<Arc<Vec<Arc<Trace>>>>,
    /// Number of currently active traces
    active_count: AtomicU32,
    producers: ProducerRegistry,
    transports: TransportRegistry,
    filter: FilterTable,
    clock: Arc<dyn CycleClock>,
    wakeup_armed: AtomicBool,
    heartbeat_armed: AtomicBool,
}

impl TraceRegistry {
    /// Create a registry with room for `producer_slots` producer contexts
    pub fn new(producer_slots: u32, clock: Arc<dyn CycleClock>) -> Self {
        Self {
            control: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            active_count: AtomicU32::new(0),
            producers: ProducerRegistry::new(producer_slots),
            transports: TransportRegistry::new(),
            filter: FilterTable::default(),
            clock,
            wakeup_armed: AtomicBool::new(false),
            heartbeat_armed: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Collaborator access
    // ------------------------------------------------------------------

    /// Register a producer context, returning its slot
    pub fn register_producer(&self) -> TraceResult<ProducerId> {
        self.producers
            .register()
            .ok_or(TraceError::OutOfResources)
    }

    /// The producer context arena
    pub fn producers(&self) -> &ProducerRegistry {
        &self.producers
    }

    /// The transport registry
    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// The filter policy table
    pub fn filter(&self) -> &FilterTable {
        &self.filter
    }

    /// The engine clock
    pub fn clock(&self) -> &Arc<dyn CycleClock> {
        &self.clock
    }

    /// Number of currently active traces
    pub fn active_traces(&self) -> u32 {
        self.active_count.load(Ordering::Acquire)
    }

    /// Current stable snapshot of all traces
    pub fn traces(&self) -> Arc<Vec<Arc<Trace>>> {
        self.snapshot.read().clone()
    }

    /// Look up a trace by name in the current snapshot
    pub fn get(&self, name: &str) -> Option<Arc<Trace>> {
        self.traces().iter().find(|t| t.name() == name).cloned()
    }

    // ------------------------------------------------------------------
    // Create / Destroy
    // ------------------------------------------------------------------

    /// Create a trace.
    ///
    /// Allocates backing storage for every fixed-role channel through the
    /// named transport. All-or-nothing: any per-channel failure rolls back
    /// every channel already allocated for this trace.
    pub fn create(&self, name: &str, transport: &str, config: TraceConfig) -> TraceResult<()> {
        let _ctl = self.control.lock();

        if self.get(name).is_some() {
            return Err(TraceError::AlreadyExists);
        }
        let transport = self
            .transports
            .get(transport)
            .ok_or(TraceError::InvalidConfiguration)?;

        let info = Arc::new(TraceInfo::new(
            name,
            config.mode,
            config.heartbeat,
            self.clock.as_ref(),
        ));

        let mut channels: Vec<Channel> = Vec::with_capacity(ChannelRole::ALL.len());
        for role in ChannelRole::ALL {
            let sizing = config.channels[role.index()];
            let built = Geometry::new(sizing.subbuf_size, sizing.n_subbufs)
                .ok_or(TraceError::InvalidConfiguration)
                .and_then(|geometry| {
                    let overwrite = config.mode.overwrites(role);
                    let chan_name = channel_name(role, overwrite);
                    let pages = transport.create_channel(
                        name,
                        &chan_name,
                        geometry,
                        self.producers.capacity(),
                    )?;
                    Ok(Channel::new(
                        chan_name,
                        role,
                        geometry,
                        channel_encoding(role, config.heartbeat),
                        overwrite,
                        &info,
                        &self.clock,
                        pages,
                    ))
                });
            match built {
                Ok(channel) => channels.push(channel),
                Err(err) => {
                    // Roll back everything allocated so far.
                    for channel in &channels {
                        transport.remove_channel(name, channel.name());
                    }
                    log::warn!("trace {name}: channel {} allocation failed: {err}", role);
                    // Bad sizing is the caller's mistake; everything else
                    // is an allocation failure.
                    return Err(match err {
                        TraceError::InvalidConfiguration => err,
                        _ => TraceError::OutOfResources,
                    });
                },
            }
        }

        let trace = Arc::new(Trace::new(info, channels, transport));
        self.swap_snapshot(|traces| traces.push(trace));
        log::info!("trace {name}: created");
        Ok(())
    }

    /// Destroy an inactive trace and release its storage
    pub fn destroy(&self, name: &str) -> TraceResult<()> {
        let _ctl = self.control.lock();

        let trace = self.get(name).ok_or(TraceError::NotFound)?;
        if trace.is_active() {
            return Err(TraceError::Busy);
        }

        self.swap_snapshot(|traces| traces.retain(|t| t.name() != name));
        trace.teardown();
        log::info!("trace {name}: destroyed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Start / Stop
    // ------------------------------------------------------------------

    /// Start recording.
    ///
    /// Idempotent: starting an active trace is a logged no-op. The first
    /// trace going active process-wide arms the wakeup scheduler and the
    /// heartbeat generator.
    pub fn start(&self, name: &str) -> TraceResult<()> {
        let _ctl = self.control.lock();

        let trace = self.get(name).ok_or(TraceError::NotFound)?;
        if trace.is_active() {
            log::debug!("trace {name}: start ignored, already active");
            return Ok(());
        }

        if self.active_count.load(Ordering::Acquire) == 0 {
            self.wakeup_armed.store(true, Ordering::Release);
            self.heartbeat_armed.store(true, Ordering::Release);
            log::debug!("wakeup scheduler and heartbeat armed");
        }

        // Fresh timing snapshot so stop/start resumption never produces a
        // timestamp discontinuity.
        trace.info().restamp(self.clock.as_ref());
        trace.set_active(true);
        self.active_count.fetch_add(1, Ordering::AcqRel);
        log::info!("trace {name}: started");
        Ok(())
    }

    /// Stop recording.
    ///
    /// Idempotent: stopping an inactive trace is a no-op. Waits for every
    /// in-flight reserve/commit pair on this trace to finish, then flushes
    /// so readers can drain partially-filled subbuffers. The last trace
    /// going inactive disarms the scheduler and heartbeat.
    pub fn stop(&self, name: &str) -> TraceResult<()> {
        let _ctl = self.control.lock();

        let trace = self.get(name).ok_or(TraceError::NotFound)?;
        if !trace.is_active() {
            log::debug!("trace {name}: stop ignored, not active");
            return Ok(());
        }

        trace.set_active(false);
        if self.active_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.wakeup_armed.store(false, Ordering::Release);
            self.heartbeat_armed.store(false, Ordering::Release);
            log::debug!("wakeup scheduler and heartbeat disarmed");
        }

        // Cooperative quiescence: producers that already passed the active
        // check finish their reserve/commit pairs; no new pairs start.
        trace.quiesce();
        trace.finish();
        log::info!("trace {name}: stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot maintenance
    // ------------------------------------------------------------------

    // Swap in a mutated copy of the trace list. Callers hold the control
    // lock; the scheduler keeps iterating whichever snapshot it cloned.
    fn swap_snapshot<F: FnOnce(&mut Vec<Arc<Trace>>)>(&self, mutate: F) {
        let mut traces: Vec<Arc<Trace>> = self.snapshot.read().as_ref().clone();
        mutate(&mut traces);
        *self.snapshot.write() = Arc::new(traces);
    }
}

// Per-channel encoding: the compact channel packs 32-bit headers only while
// heartbeat timestamping provides the resynchronization points; without a
// heartbeat every channel falls back to full 64-bit timestamps.
fn channel_encoding(role: ChannelRole, heartbeat: bool) -> Encoding {
    if !heartbeat {
        Encoding::Full
    } else if role == ChannelRole::Compact {
        Encoding::Compact
    } else {
        Encoding::Heartbeat
    }
}

// ============================================================================
// CONVENIENCE CONSTRUCTORS
// ============================================================================

impl TraceRegistry {
    /// Create a trace with default sizing for a mode
    pub fn create_default(&self, name: &str, transport: &str, mode: TraceMode) -> TraceResult<()> {
        self.create(name, transport, TraceConfig::new(mode))
    }
}
