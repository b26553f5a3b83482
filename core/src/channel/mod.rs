//! # Trace Channel
//!
//! A named group of per-producer ring buffers sharing subbuffer sizing and
//! overwrite policy. Reservations are routed to the calling producer's own
//! buffer, so channels add no synchronization of their own on the logging
//! path.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::buffer::{ProducerBuffer, ReserveFail, Slot};
use crate::codec::{pack_compact, slot_layout, Encoding, MAX_EVENT_SIZE};
use crate::error::{TraceError, TraceResult};
use crate::header::HeaderFlags;
use crate::storage::BufferPages;
use crate::time::CycleClock;
use crate::trace::TraceInfo;
use crate::transport::Transport;
use crate::types::{ChannelRole, EventId, Geometry, ProducerId};

/// Name prefix of channels recycling their oldest data
pub const FLIGHT_PREFIX: &str = "flight-";

/// Reader-visible name of a channel: the role name, prefixed when the
/// channel is in overwrite mode
pub fn channel_name(role: ChannelRole, overwrite: bool) -> String {
    let mut name = String::new();
    if overwrite {
        name.push_str(FLIGHT_PREFIX);
    }
    name.push_str(role.name());
    name
}

// ============================================================================
// CHANNEL
// ============================================================================

/// One fixed-role channel of a trace
pub struct Channel {
    name: String,
    role: ChannelRole,
    geometry: Geometry,
    encoding: Encoding,
    overwrite: bool,
    buffers: Vec<ProducerBuffer>,
}

impl Channel {
    /// Assemble a channel over transport-provided backing storage.
    ///
    /// `pages` holds one region per producer slot, each spanning
    /// `geometry.buf_size()` bytes.
    pub(crate) fn new(
        name: String,
        role: ChannelRole,
        geometry: Geometry,
        encoding: Encoding,
        overwrite: bool,
        info: &Arc<TraceInfo>,
        clock: &Arc<dyn CycleClock>,
        pages: Vec<Arc<BufferPages>>,
    ) -> Self {
        let mut flags = HeaderFlags::empty();
        if overwrite {
            flags |= HeaderFlags::FLIGHT;
        }
        if encoding.needs_heartbeat() {
            flags |= HeaderFlags::HEARTBEAT;
        }
        if encoding == Encoding::Compact {
            flags |= HeaderFlags::COMPACT;
        }

        let buffers = pages
            .into_iter()
            .map(|region| {
                ProducerBuffer::new(
                    geometry,
                    encoding,
                    overwrite,
                    flags,
                    Arc::clone(info),
                    Arc::clone(clock),
                    region,
                )
            })
            .collect();

        Self {
            name,
            role,
            geometry,
            encoding,
            overwrite,
            buffers,
        }
    }

    // ------------------------------------------------------------------
    // Producer API
    // ------------------------------------------------------------------

    /// Reserve a slot in the calling producer's buffer.
    ///
    /// Never blocks. `NoSpace` means the event was dropped and counted.
    pub fn reserve(&self, producer: ProducerId, payload_len: u64) -> TraceResult<Slot> {
        if payload_len > MAX_EVENT_SIZE {
            return Err(TraceError::InvalidConfiguration);
        }
        if self.encoding == Encoding::Compact && payload_len != 0 {
            // Compact events are fixed-shape: the payload rides in the
            // header's data bits.
            return Err(TraceError::InvalidConfiguration);
        }
        let buffer = self
            .buffers
            .get(producer.index())
            .ok_or(TraceError::InvalidConfiguration)?;
        buffer.reserve(payload_len).map_err(|fail| match fail {
            ReserveFail::Full | ReserveFail::TooBig => TraceError::NoSpace,
        })
    }

    /// Commit a previously reserved slot
    pub fn commit(&self, producer: ProducerId, slot: Slot) {
        self.buffers[producer.index()].commit(slot);
    }

    /// Reserve, encode, and commit one event in a single call
    pub fn log_event(&self, producer: ProducerId, id: EventId, payload: &[u8]) -> TraceResult<()> {
        let slot = self.reserve(producer, payload.len() as u64)?;
        let buffer = &self.buffers[producer.index()];
        buffer.write_event_header(&slot, id, payload.len() as u16);
        buffer.write_payload(&slot, payload);
        buffer.commit(slot);
        Ok(())
    }

    /// Log one packed compact event
    pub fn log_compact(&self, producer: ProducerId, id: EventId, data: u32) -> TraceResult<()> {
        if self.encoding != Encoding::Compact {
            return Err(TraceError::InvalidConfiguration);
        }
        let slot = self.reserve(producer, 0)?;
        let buffer = &self.buffers[producer.index()];
        buffer.write_compact(&slot, pack_compact(id, slot.tsc, data));
        buffer.commit(slot);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduler / lifecycle
    // ------------------------------------------------------------------

    /// Forward pending reader wakeups to the transport.
    ///
    /// Called by the periodic scheduler, never by producers.
    pub fn wakeup_readers(&self, transport: &dyn Transport, trace: &str) {
        for (slot, buffer) in self.buffers.iter().enumerate() {
            if buffer.take_wakeup() {
                transport.wakeup_readers(trace, &self.name, ProducerId::new(slot as u32));
            }
        }
    }

    /// Finalize and flush every producer buffer (stop-time drain)
    pub fn finish(&self) {
        for buffer in &self.buffers {
            buffer.flush();
        }
    }

    /// Report teardown diagnostics for every producer buffer
    pub fn log_pending_errors(&self, trace: &str) {
        for (slot, buffer) in self.buffers.iter().enumerate() {
            buffer.log_pending_errors(trace, &self.name, slot);
        }
    }

    /// Total reserve/commit pairs in flight across producers
    pub fn in_flight(&self) -> u32 {
        self.buffers.iter().map(ProducerBuffer::in_flight).sum()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Channel name, including the flight prefix when overwriting
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed role of this channel
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Ring geometry shared by every producer buffer
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Event header encoding
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Whether this channel recycles its oldest data under backpressure
    pub fn is_overwrite(&self) -> bool {
        self.overwrite
    }

    /// Bytes one event of `payload_len` will occupy
    pub fn slot_size(&self, payload_len: u64) -> u64 {
        slot_layout(self.encoding, payload_len).total_size
    }

    /// The ring buffer of one producer slot
    pub fn buffer(&self, producer: ProducerId) -> Option<&ProducerBuffer> {
        self.buffers.get(producer.index())
    }

    /// Iterate all producer buffers
    pub fn buffers(&self) -> impl Iterator<Item = &ProducerBuffer> {
        self.buffers.iter()
    }
}
