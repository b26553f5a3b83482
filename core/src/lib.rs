//! # Quill Core - Lock-Free Event Trace Engine
//!
//! High-throughput structured event logging: many concurrent producer
//! contexts record small events into per-producer ring buffers with nothing
//! but atomic operations on the hot path, while readers drain fully
//! committed subbuffers without ever blocking a producer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TraceRegistry                       │
//! │   create / destroy / start / stop · wakeup · heartbeat   │
//! ├──────────────────────────────────────────────────────────┤
//! │                          Trace                           │
//! │   facilities │ interrupts │ ... │ cpu │ compact          │
//! ├──────────────────────────────────────────────────────────┤
//! │                         Channel                          │
//! │   one PerProducerBuffer per registered producer slot     │
//! ├──────────────────────────────────────────────────────────┤
//! │                      ProducerBuffer                      │
//! │   reserve (CAS on write offset) · commit (count parity)  │
//! ├──────────────────────────────────────────────────────────┤
//! │            BufferPages  (transport-owned bytes)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Reserve and Commit never block** and never take a lock: they are
//!   usable from contexts where blocking is illegal.
//! - **Per-producer ordering**: events of one producer are ordered by
//!   reservation; across producers only timestamps order events.
//! - **Counted loss**: a full non-overwrite channel drops and counts;
//!   overwrite (flight recorder) channels recycle their oldest data
//!   silently. Loss is metadata, never an error.

#![no_std]

extern crate alloc;

pub mod buffer;
pub mod channel;
pub mod codec;
pub mod error;
pub mod filter;
pub mod header;
pub mod producer;
pub mod registry;
pub mod storage;
pub mod time;
pub mod trace;
pub mod transport;
pub mod types;

/// Prelude for common imports
pub mod prelude {
    pub use crate::buffer::{ForceSwitch, Poll, ProducerBuffer, Slot};
    pub use crate::channel::{Channel, FLIGHT_PREFIX};
    pub use crate::codec::{Encoding, EventHeader};
    pub use crate::error::{ReadError, TraceError, TraceResult};
    pub use crate::filter::FilterTable;
    pub use crate::header::{BlockStartHeader, HeaderFlags, TraceHeader};
    pub use crate::producer::ProducerRegistry;
    pub use crate::registry::TraceRegistry;
    pub use crate::storage::BufferPages;
    pub use crate::time::{CycleClock, TickClock};
    pub use crate::trace::{ChannelConfig, Trace, TraceConfig, TraceInfo};
    pub use crate::transport::{Transport, TransportRegistry};
    pub use crate::types::{ChannelRole, EventId, Geometry, ProducerId, TraceMode};
}

pub use prelude::*;
