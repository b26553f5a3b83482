//! # Transport Capability
//!
//! The channel backing store is pluggable: a transport owns the raw byte
//! regions behind every per-producer buffer and is told when finished
//! subbuffers are ready for its readers. The engine only references the
//! storage and never blocks on the transport from the logging path.
//!
//! Transports register by name in a process-wide table; trace creation
//! picks one by name.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{TraceError, TraceResult};
use crate::storage::BufferPages;
use crate::types::{Geometry, ProducerId};

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Channel backing-store provider.
///
/// `wakeup_readers` is invoked from the periodic scheduler only, never from
/// a producer, so implementations may do blocking work there.
pub trait Transport: Send + Sync {
    /// Transport name used for registration lookup
    fn name(&self) -> &'static str;

    /// Allocate backing storage for one channel: one region of
    /// `geometry.buf_size()` bytes per producer slot.
    ///
    /// The transport keeps ownership; the engine holds shared references.
    /// A failure here makes the whole trace creation roll back.
    fn create_channel(
        &self,
        trace: &str,
        channel: &str,
        geometry: Geometry,
        producers: u32,
    ) -> TraceResult<Vec<Arc<BufferPages>>>;

    /// Release the backing storage of one channel
    fn remove_channel(&self, trace: &str, channel: &str);

    /// A subbuffer of the given producer buffer became readable
    fn wakeup_readers(&self, trace: &str, channel: &str, producer: ProducerId);
}

// ============================================================================
// TRANSPORT REGISTRY
// ============================================================================

/// Name-keyed table of registered transports
pub struct TransportRegistry {
    transports: RwLock<BTreeMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a transport under its own name.
    ///
    /// Fails with `AlreadyExists` when the name is taken.
    pub fn register(&self, transport: Arc<dyn Transport>) -> TraceResult<()> {
        let mut transports = self.transports.write();
        let name = String::from(transport.name());
        if transports.contains_key(&name) {
            return Err(TraceError::AlreadyExists);
        }
        transports.insert(name, transport);
        Ok(())
    }

    /// Remove a transport by name
    pub fn unregister(&self, name: &str) -> TraceResult<()> {
        self.transports
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or(TraceError::NotFound)
    }

    /// Look up a transport by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.read().get(name).cloned()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
