//! In-memory ring backing store.
//!
//! Owns one byte region per (trace, channel, producer slot) and counts the
//! reader wakeups the scheduler forwards. In-process readers fetch the
//! regions back through [`RamTransport::pages`] and drive the consumer
//! protocol on the engine's buffers directly.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use quill_core::error::{TraceError, TraceResult};
use quill_core::storage::BufferPages;
use quill_core::transport::Transport;
use quill_core::types::{Geometry, ProducerId};

type ChannelKey = (String, String);

// ============================================================================
// RAM TRANSPORT
// ============================================================================

/// In-memory channel backing store
pub struct RamTransport {
    channels: RwLock<BTreeMap<ChannelKey, Vec<Arc<BufferPages>>>>,
    wakeups: RwLock<BTreeMap<ChannelKey, u64>>,
}

impl RamTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
            wakeups: RwLock::new(BTreeMap::new()),
        }
    }

    /// The backing region of one producer buffer, if the channel exists
    pub fn pages(&self, trace: &str, channel: &str, producer: ProducerId) -> Option<Arc<BufferPages>> {
        self.channels
            .read()
            .get(&(String::from(trace), String::from(channel)))
            .and_then(|regions| regions.get(producer.index()).cloned())
    }

    /// Reader wakeups forwarded for one channel so far
    pub fn wakeup_count(&self, trace: &str, channel: &str) -> u64 {
        self.wakeups
            .read()
            .get(&(String::from(trace), String::from(channel)))
            .copied()
            .unwrap_or(0)
    }

    /// Total reader wakeups across all channels
    pub fn total_wakeups(&self) -> u64 {
        self.wakeups.read().values().sum()
    }

    /// Number of channels currently backed
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl Default for RamTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for RamTransport {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn create_channel(
        &self,
        trace: &str,
        channel: &str,
        geometry: Geometry,
        producers: u32,
    ) -> TraceResult<Vec<Arc<BufferPages>>> {
        let key = (String::from(trace), String::from(channel));
        let mut channels = self.channels.write();
        if channels.contains_key(&key) {
            return Err(TraceError::AlreadyExists);
        }

        let regions: Vec<Arc<BufferPages>> = (0..producers)
            .map(|_| Arc::new(BufferPages::zeroed(geometry.buf_size() as usize)))
            .collect();
        channels.insert(key, regions.clone());
        log::debug!(
            "ram transport: {trace}/{channel} backed with {producers} x {} bytes",
            geometry.buf_size()
        );
        Ok(regions)
    }

    fn remove_channel(&self, trace: &str, channel: &str) {
        let key = (String::from(trace), String::from(channel));
        self.channels.write().remove(&key);
        self.wakeups.write().remove(&key);
        log::debug!("ram transport: {trace}/{channel} released");
    }

    fn wakeup_readers(&self, trace: &str, channel: &str, _producer: ProducerId) {
        let key = (String::from(trace), String::from(channel));
        *self.wakeups.write().entry(key).or_insert(0) += 1;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_release() {
        let transport = RamTransport::new();
        let geometry = Geometry::new(4096, 4).unwrap();

        let regions = transport
            .create_channel("t1", "cpu", geometry, 2)
            .unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].len() as u64, geometry.buf_size());
        assert!(transport.pages("t1", "cpu", ProducerId::new(1)).is_some());

        assert_eq!(
            transport.create_channel("t1", "cpu", geometry, 2),
            Err(TraceError::AlreadyExists)
        );

        transport.remove_channel("t1", "cpu");
        assert!(transport.pages("t1", "cpu", ProducerId::new(0)).is_none());
        assert_eq!(transport.channel_count(), 0);
    }

    #[test]
    fn test_wakeup_accounting() {
        let transport = RamTransport::new();
        transport.wakeup_readers("t1", "cpu", ProducerId::new(0));
        transport.wakeup_readers("t1", "cpu", ProducerId::new(1));
        transport.wakeup_readers("t1", "network", ProducerId::new(0));
        assert_eq!(transport.wakeup_count("t1", "cpu"), 2);
        assert_eq!(transport.total_wakeups(), 3);
    }
}
