//! Recording mock backing store.
//!
//! Stores nothing durable: it allocates throwaway regions, records every
//! call, and can be told to fail after a fixed number of channel
//! creations to exercise all-or-nothing trace creation.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use quill_core::error::{TraceError, TraceResult};
use quill_core::storage::BufferPages;
use quill_core::transport::Transport;
use quill_core::types::{Geometry, ProducerId};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// Call-recording transport with optional failure injection
pub struct MockTransport {
    fail_after: Option<usize>,
    created: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Create a mock that never fails
    pub fn new() -> Self {
        Self {
            fail_after: None,
            created: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock whose channel allocation fails after `n` successes
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            created: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls matching a prefix
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_channel(
        &self,
        trace: &str,
        channel: &str,
        geometry: Geometry,
        producers: u32,
    ) -> TraceResult<Vec<Arc<BufferPages>>> {
        let n = self.created.fetch_add(1, Ordering::Relaxed);
        if let Some(limit) = self.fail_after {
            if n >= limit {
                self.record(format!("create-fail {trace}/{channel}"));
                return Err(TraceError::OutOfResources);
            }
        }
        self.record(format!("create {trace}/{channel}"));
        Ok((0..producers)
            .map(|_| Arc::new(BufferPages::zeroed(geometry.buf_size() as usize)))
            .collect())
    }

    fn remove_channel(&self, trace: &str, channel: &str) {
        self.record(format!("remove {trace}/{channel}"));
    }

    fn wakeup_readers(&self, trace: &str, channel: &str, producer: ProducerId) {
        self.record(format!("wakeup {trace}/{channel}#{}", producer.raw()));
    }
}

// ============================================================================
// TESTS
// ============================================================================
