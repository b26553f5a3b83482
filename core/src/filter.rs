//! # Filter Policy Hook
//!
//! A process-wide binary accept/reject switch with per-trace-name
//! overrides. The probe dispatch layer consults this before even
//! attempting a reservation; the engine itself never filters.

use alloc::string::String;
use core::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use spin::RwLock;

// ============================================================================
// FILTER TABLE
// ============================================================================

/// Default-accept/default-reject policy with per-trace overrides
pub struct FilterTable {
    default_accept: AtomicBool,
    overrides: RwLock<HashMap<String, bool>>,
}

impl FilterTable {
    /// Create a table with the given default policy
    pub fn new(default_accept: bool) -> Self {
        Self {
            default_accept: AtomicBool::new(default_accept),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Set the process-wide default policy
    pub fn set_default(&self, accept: bool) {
        self.default_accept.store(accept, Ordering::Relaxed);
    }

    /// Override the policy for one trace name
    pub fn set_policy(&self, trace: &str, accept: bool) {
        self.overrides.write().insert(String::from(trace), accept);
    }

    /// Drop the override for one trace name
    pub fn clear_policy(&self, trace: &str) {
        self.overrides.write().remove(trace);
    }

    /// Should events for this trace be logged?
    pub fn should_trace(&self, trace: &str) -> bool {
        if let Some(&accept) = self.overrides.read().get(trace) {
            return accept;
        }
        self.default_accept.load(Ordering::Relaxed)
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let table = FilterTable::new(true);
        assert!(table.should_trace("anything"));
        table.set_default(false);
        assert!(!table.should_trace("anything"));
    }

    #[test]
    fn test_override_wins() {
        let table = FilterTable::new(false);
        table.set_policy("hot", true);
        assert!(table.should_trace("hot"));
        assert!(!table.should_trace("cold"));
        table.clear_policy("hot");
        assert!(!table.should_trace("hot"));
    }
}
