//! Per-identity rate limit on match snapshots.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Decides whether a match may carry a fresh snapshot.
///
/// State is shared by every caller in the process. Entries are never
/// evicted; identity cardinality is expected to stay small.
pub struct SnapshotThrottle {
    enabled: bool,
    interval: Duration,
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl SnapshotThrottle {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn should_emit(&self, identity_id: &str) -> bool {
        self.should_emit_at(identity_id, Instant::now())
    }

    /// Check and record in one step: at most one caller wins per window.
    pub fn should_emit_at(&self, identity_id: &str, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        if self.interval.is_zero() {
            return true;
        }

        let mut last = match self.last_emitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&at) = last.get(identity_id) {
            if now.saturating_duration_since(at) < self.interval {
                return false;
            }
        }
        last.insert(identity_id.to_string(), now);
        true
    }

    /// Number of identities with a recorded emission.
    pub fn tracked(&self) -> usize {
        self.last_emitted.lock().map(|m| m.len()).unwrap_or(0)
    }
}
