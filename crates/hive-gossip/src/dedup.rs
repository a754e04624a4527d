use std::collections::HashMap;
use std::sync::Mutex;

use hive_core::constants::DEDUP_TTL_SECS;
use hive_core::types::{MsgId, Timestamp};

/// Bounded seen-message cache. Entries age out after roughly an hour via the
/// periodic GC sweep; a message relayed N times dispatches to handlers
/// exactly once.
pub struct Deduplicator {
    seen: Mutex<HashMap<MsgId, Timestamp>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()) }
    }

    /// Record `msg_id` if unseen. Returns true when the message should be
    /// processed, false for a duplicate.
    pub fn check_and_mark(&self, msg_id: &MsgId, now: Timestamp) -> bool {
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        if seen.contains_key(msg_id) {
            return false;
        }
        seen.insert(msg_id.clone(), now);
        true
    }

    pub fn is_duplicate(&self, msg_id: &MsgId) -> bool {
        self.seen.lock().expect("dedup lock poisoned").contains_key(msg_id)
    }

    /// Drop entries older than the dedup TTL. Returns the count removed.
    pub fn gc(&self, now: Timestamp) -> usize {
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        let before = seen.len();
        seen.retain(|_, ts| now - *ts < DEDUP_TTL_SECS);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
