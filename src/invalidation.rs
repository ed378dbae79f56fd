//! Tracks "something in this bucket changed" timestamps.
//!
//! Mutating operations elsewhere in the application (upload, delete, copy)
//! call [`InvalidationTracker::mark_mutated`]; the index manager and search
//! resolver read the latest mark to distrust an otherwise-fresh index.
//! Last write wins; only the most recent mark per key matters.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::model::BucketKey;

#[derive(Debug, Default)]
pub struct InvalidationTracker {
    marks: RwLock<HashMap<BucketKey, i64>>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutation at the current wall-clock time.
    pub fn mark_mutated(&self, key: &BucketKey) {
        self.mark_mutated_at(key, chrono::Utc::now().timestamp_millis());
    }

    /// Record a mutation at an explicit timestamp.
    pub fn mark_mutated_at(&self, key: &BucketKey, timestamp_ms: i64) {
        self.marks.write().insert(key.clone(), timestamp_ms);
        tracing::debug!(
            connection = %key.connection_id,
            bucket = %key.bucket,
            timestamp_ms,
            "bucket_mutated"
        );
    }

    pub fn latest_mark(&self, key: &BucketKey) -> Option<i64> {
        self.marks.read().get(key).copied()
    }

    pub fn clear(&self, key: &BucketKey) {
        self.marks.write().remove(key);
    }

    /// Clear the mark only if it predates `cutoff_ms`.
    ///
    /// Used after a successful re-index: a mutation that landed during the
    /// build must keep the new index flagged stale.
    pub fn clear_if_before(&self, key: &BucketKey, cutoff_ms: i64) {
        let mut marks = self.marks.write();
        if let Some(mark) = marks.get(key).copied()
            && mark < cutoff_ms
        {
            marks.remove(key);
        }
    }
}
