//! Core entity structs shared across the index pipeline.

use serde::{Deserialize, Serialize};

/// Identifies one bucket under one configured connection profile.
///
/// Every per-bucket piece of state in the pipeline (stored indexes, build
/// jobs, invalidation marks) is keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub connection_id: String,
    pub bucket: String,
}

impl BucketKey {
    pub fn new(connection_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            bucket: bucket.into(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.bucket)
    }
}

/// Raw object metadata as returned by the listing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified_ms: i64,
}

/// One page of listing results plus the token for the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub continuation: Option<String>,
}

/// A single indexed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub key: String,
    pub size: u64,
    pub last_modified_ms: i64,
    /// Lowercased `key`, computed once at index time so repeated
    /// case-insensitive matching never re-lowercases millions of keys.
    pub search_key: String,
}

impl IndexRecord {
    pub fn from_object(obj: ObjectInfo) -> Self {
        let search_key = obj.key.to_lowercase();
        Self {
            key: obj.key,
            size: obj.size,
            last_modified_ms: obj.last_modified_ms,
            search_key,
        }
    }
}

/// A finalized index of one bucket's keys.
///
/// Immutable once built; the store replaces the row wholesale so readers
/// never observe a half-written index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketIndex {
    pub key: BucketKey,
    pub built_at_ms: i64,
    pub total_objects: u64,
    /// Serialized byte size of the record payload (storage/UX estimate).
    pub size_bytes: u64,
    /// `false` when the build stopped at a request ceiling.
    pub is_complete: bool,
    pub records: Vec<IndexRecord>,
}

/// Metadata-only view of a stored index, cheap to read (no record payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub built_at_ms: i64,
    pub total_objects: u64,
    pub size_bytes: u64,
    pub is_complete: bool,
}

impl IndexStats {
    /// Staleness rule: older than the TTL, or a mutation mark newer than
    /// the build. Either condition alone is sufficient.
    pub fn is_stale(&self, latest_mark_ms: Option<i64>, now_ms: i64, ttl_ms: i64) -> bool {
        if now_ms - self.built_at_ms > ttl_ms {
            return true;
        }
        matches!(latest_mark_ms, Some(mark) if mark > self.built_at_ms)
    }
}

/// How far a build is allowed to paginate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    /// Bounded "quick" build, capped at a number of listing requests.
    Partial { max_requests: u32 },
    /// Runs until the listing source reports no continuation token.
    Full,
}

impl BuildMode {
    pub fn max_requests(&self) -> Option<u32> {
        match self {
            BuildMode::Partial { max_requests } => Some(*max_requests),
            BuildMode::Full => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// The request ceiling of a partial build was hit.
    PartialComplete,
    Cancelled,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Snapshot of one build job's progress, published on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub key: BucketKey,
    pub mode: BuildMode,
    pub status: JobStatus,
    pub objects_indexed: u64,
    pub requests_made: u32,
}
