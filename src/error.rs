//! Domain error kinds.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::BucketKey;

/// Failure from the object-listing API (network, auth, permissions).
///
/// Aborts the build or search session that issued the request; any
/// previously stored index stays authoritative.
#[derive(Debug, Clone, Error)]
pub enum ListingError {
    #[error("listing request failed: {0}")]
    Request(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
}

/// Errors from the persisted index store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No index has been built for this key. Callers treat this as
    /// "needs build", not as a fatal condition.
    #[error("no stored index for {0}")]
    IndexNotFound(BucketKey),
    #[error("failed to open index store at {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("index store schema version {found} is newer than supported {supported}")]
    SchemaVersion { found: i64, supported: i64 },
    #[error("index store I/O error")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to decode stored records")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode records")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Terminal error of a search session.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error(transparent)]
    Listing(#[from] ListingError),
    /// Cooperative cancellation; a distinct terminal state, not a failure.
    #[error("search cancelled")]
    Cancelled,
}
