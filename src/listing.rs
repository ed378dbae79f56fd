//! Boundary trait for the paginated object-listing API.
//!
//! The pipeline never talks to the object store directly; it consumes this
//! trait so the transport (SDK client, HTTP, test double) stays pluggable.

use async_trait::async_trait;

use crate::error::ListingError;
use crate::model::{BucketKey, ListPage};

/// One page request against the object store.
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub key: BucketKey,
    /// Key prefix to scope the listing; empty for the whole bucket.
    pub prefix: String,
    /// Token from the previous page; `None` starts from the beginning.
    pub continuation: Option<String>,
    pub page_size: u32,
    /// When false, the store collapses common prefixes (folder view).
    pub recursive: bool,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn list(&self, req: ListRequest) -> Result<ListPage, ListingError>;
}
