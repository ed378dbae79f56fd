//! Client-side object index and search for S3-compatible bucket browsing.
//!
//! A background pipeline that incrementally builds a searchable index of
//! bucket keys, persists it across restarts, detects staleness from both
//! age and external mutation, and resolves interactive queries through
//! debounced, cancellable live scans.
//!
//! Data flow: listing source → [`manager::IndexManager`] →
//! [`chunk::ChunkProcessor`] → [`store::IndexStore`], with
//! [`invalidation::InvalidationTracker`] feeding staleness decisions and
//! [`search::SearchResolver`] serving queries.

pub mod chunk;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod listing;
pub mod manager;
pub mod model;
pub mod search;
pub mod store;

pub use chunk::{ChunkProcessor, ProgressTick};
pub use config::PipelineConfig;
pub use error::{ListingError, SearchError, StoreError};
pub use invalidation::InvalidationTracker;
pub use listing::{ListRequest, ListingSource};
pub use manager::{IndexManager, JobEvent, JobHandle};
pub use model::{
    BucketIndex, BucketKey, BuildJob, BuildMode, IndexRecord, IndexStats, JobStatus, ListPage,
    ObjectInfo,
};
pub use search::{SearchEvent, SearchResolver, SearchScope, SearchSession};
pub use store::IndexStore;
