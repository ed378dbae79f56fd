//! Pipeline tunables.
//!
//! Defaults are compiled in; each knob can be overridden through the
//! environment (`S3SEEK_*`). Every knob affects performance or staleness
//! thresholds only, never correctness.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INDEX_TTL_HOURS: u64 = 24;
pub const DEFAULT_MAX_LIST_REQUESTS: u32 = 50;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_SUB_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Age past which a stored index is considered stale.
    pub index_ttl: Duration,
    /// Listing-request ceiling for partial ("quick") builds.
    pub max_list_requests: u32,
    /// Keystroke settle time before a search issues any I/O.
    pub search_debounce: Duration,
    /// Objects requested per listing page.
    pub list_page_size: u32,
    /// Records processed between scheduler yields in the chunk worker.
    pub sub_chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_ttl: Duration::from_secs(DEFAULT_INDEX_TTL_HOURS * 3600),
            max_list_requests: DEFAULT_MAX_LIST_REQUESTS,
            search_debounce: Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            sub_chunk_size: DEFAULT_SUB_CHUNK_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Defaults plus any `S3SEEK_*` environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(hours) = env_parse::<u64>("S3SEEK_INDEX_TTL_HOURS") {
            cfg.index_ttl = Duration::from_secs(hours * 3600);
        }
        if let Some(n) = env_parse::<u32>("S3SEEK_MAX_LIST_REQUESTS") {
            cfg.max_list_requests = n;
        }
        if let Some(ms) = env_parse::<u64>("S3SEEK_SEARCH_DEBOUNCE_MS") {
            cfg.search_debounce = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("S3SEEK_LIST_PAGE_SIZE") {
            cfg.list_page_size = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("S3SEEK_SUB_CHUNK_SIZE") {
            cfg.sub_chunk_size = n.max(1);
        }
        cfg
    }

    pub fn ttl_ms(&self) -> i64 {
        self.index_ttl.as_millis() as i64
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    dotenvy::var(name).ok().and_then(|v| v.parse().ok())
}

/// Default location of the persisted index database.
pub fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "s3seek", "s3seek")
        .expect("project dirs available")
        .data_dir()
        .join("object_index.db")
}
