//! Index Manager: orchestrates background index builds.
//!
//! One build job at most per `(connection_id, bucket)` key; duplicate start
//! requests return the existing job's handle instead of queuing. The build
//! loop is strictly sequential (one outstanding listing request at a time)
//! and checks cancellation before every page fetch. Cancelled and failed
//! builds never touch the store, so the prior index (if any) stays
//! authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::ChunkProcessor;
use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::invalidation::InvalidationTracker;
use crate::listing::{ListRequest, ListingSource};
use crate::model::{BucketKey, BuildJob, BuildMode, IndexStats, JobStatus};
use crate::store::IndexStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Job-progress event for UI consumption. Observability only; nothing
/// depends on delivery for correctness, so slow subscribers may lag.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub key: BucketKey,
    pub status: JobStatus,
    pub objects_indexed: u64,
    pub requests_made: u32,
    pub requests_max: Option<u32>,
}

/// Handle to a build job: live snapshots plus cooperative cancellation.
#[derive(Debug, Clone)]
pub struct JobHandle {
    rx: watch::Receiver<BuildJob>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn snapshot(&self) -> BuildJob {
        self.rx.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal status.
    pub async fn wait(&mut self) -> BuildJob {
        loop {
            let snap = self.rx.borrow_and_update().clone();
            if snap.status.is_terminal() {
                return snap;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

struct JobEntry {
    handle: JobHandle,
    cancel: CancellationToken,
}

/// Owns build orchestration for the whole application.
///
/// Constructed once at startup (inside a Tokio runtime) and injected into
/// consumers; call [`IndexManager::shutdown`] at teardown.
pub struct IndexManager {
    listing: Arc<dyn ListingSource>,
    store: Arc<IndexStore>,
    invalidation: Arc<InvalidationTracker>,
    config: PipelineConfig,
    jobs: Mutex<HashMap<BucketKey, JobEntry>>,
    events: broadcast::Sender<JobEvent>,
}

impl IndexManager {
    pub fn new(
        listing: Arc<dyn ListingSource>,
        store: Arc<IndexStore>,
        invalidation: Arc<InvalidationTracker>,
        config: PipelineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listing,
            store,
            invalidation,
            config,
            jobs: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Begin a partial build capped at `max_requests` listing calls.
    pub fn start_indexing(&self, key: BucketKey, max_requests: u32) -> JobHandle {
        self.start(key, BuildMode::Partial { max_requests })
    }

    /// Partial build with the configured default request ceiling.
    pub fn start_quick_indexing(&self, key: BucketKey) -> JobHandle {
        self.start_indexing(key, self.config.max_list_requests)
    }

    /// Begin an unbounded build that runs until continuation tokens are
    /// exhausted.
    pub fn start_full_indexing(&self, key: BucketKey) -> JobHandle {
        self.start(key, BuildMode::Full)
    }

    fn start(&self, key: BucketKey, mode: BuildMode) -> JobHandle {
        let mut jobs = self.jobs.lock();
        if let Some(entry) = jobs.get(&key)
            && !entry.handle.snapshot().status.is_terminal()
        {
            // Dedup, not queuing: hand back the running job.
            debug!(connection = %key.connection_id, bucket = %key.bucket, "build_already_running");
            return entry.handle.clone();
        }

        let job = BuildJob {
            key: key.clone(),
            mode,
            status: JobStatus::Pending,
            objects_indexed: 0,
            requests_made: 0,
        };
        let (job_tx, job_rx) = watch::channel(job);
        let cancel = CancellationToken::new();
        let handle = JobHandle {
            rx: job_rx,
            cancel: cancel.clone(),
        };

        tokio::spawn(run_build(BuildContext {
            key: key.clone(),
            mode,
            listing: self.listing.clone(),
            store: self.store.clone(),
            invalidation: self.invalidation.clone(),
            config: self.config.clone(),
            job_tx,
            events: self.events.clone(),
            cancel: cancel.clone(),
        }));

        jobs.insert(
            key,
            JobEntry {
                handle: handle.clone(),
                cancel,
            },
        );
        handle
    }

    /// Signal cooperative cancellation. The in-flight page fetch completes;
    /// no further pages are requested and nothing is finalized.
    pub fn cancel_indexing(&self, key: &BucketKey) {
        let jobs = self.jobs.lock();
        if let Some(entry) = jobs.get(key) {
            entry.cancel.cancel();
            info!(connection = %key.connection_id, bucket = %key.bucket, "build_cancel_requested");
        }
    }

    /// Cheap metadata read; never triggers a build.
    pub fn get_index_stats(&self, key: &BucketKey) -> Option<IndexStats> {
        match self.store.get_meta(key) {
            Ok(stats) => Some(stats),
            Err(StoreError::IndexNotFound(_)) => None,
            Err(e) => {
                warn!(connection = %key.connection_id, bucket = %key.bucket, error = %e, "index_stats_failed");
                None
            }
        }
    }

    /// True iff a stored index exists, regardless of staleness.
    pub fn is_indexed(&self, key: &BucketKey) -> bool {
        match self.store.contains(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(connection = %key.connection_id, bucket = %key.bucket, error = %e, "is_indexed_failed");
                false
            }
        }
    }

    /// Combined staleness check: TTL age or a later invalidation mark.
    ///
    /// A missing index is `IndexNotFound` ("needs build"), not stale.
    pub fn is_stale(&self, key: &BucketKey) -> Result<bool, StoreError> {
        let meta = self.store.get_meta(key)?;
        let mark = self.invalidation.latest_mark(key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(meta.is_stale(mark, now_ms, self.config.ttl_ms()))
    }

    /// Latest snapshot of the build job for this key, if any was started.
    pub fn job_status(&self, key: &BucketKey) -> Option<BuildJob> {
        self.jobs.lock().get(key).map(|e| e.handle.snapshot())
    }

    /// Delete the stored index and any job bookkeeping for the key.
    pub fn clear_index(&self, key: &BucketKey) -> Result<bool, StoreError> {
        if let Some(entry) = self.jobs.lock().remove(key) {
            entry.cancel.cancel();
        }
        self.store.delete(key)
    }

    /// Subscribe to the job-progress event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Cancel all in-flight builds. Called once at application teardown.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (_, entry) in jobs.drain() {
            entry.cancel.cancel();
        }
        info!("index manager shut down");
    }
}

struct BuildContext {
    key: BucketKey,
    mode: BuildMode,
    listing: Arc<dyn ListingSource>,
    store: Arc<IndexStore>,
    invalidation: Arc<InvalidationTracker>,
    config: PipelineConfig,
    job_tx: watch::Sender<BuildJob>,
    events: broadcast::Sender<JobEvent>,
    cancel: CancellationToken,
}

async fn run_build(ctx: BuildContext) {
    let started_at_ms = chrono::Utc::now().timestamp_millis();
    let requests_max = ctx.mode.max_requests();
    let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
    let processor = ChunkProcessor::spawn(ctx.config.sub_chunk_size, tick_tx);

    let mut job = ctx.job_tx.borrow().clone();
    if let Err(e) = processor.init(ctx.key.clone()).await {
        job.status = JobStatus::Failed(e.to_string());
        publish(&ctx, &job, requests_max);
        return;
    }
    job.status = JobStatus::Running;
    publish(&ctx, &job, requests_max);
    info!(
        connection = %ctx.key.connection_id,
        bucket = %ctx.key.bucket,
        mode = ?ctx.mode,
        "build_start"
    );

    let mut continuation: Option<String> = None;
    let outcome = loop {
        // Cancellation and the request ceiling are both checked at the loop
        // boundary, before the next page fetch.
        if ctx.cancel.is_cancelled() {
            break JobStatus::Cancelled;
        }
        if let Some(max) = requests_max
            && job.requests_made >= max
        {
            break JobStatus::PartialComplete;
        }

        let req = ListRequest {
            key: ctx.key.clone(),
            prefix: String::new(),
            continuation: continuation.take(),
            page_size: ctx.config.list_page_size,
            recursive: true,
        };
        let page = match ctx.listing.list(req).await {
            Ok(page) => page,
            Err(e) => break JobStatus::Failed(e.to_string()),
        };
        job.requests_made += 1;

        let total = match processor.process_batch(page.objects).await {
            Ok(total) => total,
            Err(e) => break JobStatus::Failed(e.to_string()),
        };

        // Re-emit the chunk worker's sub-chunk ticks as job-progress events.
        while let Ok(tick) = tick_rx.try_recv() {
            let _ = ctx.events.send(JobEvent {
                key: ctx.key.clone(),
                status: JobStatus::Running,
                objects_indexed: tick.total_so_far as u64,
                requests_made: job.requests_made,
                requests_max,
            });
        }

        job.objects_indexed = total;
        publish(&ctx, &job, requests_max);

        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break JobStatus::Completed,
        }
    };

    match outcome {
        JobStatus::Completed | JobStatus::PartialComplete => {
            let is_complete = matches!(outcome, JobStatus::Completed);
            match processor.finalize(is_complete).await {
                Ok(index) => match ctx.store.put(&index) {
                    Ok(()) => {
                        // A mutation that raced in during the build keeps
                        // the new index flagged stale.
                        ctx.invalidation.clear_if_before(&ctx.key, started_at_ms);
                        info!(
                            connection = %ctx.key.connection_id,
                            bucket = %ctx.key.bucket,
                            objects = index.total_objects,
                            size_bytes = index.size_bytes,
                            complete = is_complete,
                            requests = job.requests_made,
                            "build_finalized"
                        );
                        job.status = outcome;
                    }
                    Err(e) => {
                        warn!(connection = %ctx.key.connection_id, bucket = %ctx.key.bucket, error = %e, "build_store_failed");
                        job.status = JobStatus::Failed(e.to_string());
                    }
                },
                Err(e) => {
                    warn!(connection = %ctx.key.connection_id, bucket = %ctx.key.bucket, error = %e, "build_finalize_failed");
                    job.status = JobStatus::Failed(e.to_string());
                }
            }
        }
        JobStatus::Cancelled => {
            info!(
                connection = %ctx.key.connection_id,
                bucket = %ctx.key.bucket,
                objects = job.objects_indexed,
                "build_cancelled"
            );
            job.status = JobStatus::Cancelled;
        }
        JobStatus::Failed(reason) => {
            warn!(
                connection = %ctx.key.connection_id,
                bucket = %ctx.key.bucket,
                error = %reason,
                "build_failed"
            );
            job.status = JobStatus::Failed(reason);
        }
        JobStatus::Pending | JobStatus::Running => unreachable!("loop breaks with a terminal status"),
    }

    publish(&ctx, &job, requests_max);
}

fn publish(ctx: &BuildContext, job: &BuildJob, requests_max: Option<u32>) {
    let _ = ctx.events.send(JobEvent {
        key: job.key.clone(),
        status: job.status.clone(),
        objects_indexed: job.objects_indexed,
        requests_made: job.requests_made,
        requests_max,
    });
    let _ = ctx.job_tx.send(job.clone());
}
