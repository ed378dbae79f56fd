//! Chunk Processor: normalizes raw listing batches into index records on a
//! dedicated worker thread.
//!
//! The worker owns the in-progress accumulator for exactly one build and
//! talks to its orchestrator only through messages: commands in over a
//! crossbeam channel, replies back over oneshots, progress ticks over an
//! unbounded mpsc. No memory is shared with the caller, so indexing tens of
//! thousands of records never blocks the embedding application's UI thread.
//!
//! Batches are split into fixed-size sub-chunks; after each sub-chunk the
//! worker emits a tick and yields, bounding how long one command can
//! monopolize the thread.

use std::collections::HashSet;
use std::thread;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tokio::sync::{mpsc, oneshot};

use crate::model::{BucketIndex, BucketKey, IndexRecord, ObjectInfo};

/// Progress emitted after each sub-chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTick {
    /// Records processed within the current batch so far.
    pub current: usize,
    /// Records accumulated across the whole build so far.
    pub total_so_far: usize,
}

enum Command {
    Init {
        key: BucketKey,
        reply: oneshot::Sender<()>,
    },
    ProcessBatch {
        objects: Vec<ObjectInfo>,
        reply: oneshot::Sender<u64>,
    },
    Finalize {
        is_complete: bool,
        reply: oneshot::Sender<BucketIndex>,
    },
    Shutdown,
}

/// Handle to one build's worker thread.
///
/// Calling `process_batch` or `finalize` before `init` is a programming
/// error: the worker panics and every subsequent call returns an error.
pub struct ChunkProcessor {
    tx: Sender<Command>,
}

impl ChunkProcessor {
    /// Spawn a worker for a single build. Ticks flow to `progress`.
    pub fn spawn(sub_chunk_size: usize, progress: mpsc::UnboundedSender<ProgressTick>) -> Self {
        let (tx, rx) = unbounded();
        let sub_chunk = sub_chunk_size.max(1);
        thread::Builder::new()
            .name("chunk-processor".into())
            .spawn(move || run_worker(rx, sub_chunk, progress))
            .expect("spawn chunk worker thread");
        Self { tx }
    }

    /// Reset the accumulator for a fresh build of `key`.
    pub async fn init(&self, key: BucketKey) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Init { key, reply })
            .map_err(|_| anyhow!("chunk worker terminated"))?;
        rx.await.map_err(|_| anyhow!("chunk worker terminated"))
    }

    /// Feed one batch of raw listing records. Returns the total number of
    /// records accumulated so far (duplicates within the build are dropped).
    pub async fn process_batch(&self, objects: Vec<ObjectInfo>) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ProcessBatch { objects, reply })
            .map_err(|_| anyhow!("chunk worker terminated"))?;
        rx.await.map_err(|_| anyhow!("chunk worker terminated"))
    }

    /// Consume the accumulator into an immutable [`BucketIndex`].
    pub async fn finalize(self, is_complete: bool) -> Result<BucketIndex> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Finalize { is_complete, reply })
            .map_err(|_| anyhow!("chunk worker terminated"))?;
        rx.await.map_err(|_| anyhow!("chunk worker terminated"))
    }
}

impl Drop for ChunkProcessor {
    fn drop(&mut self) {
        // Worker exits on its own after Finalize; this covers abandoned builds.
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct Accumulator {
    key: BucketKey,
    records: Vec<IndexRecord>,
    seen: HashSet<String>,
}

impl Accumulator {
    fn new(key: BucketKey) -> Self {
        Self {
            key,
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn push(&mut self, obj: ObjectInfo) {
        if self.seen.insert(obj.key.clone()) {
            self.records.push(IndexRecord::from_object(obj));
        }
    }

    fn finalize(self, is_complete: bool) -> BucketIndex {
        let size_bytes = rmp_serde::to_vec(&self.records)
            .expect("index records serialize")
            .len() as u64;
        BucketIndex {
            key: self.key,
            built_at_ms: chrono::Utc::now().timestamp_millis(),
            total_objects: self.records.len() as u64,
            size_bytes,
            is_complete,
            records: self.records,
        }
    }
}

fn run_worker(
    rx: Receiver<Command>,
    sub_chunk: usize,
    progress: mpsc::UnboundedSender<ProgressTick>,
) {
    let mut acc: Option<Accumulator> = None;
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Init { key, reply } => {
                acc = Some(Accumulator::new(key));
                let _ = reply.send(());
            }
            Command::ProcessBatch { objects, reply } => {
                let acc = acc
                    .as_mut()
                    .expect("process_batch called before init on chunk processor");
                let batch_len = objects.len();
                let mut processed = 0usize;
                let mut in_sub = 0usize;
                for obj in objects {
                    acc.push(obj);
                    processed += 1;
                    in_sub += 1;
                    if in_sub >= sub_chunk || processed == batch_len {
                        in_sub = 0;
                        let _ = progress.send(ProgressTick {
                            current: processed,
                            total_so_far: acc.records.len(),
                        });
                        thread::yield_now();
                    }
                }
                let _ = reply.send(acc.records.len() as u64);
            }
            Command::Finalize { is_complete, reply } => {
                let acc = acc
                    .take()
                    .expect("finalize called before init on chunk processor");
                let _ = reply.send(acc.finalize(is_complete));
                break;
            }
            Command::Shutdown => break,
        }
    }
}
