//! Search Resolver: debounced, cancellable object-key search.
//!
//! One resolver per UI query surface. Each call to [`SearchResolver::search`]
//! supersedes the previous session: its token is cancelled before the new
//! session is accepted, so a superseded session's in-flight page can never
//! leak matches into a newer one (every session has its own accumulator and
//! event stream).
//!
//! Both scopes resolve against a live recursive listing rather than the
//! persisted index: local search is prefix-scoped (the index is bucket-wide,
//! not prefix-partitioned), and global search deliberately re-lists the
//! whole bucket so the caller always sees authoritative, up-to-date counts
//! even when a fresh index exists.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::SearchError;
use crate::listing::{ListRequest, ListingSource};
use crate::model::{BucketKey, ObjectInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// Current folder only.
    Local { prefix: String },
    /// Entire bucket regardless of current folder.
    Global,
}

impl SearchScope {
    fn prefix(&self) -> String {
        match self {
            SearchScope::Local { prefix } => prefix.clone(),
            SearchScope::Global => String::new(),
        }
    }
}

#[derive(Debug)]
pub enum SearchEvent {
    Match(ObjectInfo),
    /// Page-boundary update for in-flight count displays.
    Progress { matches_so_far: usize },
    Completed { total_matches: usize },
    Cancelled,
    Failed(SearchError),
}

/// One in-flight query. Dropped (or cancelled) when superseded.
pub struct SearchSession {
    events: mpsc::UnboundedReceiver<SearchEvent>,
    cancel: CancellationToken,
}

impl SearchSession {
    pub async fn next_event(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the session to completion and return every match.
    ///
    /// A listing failure discards the partial matches accumulated so far;
    /// there is no partial-success result.
    pub async fn wait(mut self) -> Result<Vec<ObjectInfo>, SearchError> {
        let mut matches = Vec::new();
        while let Some(event) = self.events.recv().await {
            match event {
                SearchEvent::Match(obj) => matches.push(obj),
                SearchEvent::Progress { .. } => {}
                SearchEvent::Completed { .. } => return Ok(matches),
                SearchEvent::Cancelled => return Err(SearchError::Cancelled),
                SearchEvent::Failed(e) => return Err(e),
            }
        }
        // Sender dropped without a terminal event: the task was torn down.
        Err(SearchError::Cancelled)
    }
}

pub struct SearchResolver {
    listing: Arc<dyn ListingSource>,
    config: PipelineConfig,
    active: Mutex<Option<CancellationToken>>,
}

impl SearchResolver {
    pub fn new(listing: Arc<dyn ListingSource>, config: PipelineConfig) -> Self {
        Self {
            listing,
            config,
            active: Mutex::new(None),
        }
    }

    /// Start a search, superseding any previous session on this resolver.
    ///
    /// The session debounces before issuing any I/O; an empty or whitespace
    /// query completes immediately with no I/O and no debounce wait.
    pub fn search(&self, key: BucketKey, query: &str, scope: SearchScope) -> SearchSession {
        let cancel = CancellationToken::new();
        if let Some(prev) = self.active.lock().replace(cancel.clone()) {
            prev.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            let _ = tx.send(SearchEvent::Completed { total_matches: 0 });
            return SearchSession { events: rx, cancel };
        }

        tokio::spawn(run_scan(ScanContext {
            listing: self.listing.clone(),
            key,
            needle,
            prefix: scope.prefix(),
            debounce: self.config.search_debounce,
            page_size: self.config.list_page_size,
            cancel: cancel.clone(),
            tx,
        }));
        SearchSession { events: rx, cancel }
    }

    /// Clear the surface: cancel the active session without starting a new one.
    pub fn clear(&self) {
        if let Some(prev) = self.active.lock().take() {
            prev.cancel();
        }
    }
}

struct ScanContext {
    listing: Arc<dyn ListingSource>,
    key: BucketKey,
    /// Lowercased query text; matching is case-insensitive substring.
    needle: String,
    prefix: String,
    debounce: std::time::Duration,
    page_size: u32,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<SearchEvent>,
}

async fn run_scan(ctx: ScanContext) {
    // Debounce: superseded keystrokes die here without any I/O.
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            let _ = ctx.tx.send(SearchEvent::Cancelled);
            return;
        }
        _ = tokio::time::sleep(ctx.debounce) => {}
    }

    info!(
        connection = %ctx.key.connection_id,
        bucket = %ctx.key.bucket,
        prefix = %ctx.prefix,
        "search_start"
    );

    let mut continuation: Option<String> = None;
    let mut matches_so_far = 0usize;
    loop {
        // Cancellation is honored before the next page fetch, never mid-page.
        if ctx.cancel.is_cancelled() {
            let _ = ctx.tx.send(SearchEvent::Cancelled);
            return;
        }

        let req = ListRequest {
            key: ctx.key.clone(),
            prefix: ctx.prefix.clone(),
            continuation: continuation.take(),
            page_size: ctx.page_size,
            recursive: true,
        };
        let page = match ctx.listing.list(req).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    connection = %ctx.key.connection_id,
                    bucket = %ctx.key.bucket,
                    error = %e,
                    "search_failed"
                );
                let _ = ctx.tx.send(SearchEvent::Failed(e.into()));
                return;
            }
        };

        // Superseded while the page was in flight: the request was allowed
        // to complete, but a dead session emits nothing.
        if ctx.cancel.is_cancelled() {
            let _ = ctx.tx.send(SearchEvent::Cancelled);
            return;
        }

        for obj in page.objects {
            if obj.key.to_lowercase().contains(&ctx.needle) {
                matches_so_far += 1;
                let _ = ctx.tx.send(SearchEvent::Match(obj));
            }
        }
        let _ = ctx.tx.send(SearchEvent::Progress { matches_so_far });

        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    let _ = ctx.tx.send(SearchEvent::Completed {
        total_matches: matches_so_far,
    });
    info!(matches = matches_so_far, "search_complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListingError;
    use crate::model::ListPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn obj(key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: 1,
            last_modified_ms: 0,
        }
    }

    /// Serves pre-seeded objects with prefix filtering and numeric
    /// continuation tokens; optionally fails after N calls.
    struct FakeListing {
        objects: Vec<ObjectInfo>,
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl FakeListing {
        fn new(objects: Vec<ObjectInfo>) -> Self {
            Self {
                objects,
                calls: AtomicUsize::new(0),
                fail_after: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ListingSource for FakeListing {
        async fn list(&self, req: ListRequest) -> Result<ListPage, ListingError> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(limit) = self.fail_after
                && calls > limit
            {
                return Err(ListingError::Request("connection reset".into()));
            }
            let filtered: Vec<ObjectInfo> = self
                .objects
                .iter()
                .filter(|o| o.key.starts_with(&req.prefix))
                .cloned()
                .collect();
            let start: usize = req
                .continuation
                .as_deref()
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            let end = (start + req.page_size as usize).min(filtered.len());
            let continuation = (end < filtered.len()).then(|| end.to_string());
            Ok(ListPage {
                objects: filtered[start..end].to_vec(),
                continuation,
            })
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            search_debounce: Duration::from_millis(5),
            ..PipelineConfig::default()
        }
    }

    fn key() -> BucketKey {
        BucketKey::new("conn", "bucket")
    }

    #[tokio::test]
    async fn local_scope_only_sees_the_prefix() {
        let listing = Arc::new(FakeListing::new(vec![
            obj("2024/report.pdf"),
            obj("2023/report.pdf"),
        ]));
        let resolver = SearchResolver::new(listing, fast_config());
        let session = resolver.search(
            key(),
            "report",
            SearchScope::Local {
                prefix: "2024/".into(),
            },
        );
        let matches = session.wait().await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, "2024/report.pdf");
    }

    #[tokio::test]
    async fn global_scope_matches_case_insensitively() {
        let listing = Arc::new(FakeListing::new(vec![
            obj("docs/Quarterly-REPORT.pdf"),
            obj("logs/2024.log"),
        ]));
        let resolver = SearchResolver::new(listing, fast_config());
        let session = resolver.search(key(), "Report", SearchScope::Global);
        let matches = session.wait().await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, "docs/Quarterly-REPORT.pdf");
    }

    #[tokio::test]
    async fn empty_query_completes_without_io() {
        let listing = Arc::new(FakeListing::new(vec![obj("a.txt")]));
        let resolver = SearchResolver::new(listing.clone(), fast_config());
        let session = resolver.search(key(), "   ", SearchScope::Global);
        let matches = session.wait().await.unwrap();
        assert!(matches.is_empty());
        assert_eq!(listing.call_count(), 0);
    }

    #[tokio::test]
    async fn accumulates_across_pages_with_progress() {
        let objects: Vec<ObjectInfo> = (0..25).map(|i| obj(&format!("logs/app-{i}.log"))).collect();
        let listing = Arc::new(FakeListing::new(objects));
        let resolver = SearchResolver::new(
            listing.clone(),
            PipelineConfig {
                search_debounce: Duration::from_millis(5),
                list_page_size: 10,
                ..PipelineConfig::default()
            },
        );
        let mut session = resolver.search(key(), "app-", SearchScope::Global);

        let mut matches = 0usize;
        let mut progress_updates = Vec::new();
        while let Some(event) = session.next_event().await {
            match event {
                SearchEvent::Match(_) => matches += 1,
                SearchEvent::Progress { matches_so_far } => progress_updates.push(matches_so_far),
                SearchEvent::Completed { total_matches } => {
                    assert_eq!(total_matches, 25);
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(matches, 25);
        assert_eq!(progress_updates, vec![10, 20, 25]);
        assert_eq!(listing.call_count(), 3);
    }

    #[tokio::test]
    async fn listing_failure_discards_partial_matches() {
        let objects: Vec<ObjectInfo> = (0..25).map(|i| obj(&format!("logs/app-{i}.log"))).collect();
        let mut listing = FakeListing::new(objects);
        listing.fail_after = Some(1);
        let resolver = SearchResolver::new(
            Arc::new(listing),
            PipelineConfig {
                search_debounce: Duration::from_millis(5),
                list_page_size: 10,
                ..PipelineConfig::default()
            },
        );
        let session = resolver.search(key(), "app-", SearchScope::Global);
        let result = session.wait().await;
        assert!(matches!(result, Err(SearchError::Listing(_))));
    }

    #[tokio::test]
    async fn new_search_supersedes_previous_session() {
        let listing = Arc::new(FakeListing::new(vec![obj("a.txt"), obj("ab.txt")]));
        let resolver = SearchResolver::new(listing, fast_config());

        // Superseded while still debouncing: no I/O, cancelled terminal.
        let first = resolver.search(key(), "a", SearchScope::Global);
        let second = resolver.search(key(), "ab", SearchScope::Global);

        assert!(matches!(first.wait().await, Err(SearchError::Cancelled)));
        let matches = second.wait().await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, "ab.txt");
    }

    #[tokio::test]
    async fn clear_cancels_the_active_session() {
        let listing = Arc::new(FakeListing::new(vec![obj("a.txt")]));
        let resolver = SearchResolver::new(listing.clone(), fast_config());
        let session = resolver.search(key(), "a", SearchScope::Global);
        resolver.clear();
        assert!(matches!(session.wait().await, Err(SearchError::Cancelled)));
        assert_eq!(listing.call_count(), 0);
    }
}
