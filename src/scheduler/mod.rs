//! Wishlist Auto-Retry Scheduler (C9, spec §4.8): a fixed-interval timer
//! that drains a bounded slice of the wishlist and drives it through the
//! Download Fulfillment Engine (C5), reconciling each task's terminal
//! outcome back into the wishlist (delete on success, bump `retry_count` on
//! failure). Runs as its own single-worker executor (spec §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::catalog::{CatalogError, CatalogStore};
use crate::fulfillment::{Engine, FulfillmentError, FulfillmentRequest, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum WishlistSchedulerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),
}

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_BATCH_SIZE: i64 = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RetrySummary {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct WishlistAutoRetryScheduler {
    store: Arc<CatalogStore>,
    engine: Engine,
    batch_size: i64,
    in_progress: AtomicBool,
}

impl WishlistAutoRetryScheduler {
    pub fn new(store: Arc<CatalogStore>, engine: Engine, batch_size: i64) -> Self {
        Self { store, engine, batch_size, in_progress: AtomicBool::new(false) }
    }

    /// Runs forever at `interval`, draining a bounded slice of the wishlist
    /// each tick (spec §4.8). Stops as soon as `shutdown` fires.
    pub async fn run_loop(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) => log::info!(
                            "wishlist auto-retry: submitted {}, {} succeeded, {} failed",
                            summary.submitted, summary.succeeded, summary.failed
                        ),
                        Err(err) => log::warn!("wishlist auto-retry tick failed: {err}"),
                    }
                }
            }
        }
    }

    /// One tick. If a prior run hasn't finished draining yet, returns
    /// immediately with an empty summary (spec §4.8 step 1) instead of
    /// stacking a second concurrent drain.
    pub async fn tick(&self) -> Result<RetrySummary, WishlistSchedulerError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Ok(RetrySummary::default());
        }
        let result = self.run_drain().await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_drain(&self) -> Result<RetrySummary, WishlistSchedulerError> {
        let entries = self.store.wishlist().next_batch(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(RetrySummary::default());
        }

        let requests: Vec<FulfillmentRequest> = entries
            .iter()
            .map(|entry| FulfillmentRequest {
                descriptor: entry.descriptor().clone(),
                source_type: entry.source_type(),
                source_info: entry.source_info().clone(),
                // Wishlist retries are always background-class, even if the
                // original failure originated from an album-card download
                // (spec §9 Open Question: the marker is not propagated).
                is_album_download: false,
                track_number: None,
            })
            .collect();

        let mut summary = RetrySummary { submitted: requests.len(), ..Default::default() };

        let batch_id = self.engine.submit_batch(requests, None).await;

        while !self.engine.is_batch_complete(batch_id).await.unwrap_or(true) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let outcomes = self.engine.batch_outcomes(batch_id).await?;
        self.engine.forget_batch(batch_id).await;

        for outcome in outcomes {
            match outcome.status {
                TaskStatus::Done => {
                    summary.succeeded += 1;
                    if let Err(err) = self.store.wishlist().remove(&outcome.external_track_id).await {
                        log::warn!("failed to remove satisfied wishlist entry {}: {err}", outcome.external_track_id);
                    }
                }
                TaskStatus::Failed => {
                    summary.failed += 1;
                    let reason = outcome.failure_reason.unwrap_or_else(|| "unknown failure".to_string());
                    if let Err(err) =
                        self.store.wishlist().record_retry_attempt(&outcome.external_track_id, &reason, Utc::now()).await
                    {
                        log::warn!("failed to record wishlist retry for {}: {err}", outcome.external_track_id);
                    }
                }
                _ => {
                    // Cancelled, or still non-terminal somehow: leave the
                    // row untouched, it re-enters next tick's `next_batch`.
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;
    use crate::domain::wishlist::{AlbumDescriptor, SourceType, TrackDescriptor, WishlistEntry};
    use crate::p2p::cache::TransferCache;
    use crate::p2p::{AlbumCandidate, P2pClient, P2pClientError, SearchResults, TrackCandidate, TransferRecord};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn descriptor(id: &str) -> TrackDescriptor {
        TrackDescriptor {
            id: id.to_string(),
            name: "Kerala".into(),
            artists: vec!["Bonobo".into()],
            album: AlbumDescriptor {
                id: "alb:1".into(),
                name: "Migration".into(),
                images: vec![],
                release_date: Some("2017-01-13".into()),
                album_type: Some("album".into()),
            },
            duration_ms: 264_000,
            popularity: 62,
        }
    }

    /// Immediately succeeds or errors every download depending on a flag
    /// keyed by username, so a test can control per-entry outcomes.
    struct ScriptedP2p {
        outcomes: HashMap<String, bool>,
    }

    #[async_trait]
    impl P2pClient for ScriptedP2p {
        async fn search(&self, _query: &str) -> Result<SearchResults, P2pClientError> {
            Ok(SearchResults {
                tracks: vec![TrackCandidate {
                    username: "winner".into(),
                    filename: "track.flac".into(),
                    size: 1024,
                    bitrate: Some(320),
                    quality_score: 1.0,
                }],
                albums: Vec::<AlbumCandidate>::new(),
            })
        }

        async fn download(&self, username: &str, _filename: &str, _size: u64) -> Result<Option<String>, P2pClientError> {
            Ok(Some(format!("{username}::track.flac")))
        }

        async fn get_all_transfers(&self) -> Result<Vec<TransferRecord>, P2pClientError> {
            Ok(self
                .outcomes
                .iter()
                .map(|(username, succeeds)| TransferRecord {
                    id: username.clone(),
                    username: username.clone(),
                    filename: "track.flac".into(),
                    state: if *succeeds { "Succeeded".into() } else { "Errored".into() },
                    percent_complete: if *succeeds { 100.0 } else { 0.0 },
                })
                .collect())
        }

        async fn cancel_download(&self, _id: &str, _username: &str, _remove: bool) -> Result<(), P2pClientError> {
            Ok(())
        }

        async fn clear_all_completed_downloads(&self) -> Result<(), P2pClientError> {
            Ok(())
        }

        async fn check_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn successful_retry_removes_wishlist_entry() {
        let store = Arc::new(prepare_store().await);
        let entry = WishlistEntry::new(
            descriptor("sp:track:1"),
            "no remaining sources",
            SourceType::Watchlist,
            serde_json::json!({}),
            Utc::now(),
        );
        store.wishlist().add_or_merge(&entry).await.unwrap();

        let download_root = tempfile::tempdir().unwrap();
        let library_root = tempfile::tempdir().unwrap();
        std::fs::write(download_root.path().join("track.flac"), b"not really audio").unwrap();

        let p2p: Arc<dyn P2pClient> = Arc::new(ScriptedP2p { outcomes: HashMap::from([("winner".to_string(), true)]) });
        let cache = Arc::new(TransferCache::with_ttl(p2p.clone(), Duration::from_millis(5)));
        let (engine, _events) = Engine::new(
            store.clone(),
            p2p,
            cache,
            download_root.path().to_path_buf(),
            library_root.path().to_path_buf(),
        );

        let monitor_engine = engine.clone();
        let monitor_handle = tokio::spawn(async move { monitor_engine.run_monitor_loop().await });

        let scheduler = WishlistAutoRetryScheduler::new(store.clone(), engine, DEFAULT_BATCH_SIZE);
        let summary = tokio::time::timeout(Duration::from_secs(10), scheduler.tick()).await.unwrap().unwrap();
        monitor_handle.abort();

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(store.wishlist().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_tick_is_a_no_op_while_one_is_in_flight() {
        let store = Arc::new(prepare_store().await);
        let p2p: Arc<dyn P2pClient> = Arc::new(ScriptedP2p { outcomes: HashMap::new() });
        let cache = Arc::new(TransferCache::with_ttl(p2p.clone(), Duration::from_millis(5)));
        let (engine, _events) =
            Engine::new(store.clone(), p2p, cache, PathBuf::from("/tmp/dl"), PathBuf::from("/tmp/lib"));

        let scheduler = Arc::new(WishlistAutoRetryScheduler::new(store, engine, DEFAULT_BATCH_SIZE));
        scheduler.in_progress.store(true, Ordering::SeqCst);

        let summary = scheduler.tick().await.unwrap();
        assert_eq!(summary, RetrySummary::default());
    }
}
