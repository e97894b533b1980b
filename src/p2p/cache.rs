//! Transfer Cache (C6, spec §4.2): a short-TTL snapshot of the daemon's
//! transfer table shared by every concurrent fulfillment task, so the
//! monitor's ~1s poll doesn't turn into an API storm once a batch has a
//! dozen tasks in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::{P2pClient, TransferRecord};

pub const DEFAULT_TTL: Duration = Duration::from_millis(750);

struct CacheState {
    snapshot: HashMap<String, TransferRecord>,
    last_update: Option<Instant>,
}

pub struct TransferCache {
    client: Arc<dyn P2pClient>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl TransferCache {
    pub fn new(client: Arc<dyn P2pClient>) -> Self {
        Self::with_ttl(client, DEFAULT_TTL)
    }

    pub fn with_ttl(client: Arc<dyn P2pClient>, ttl: Duration) -> Self {
        Self { client, ttl, state: Mutex::new(CacheState { snapshot: HashMap::new(), last_update: None }) }
    }

    /// Returns the cached transfer snapshot, refreshing it first if the TTL
    /// elapsed. Holding the lock across the refresh call is what gives the
    /// single-flight guarantee (spec §4.2, §5): concurrent callers queue
    /// behind the first refresher and see its fresh snapshot instead of
    /// each issuing their own `get_all_transfers()` call.
    pub async fn snapshot(&self) -> HashMap<String, TransferRecord> {
        let mut state = self.state.lock().await;

        let is_stale = state.last_update.is_none_or(|last| last.elapsed() >= self.ttl);

        if is_stale {
            match self.client.get_all_transfers().await {
                Ok(records) => {
                    state.snapshot = records.into_iter().map(|r| (r.source_key(), r)).collect();
                    state.last_update = Some(Instant::now());
                }
                Err(_) => {
                    // On upstream error the cache returns an empty map
                    // without bumping last_update, so the next call retries.
                    state.snapshot.clear();
                }
            }
        }

        state.snapshot.clone()
    }

    pub async fn get(&self, key: &str) -> Option<TransferRecord> {
        self.snapshot().await.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::{P2pClientError, SearchResults};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
        should_fail: bool,
    }

    #[async_trait]
    impl P2pClient for CountingClient {
        async fn search(&self, _query: &str) -> Result<SearchResults, P2pClientError> {
            unimplemented!()
        }

        async fn download(&self, _username: &str, _filename: &str, _size: u64) -> Result<Option<String>, P2pClientError> {
            unimplemented!()
        }

        async fn get_all_transfers(&self) -> Result<Vec<TransferRecord>, P2pClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.should_fail {
                return Err(P2pClientError::Request("boom".into()));
            }
            Ok(vec![TransferRecord {
                id: "1".into(),
                username: "alice".into(),
                filename: "track.flac".into(),
                state: "InProgress".into(),
                percent_complete: 50.0,
            }])
        }

        async fn cancel_download(&self, _id: &str, _username: &str, _remove: bool) -> Result<(), P2pClientError> {
            unimplemented!()
        }

        async fn clear_all_completed_downloads(&self) -> Result<(), P2pClientError> {
            unimplemented!()
        }

        async fn check_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn concurrent_callers_single_flight_the_refresh() {
        let client = Arc::new(CountingClient { calls: AtomicUsize::new(0), should_fail: false });
        let cache = Arc::new(TransferCache::with_ttl(client.clone(), Duration::from_millis(750)));

        let (a, b, c) = tokio::join!(cache.snapshot(), cache.snapshot(), cache.snapshot());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.len(), 1);
        assert_eq!(b, a);
        assert_eq!(c, a);
    }

    #[tokio::test]
    async fn upstream_error_returns_empty_without_caching_stale_success() {
        let client = Arc::new(CountingClient { calls: AtomicUsize::new(0), should_fail: true });
        let cache = TransferCache::with_ttl(client, Duration::from_millis(750));

        let snapshot = cache.snapshot().await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn within_ttl_does_not_refetch() {
        let client = Arc::new(CountingClient { calls: AtomicUsize::new(0), should_fail: false });
        let cache = TransferCache::with_ttl(client.clone(), Duration::from_secs(60));

        cache.snapshot().await;
        cache.snapshot().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
