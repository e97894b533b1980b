//! Explicit dependency graph built once at process start (spec §9 redesign
//! flag: `Config -> Store -> {P2PClient, ProviderClient, Match} -> Engine ->
//! Scanners/Schedulers`, replacing the teacher's `OnceLock`/`get_config()`
//! singleton pattern). Every background service receives what it needs
//! through this struct; nothing downstream reaches for a global.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::catalog::{CatalogError, CatalogStore};
use crate::enrichment::EnrichmentWorker;
use crate::fulfillment::{Engine, EngineEvent};
use crate::p2p::cache::TransferCache;
use crate::p2p::{HttpP2pClient, P2pClient};
use crate::provider::{HttpProviderClient, ProviderClient};
use crate::scanner::WatchlistScanner;
use crate::scheduler::WishlistAutoRetryScheduler;
use crate::utils::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Owns every long-lived, shareable dependency. Built once in `main.rs` and
/// handed down by reference/clone; no component below this struct
/// constructs its own store, P2P client, or provider client.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<CatalogStore>,
    pub p2p: Arc<dyn P2pClient>,
    pub provider: Arc<dyn ProviderClient>,
    pub engine: Engine,
    engine_events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl AppContext {
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let store = Arc::new(CatalogStore::connect(&config.database.path).await?);

        let p2p: Arc<dyn P2pClient> = Arc::new(HttpP2pClient::new(config.p2p.base_url.clone()));
        let provider: Arc<dyn ProviderClient> = Arc::new(HttpProviderClient::new(
            config.metadata_provider.base_url.clone(),
            config.metadata_provider.client_id.clone(),
            config.metadata_provider.client_secret.clone(),
        ));

        let cache = Arc::new(TransferCache::new(p2p.clone()));
        let (engine, events) = Engine::new(
            store.clone(),
            p2p.clone(),
            cache,
            config.p2p.download_path.clone(),
            config.library.root.clone(),
        );

        Ok(Self {
            config,
            store,
            p2p,
            provider,
            engine,
            engine_events: Mutex::new(Some(events)),
        })
    }

    pub fn enrichment_worker(&self) -> EnrichmentWorker {
        EnrichmentWorker::new(self.store.clone(), self.provider.clone())
    }

    pub fn watchlist_scanner(&self) -> WatchlistScanner {
        WatchlistScanner::new(
            self.store.clone(),
            self.provider.clone(),
            self.config.watchlist.scan_batch_size,
            self.config.watchlist.lookback_days,
        )
    }

    pub fn wishlist_scheduler(&self) -> WishlistAutoRetryScheduler {
        WishlistAutoRetryScheduler::new(self.store.clone(), self.engine.clone(), self.config.wishlist.batch_size)
    }

    /// Takes ownership of the engine's event stream. Only the first caller
    /// gets it (spec §9: "UI layers subscribe; they do not reach into
    /// engine state") — anyone calling twice gets `None`.
    pub async fn take_engine_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.engine_events.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::{
        DatabaseConfig, FulfillmentConfig, LibraryConfig, MetadataProviderConfig, P2pConfig, WatchlistConfig,
        WishlistConfig,
    };

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            database: DatabaseConfig { path: dir.join("catalog.db"), max_workers: 16 },
            library: LibraryConfig { root: dir.join("library") },
            p2p: P2pConfig {
                base_url: "http://127.0.0.1:5030".into(),
                download_path: dir.join("downloads"),
                transfer_path: dir.join("transfers"),
                username: None,
                password: None,
            },
            metadata_provider: MetadataProviderConfig { base_url: "https://api.example.test".into(), client_id: None, client_secret: None },
            fulfillment: FulfillmentConfig::default(),
            wishlist: WishlistConfig::default(),
            watchlist: WatchlistConfig::default(),
        }
    }

    #[tokio::test]
    async fn build_wires_every_component_and_events_are_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::build(test_config(dir.path())).await.unwrap();

        assert!(ctx.take_engine_events().await.is_some());
        assert!(ctx.take_engine_events().await.is_none());
    }
}
