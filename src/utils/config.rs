//! Flat TOML configuration, deserialized once in `main.rs` and handed down
//! through `AppContext` (spec §6, SPEC_FULL.md §A). Per the §9 redesign
//! flags this replaces the teacher's `get_config()`/`OnceLock` singleton:
//! nothing in this crate reaches for a global, `Config` is just a value.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read the config file '{path}': {source}")]
    Read { path: PathBuf, source: String },

    #[error("Failed to parse the config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub p2p: P2pConfig,
    pub metadata_provider: MetadataProviderConfig,
    #[serde(default)]
    pub fulfillment: FulfillmentConfig,
    #[serde(default)]
    pub wishlist: WishlistConfig,
    #[serde(default)]
    pub watchlist: WatchlistConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

fn default_max_workers() -> u32 {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// `<library_root>/<Artist>/<Album>/<NN> - <Title>.<ext>` destination root (spec §6).
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2pConfig {
    pub base_url: String,
    pub download_path: PathBuf,
    pub transfer_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataProviderConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillmentConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_batch: usize,
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self { max_concurrent_per_batch: default_max_concurrent() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WishlistConfig {
    #[serde(default = "default_auto_interval_seconds")]
    pub auto_interval_seconds: u64,
    #[serde(default = "default_wishlist_batch_size")]
    pub batch_size: i64,
}

fn default_auto_interval_seconds() -> u64 {
    3600
}

fn default_wishlist_batch_size() -> i64 {
    10
}

impl Default for WishlistConfig {
    fn default() -> Self {
        Self {
            auto_interval_seconds: default_auto_interval_seconds(),
            batch_size: default_wishlist_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

fn default_lookback_days() -> i64 {
    30
}

fn default_scan_batch_size() -> usize {
    50
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self { lookback_days: default_lookback_days(), scan_batch_size: default_scan_batch_size() }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Read { path: path.clone(), source: e.to_string() })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_str = r#"
            [database]
            path = "data/catalog.db"

            [library]
            root = "data/library"

            [p2p]
            base_url = "http://127.0.0.1:5030"
            download_path = "data/downloads"
            transfer_path = "data/transfers"

            [metadata_provider]
            base_url = "https://api.example.test"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.max_workers, 16);
        assert_eq!(config.fulfillment.max_concurrent_per_batch, 3);
        assert_eq!(config.wishlist.auto_interval_seconds, 3600);
        assert_eq!(config.watchlist.lookback_days, 30);
    }
}
