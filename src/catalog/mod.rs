//! Catalog Store (C1, spec §4.1): the durable store of artists, albums,
//! tracks, watchlist, wishlist, discovery pool, similar-artist cache and a
//! key-value metadata slot. Connections are acquired per-operation from a
//! pool owned here; callers never see a raw connection or a transaction
//! handle (spec §9 redesign: no per-call ad-hoc connections, no singleton).

pub mod artists;
pub mod albums;
pub mod tracks;
pub mod watchlist;
pub mod wishlist;
pub mod discovery;
pub mod similar_artists;
pub mod metadata_kv;
pub mod housekeeping;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Item with id <{0}> was not found.")]
    IdNotFound(i64),

    #[error("Item with external id '{0}' was not found.")]
    ExternalIdNotFound(String),

    #[error("Path contains non-UTF8 characters: {0:?}")]
    InvalidPathEncoding(std::path::PathBuf),

    #[error("Failed to (de)serialize JSON column: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("A constraint was violated: {description}")]
    ConstraintViolation { description: String },

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Failed to decode database row: {0}")]
    RowDecodingError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("I/O error while managing the database file: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn from_sqlx_error(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CatalogError::IdNotFound(-1),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                CatalogError::ConnectionError(err.to_string())
            }
            sqlx::Error::Decode(decode_err) => CatalogError::RowDecodingError(decode_err.to_string()),
            sqlx::Error::Database(db_error) => {
                if let Some(code) = db_error.code() {
                    // SQLite constraint-violation family: 19 generic, 2067 unique,
                    // 1555 primary key, 787 foreign key.
                    if ["19", "2067", "1555", "787"].contains(&code.as_ref()) {
                        return CatalogError::ConstraintViolation { description: db_error.message().to_string() };
                    }
                }
                CatalogError::Sqlx(err)
            }
            _ => CatalogError::Sqlx(err),
        }
    }
}

/// Counts and sizing returned by `get_database_info` (spec §4.1).
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseInfo {
    pub artist_count: i64,
    pub album_count: i64,
    pub track_count: i64,
    pub wishlist_count: i64,
    pub watchlist_count: i64,
    pub discovery_pool_count: i64,
    pub file_size_bytes: u64,
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
}

/// Owns the single connection pool shared by every accessor below. The
/// store exposes only the high-level operations named in spec §4.1 — no
/// caller ever reaches for a raw `SqliteConnection` or transaction.
pub struct CatalogStore {
    pool: SqlitePool,
    db_path: std::path::PathBuf,
}

impl CatalogStore {
    /// Opens (creating if absent) the sqlite file at `db_path` and runs
    /// pending migrations. The pool is sized for up to ~16 concurrent
    /// fulfillment workers plus the background services (spec §4.1).
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(CatalogError::from_sqlx_error)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| CatalogError::ConnectionError(e.to_string()))?;

        Ok(Self { pool, db_path })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(CatalogError::from_sqlx_error)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| CatalogError::ConnectionError(e.to_string()))?;

        Ok(Self { pool, db_path: std::path::PathBuf::from(":memory:") })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wipes every catalog/watchlist/wishlist/discovery row and reclaims
    /// on-disk space, then records the completion timestamp (spec §4.1).
    pub async fn clear_all_data(&self) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "tracks", "albums", "artists", "watchlist_artists", "wishlist", "similar_artists",
            "discovery_pool",
        ] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        sqlx::query("VACUUM").execute(&self.pool).await?;
        self.record_full_refresh_completion().await?;
        Ok(())
    }

    pub async fn record_full_refresh_completion(&self) -> Result<(), CatalogError> {
        self.metadata_kv()
            .set("last_full_refresh", &chrono::Utc::now().to_rfc3339())
            .await
    }

    pub async fn get_database_info(&self) -> Result<DatabaseInfo, CatalogError> {
        let artist_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists").fetch_one(&self.pool).await?;
        let album_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM albums").fetch_one(&self.pool).await?;
        let track_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks").fetch_one(&self.pool).await?;
        let wishlist_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wishlist").fetch_one(&self.pool).await?;
        let watchlist_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM watchlist_artists").fetch_one(&self.pool).await?;
        let discovery_pool_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM discovery_pool").fetch_one(&self.pool).await?;

        let file_size_bytes = tokio::fs::metadata(&self.db_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let last_update = self
            .metadata_kv()
            .get("last_full_refresh")
            .await?
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.to_utc());

        Ok(DatabaseInfo {
            artist_count,
            album_count,
            track_count,
            wishlist_count,
            watchlist_count,
            discovery_pool_count,
            file_size_bytes,
            last_update,
        })
    }

    pub fn artists(&self) -> artists::ArtistsRepo<'_> {
        artists::ArtistsRepo::new(&self.pool)
    }

    pub fn albums(&self) -> albums::AlbumsRepo<'_> {
        albums::AlbumsRepo::new(&self.pool)
    }

    pub fn tracks(&self) -> tracks::TracksRepo<'_> {
        tracks::TracksRepo::new(&self.pool)
    }

    pub fn watchlist(&self) -> watchlist::WatchlistRepo<'_> {
        watchlist::WatchlistRepo::new(&self.pool)
    }

    pub fn wishlist(&self) -> wishlist::WishlistRepo<'_> {
        wishlist::WishlistRepo::new(&self.pool)
    }

    pub fn discovery_pool(&self) -> discovery::DiscoveryPoolRepo<'_> {
        discovery::DiscoveryPoolRepo::new(&self.pool)
    }

    pub fn similar_artists(&self) -> similar_artists::SimilarArtistsRepo<'_> {
        similar_artists::SimilarArtistsRepo::new(&self.pool)
    }

    pub fn metadata_kv(&self) -> metadata_kv::MetadataKvRepo<'_> {
        metadata_kv::MetadataKvRepo::new(&self.pool)
    }

    pub fn housekeeping(&self) -> housekeeping::Housekeeping<'_> {
        housekeeping::Housekeeping::new(self)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::CatalogStore;

    pub async fn prepare_store() -> CatalogStore {
        CatalogStore::connect_in_memory().await.expect("in-memory catalog store")
    }
}
