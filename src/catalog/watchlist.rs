use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::domain::watchlist::{ContentFilter, ReleaseTypeFilter, WatchlistEntry};

use super::CatalogError;

#[derive(FromRow)]
struct DbWatchlistEntry {
    external_artist_id: String,
    name: String,
    last_scan_timestamp: Option<DateTime<Utc>>,
    include_albums: bool,
    include_eps: bool,
    include_singles: bool,
    include_live: bool,
    include_remixes: bool,
    include_acoustic: bool,
    include_compilations: bool,
}

impl From<DbWatchlistEntry> for WatchlistEntry {
    fn from(row: DbWatchlistEntry) -> Self {
        let mut entry = WatchlistEntry::new(row.external_artist_id, row.name);
        if let Some(ts) = row.last_scan_timestamp {
            entry.set_last_scan_timestamp(ts);
        }
        entry.set_release_types(ReleaseTypeFilter {
            albums: row.include_albums,
            eps: row.include_eps,
            singles: row.include_singles,
        });
        entry.set_content_filter(ContentFilter {
            live: row.include_live,
            remix: row.include_remixes,
            acoustic: row.include_acoustic,
            compilation: row.include_compilations,
        });
        entry
    }
}

pub struct WatchlistRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WatchlistRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, entry: &WatchlistEntry) -> Result<(), CatalogError> {
        let release_types = entry.release_types();
        let content = entry.content_filter();
        sqlx::query(
            "INSERT INTO watchlist_artists
                (external_artist_id, name, last_scan_timestamp, include_albums, include_eps, include_singles,
                 include_live, include_remixes, include_acoustic, include_compilations)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_artist_id) DO UPDATE SET name = excluded.name",
        )
        .bind(entry.external_artist_id())
        .bind(entry.name())
        .bind(entry.last_scan_timestamp())
        .bind(release_types.albums)
        .bind(release_types.eps)
        .bind(release_types.singles)
        .bind(content.live)
        .bind(content.remix)
        .bind(content.acoustic)
        .bind(content.compilation)
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn remove(&self, external_artist_id: &str) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM watchlist_artists WHERE external_artist_id = ?")
            .bind(external_artist_id)
            .execute(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::ExternalIdNotFound(external_artist_id.to_string()));
        }
        Ok(())
    }

    pub async fn get(&self, external_artist_id: &str) -> Result<Option<WatchlistEntry>, CatalogError> {
        let row = sqlx::query_as::<_, DbWatchlistEntry>(
            "SELECT * FROM watchlist_artists WHERE external_artist_id = ?",
        )
        .bind(external_artist_id)
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(row.map(WatchlistEntry::from))
    }

    pub async fn list_all(&self) -> Result<Vec<WatchlistEntry>, CatalogError> {
        let rows = sqlx::query_as::<_, DbWatchlistEntry>("SELECT * FROM watchlist_artists ORDER BY name ASC")
            .fetch_all(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        Ok(rows.into_iter().map(WatchlistEntry::from).collect())
    }

    pub async fn set_last_scan_timestamp(&self, external_artist_id: &str, at: DateTime<Utc>) -> Result<(), CatalogError> {
        sqlx::query("UPDATE watchlist_artists SET last_scan_timestamp = ? WHERE external_artist_id = ?")
            .bind(at)
            .bind(external_artist_id)
            .execute(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let store = prepare_store().await;
        store.watchlist().add(&WatchlistEntry::new("sp:artist:1", "Four Tet")).await.unwrap();

        let all = store.watchlist().list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name(), "Four Tet");
        assert!(all[0].must_scan(Utc::now()));
    }

    #[tokio::test]
    async fn scan_timestamp_clears_must_scan_until_stale() {
        let store = prepare_store().await;
        store.watchlist().add(&WatchlistEntry::new("sp:artist:1", "Four Tet")).await.unwrap();
        store.watchlist().set_last_scan_timestamp("sp:artist:1", Utc::now()).await.unwrap();

        let entry = store.watchlist().get("sp:artist:1").await.unwrap().unwrap();
        assert!(!entry.must_scan(Utc::now()));
    }
}
