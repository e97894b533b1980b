use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::domain::discovery::DiscoveryPoolTrack;

use super::CatalogError;

#[derive(FromRow)]
struct DbDiscoveryTrack {
    external_track_id: String,
    external_artist_id: String,
    external_album_id: String,
    name: String,
    artist_name: String,
    album_name: String,
    cover_url: Option<String>,
    duration_ms: i64,
    popularity: i32,
    release_date: Option<String>,
    is_new_release: bool,
    artist_genres_json: String,
    track_blob_json: String,
    added_at: DateTime<Utc>,
}

impl TryFrom<DbDiscoveryTrack> for DiscoveryPoolTrack {
    type Error = CatalogError;

    fn try_from(row: DbDiscoveryTrack) -> Result<Self, Self::Error> {
        Ok(DiscoveryPoolTrack {
            external_track_id: row.external_track_id,
            external_artist_id: row.external_artist_id,
            external_album_id: row.external_album_id,
            name: row.name,
            artist_name: row.artist_name,
            album_name: row.album_name,
            cover_url: row.cover_url,
            duration_ms: row.duration_ms,
            popularity: row.popularity,
            release_date: row.release_date,
            is_new_release: row.is_new_release,
            artist_genres: serde_json::from_str(&row.artist_genres_json)?,
            original: serde_json::from_str(&row.track_blob_json)?,
            added_at: row.added_at,
        })
    }
}

pub struct DiscoveryPoolRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DiscoveryPoolRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Adds a track, or is a no-op if it's already cached (spec §4.7's
    /// discovery-pool population: one similar-artist occurrence shouldn't
    /// duplicate a track found through another).
    pub async fn add_if_absent(&self, track: &DiscoveryPoolTrack) -> Result<(), CatalogError> {
        let genres = serde_json::to_string(&track.artist_genres)?;
        let blob = serde_json::to_string(&track.original)?;

        sqlx::query(
            "INSERT INTO discovery_pool
                (external_track_id, external_artist_id, external_album_id, name, artist_name, album_name,
                 cover_url, duration_ms, popularity, release_date, is_new_release, artist_genres_json, track_blob_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_track_id) DO NOTHING",
        )
        .bind(&track.external_track_id)
        .bind(&track.external_artist_id)
        .bind(&track.external_album_id)
        .bind(&track.name)
        .bind(&track.artist_name)
        .bind(&track.album_name)
        .bind(&track.cover_url)
        .bind(track.duration_ms)
        .bind(track.popularity)
        .bind(&track.release_date)
        .bind(track.is_new_release)
        .bind(genres)
        .bind(blob)
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<DiscoveryPoolTrack>, CatalogError> {
        let rows = sqlx::query_as::<_, DbDiscoveryTrack>("SELECT * FROM discovery_pool ORDER BY added_at DESC")
            .fetch_all(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(DiscoveryPoolTrack::try_from).collect()
    }

    pub async fn list_new_releases(&self) -> Result<Vec<DiscoveryPoolTrack>, CatalogError> {
        let rows = sqlx::query_as::<_, DbDiscoveryTrack>(
            "SELECT * FROM discovery_pool WHERE is_new_release = 1 ORDER BY added_at DESC",
        )
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(DiscoveryPoolTrack::try_from).collect()
    }

    /// Evicts every entry added more than 365 days ago (spec §3's rolling
    /// eviction window for the discovery pool).
    pub async fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, CatalogError> {
        let result = sqlx::query("DELETE FROM discovery_pool WHERE added_at < ?")
            .bind(cutoff)
            .execute(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM discovery_pool")
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;

    fn sample(id: &str, added_at: DateTime<Utc>) -> DiscoveryPoolTrack {
        DiscoveryPoolTrack {
            external_track_id: id.into(),
            external_artist_id: "sp:artist:1".into(),
            external_album_id: "sp:album:1".into(),
            name: "Track".into(),
            artist_name: "Artist".into(),
            album_name: "Album".into(),
            cover_url: None,
            duration_ms: 200_000,
            popularity: 50,
            release_date: Some("2026-01-01".into()),
            is_new_release: false,
            artist_genres: vec![],
            original: serde_json::json!({}),
            added_at,
        }
    }

    #[tokio::test]
    async fn add_if_absent_does_not_duplicate() {
        let store = prepare_store().await;
        let now = Utc::now();
        store.discovery_pool().add_if_absent(&sample("t1", now)).await.unwrap();
        store.discovery_pool().add_if_absent(&sample("t1", now)).await.unwrap();

        assert_eq!(store.discovery_pool().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn eviction_drops_only_stale_entries() {
        let store = prepare_store().await;
        let now = Utc::now();
        store.discovery_pool().add_if_absent(&sample("fresh", now)).await.unwrap();
        store.discovery_pool().add_if_absent(&sample("stale", now - chrono::Duration::days(400))).await.unwrap();

        let evicted = store.discovery_pool().evict_older_than(now - chrono::Duration::days(365)).await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(store.discovery_pool().count().await.unwrap(), 1);
    }
}
