use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::domain::wishlist::{SourceType, TrackDescriptor, WishlistEntry};

use super::CatalogError;

#[derive(FromRow)]
struct DbWishlistEntry {
    external_track_id: String,
    descriptor_json: String,
    failure_reason: String,
    source_type: String,
    source_info_json: String,
    retry_count: i32,
    date_added: DateTime<Utc>,
    last_attempted: Option<DateTime<Utc>>,
}

impl TryFrom<DbWishlistEntry> for WishlistEntry {
    type Error = CatalogError;

    fn try_from(row: DbWishlistEntry) -> Result<Self, Self::Error> {
        let descriptor: TrackDescriptor = serde_json::from_str(&row.descriptor_json)?;
        let source_info: serde_json::Value = serde_json::from_str(&row.source_info_json)?;
        let source_type = SourceType::try_from(row.source_type.as_str()).unwrap_or(SourceType::Manual);

        let mut entry = WishlistEntry::new(descriptor, row.failure_reason, source_type, source_info, row.date_added);
        for _ in 0..row.retry_count {
            entry.record_retry_attempt(entry.failure_reason().to_string(), row.last_attempted.unwrap_or(row.date_added));
        }
        Ok(entry)
    }
}

pub struct WishlistRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WishlistRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new wishlist row, or merges `source_info` into an existing
    /// one keyed by `external_track_id` rather than duplicating it (spec §3
    /// invariant: one row per failed track, sources accumulate).
    pub async fn add_or_merge(&self, entry: &WishlistEntry) -> Result<(), CatalogError> {
        let existing = self.get(entry.external_track_id()).await?;

        let merged_source_info = match existing {
            Some(mut existing_entry) => {
                existing_entry.merge_source_info(entry.source_info().clone());
                existing_entry.source_info().clone()
            }
            None => entry.source_info().clone(),
        };

        let descriptor_json = serde_json::to_string(entry.descriptor())?;
        let source_info_json = serde_json::to_string(&merged_source_info)?;

        sqlx::query(
            "INSERT INTO wishlist
                (external_track_id, descriptor_json, failure_reason, source_type, source_info_json,
                 retry_count, date_added, last_attempted)
             VALUES (?, ?, ?, ?, ?, 0, ?, NULL)
             ON CONFLICT(external_track_id) DO UPDATE SET
                failure_reason = excluded.failure_reason,
                source_info_json = excluded.source_info_json",
        )
        .bind(entry.external_track_id())
        .bind(descriptor_json)
        .bind(entry.failure_reason())
        .bind(entry.source_type().as_str())
        .bind(source_info_json)
        .bind(entry.date_added())
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn get(&self, external_track_id: &str) -> Result<Option<WishlistEntry>, CatalogError> {
        let row = sqlx::query_as::<_, DbWishlistEntry>("SELECT * FROM wishlist WHERE external_track_id = ?")
            .bind(external_track_id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        row.map(WishlistEntry::try_from).transpose()
    }

    pub async fn remove(&self, external_track_id: &str) -> Result<(), CatalogError> {
        sqlx::query("DELETE FROM wishlist WHERE external_track_id = ?")
            .bind(external_track_id)
            .execute(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;
        Ok(())
    }

    pub async fn record_retry_attempt(
        &self,
        external_track_id: &str,
        failure_reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            "UPDATE wishlist SET retry_count = retry_count + 1, failure_reason = ?, last_attempted = ?
             WHERE external_track_id = ?",
        )
        .bind(failure_reason)
        .bind(at)
        .bind(external_track_id)
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;
        Ok(())
    }

    /// Up to `limit` entries ordered by staleness, for the auto-retry
    /// scheduler's fixed-interval drain (spec §4.9).
    pub async fn next_batch(&self, limit: i64) -> Result<Vec<WishlistEntry>, CatalogError> {
        let rows = sqlx::query_as::<_, DbWishlistEntry>(
            "SELECT * FROM wishlist ORDER BY last_attempted ASC NULLS FIRST, date_added ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(WishlistEntry::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM wishlist")
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;
    use crate::domain::wishlist::AlbumDescriptor;

    fn sample_descriptor(id: &str) -> TrackDescriptor {
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

    #[tokio::test]
    async fn add_then_retry_merges_source_info_without_duplicating() {
        let store = prepare_store().await;
        let entry = WishlistEntry::new(
            sample_descriptor("sp:track:1"),
            "no candidates found",
            SourceType::Album,
            serde_json::json!({"album_id": "alb:1"}),
            Utc::now(),
        );
        store.wishlist().add_or_merge(&entry).await.unwrap();

        let second = WishlistEntry::new(
            sample_descriptor("sp:track:1"),
            "all sources stalled",
            SourceType::Watchlist,
            serde_json::json!({"watchlist_artist": "sp:artist:9"}),
            Utc::now(),
        );
        store.wishlist().add_or_merge(&second).await.unwrap();

        assert_eq!(store.wishlist().count().await.unwrap(), 1);
        let merged = store.wishlist().get("sp:track:1").await.unwrap().unwrap();
        assert_eq!(merged.source_info()["watchlist_artist"], "sp:artist:9");
        assert_eq!(merged.source_info()["album_id"], "alb:1");
    }

    #[tokio::test]
    async fn next_batch_orders_unattempted_first() {
        let store = prepare_store().await;
        for i in 0..3 {
            let entry = WishlistEntry::new(
                sample_descriptor(&format!("sp:track:{i}")),
                "stalled",
                SourceType::Manual,
                serde_json::json!({}),
                Utc::now(),
            );
            store.wishlist().add_or_merge(&entry).await.unwrap();
        }

        let batch = store.wishlist().next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 3);
    }
}
