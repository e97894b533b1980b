use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::domain::similar_artist::SimilarArtist;

use super::CatalogError;

#[derive(FromRow)]
struct DbSimilarArtist {
    source_artist_id: String,
    similar_artist_id: String,
    name: String,
    rank: i32,
    occurrence_count: i32,
    last_refreshed: DateTime<Utc>,
}

impl From<DbSimilarArtist> for SimilarArtist {
    fn from(row: DbSimilarArtist) -> Self {
        SimilarArtist {
            source_artist_id: row.source_artist_id,
            similar_artist_id: row.similar_artist_id,
            name: row.name,
            rank: row.rank,
            occurrence_count: row.occurrence_count,
            last_refreshed: row.last_refreshed,
        }
    }
}

pub struct SimilarArtistsRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SimilarArtistsRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a fresh `(source, similar)` pair, or bumps `occurrence_count`
    /// when the same pair is rediscovered through another watched artist's
    /// scan (spec §3's similar-artist occurrence tracking).
    pub async fn upsert_occurrence(
        &self,
        source_artist_id: &str,
        similar_artist_id: &str,
        name: &str,
        rank: i32,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            "INSERT INTO similar_artists (source_artist_id, similar_artist_id, name, rank, occurrence_count, last_refreshed)
             VALUES (?, ?, ?, ?, 1, ?)
             ON CONFLICT(source_artist_id, similar_artist_id) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                rank = excluded.rank,
                last_refreshed = excluded.last_refreshed",
        )
        .bind(source_artist_id)
        .bind(similar_artist_id)
        .bind(name)
        .bind(rank)
        .bind(at)
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(())
    }

    /// Most recent `last_refreshed` among a source artist's cached similar
    /// artists, for the scanner's 30-day staleness check (spec §4.7). `None`
    /// means this artist has never had its similar-artist cache populated.
    pub async fn last_refreshed_for_source(&self, source_artist_id: &str) -> Result<Option<DateTime<Utc>>, CatalogError> {
        sqlx::query_scalar("SELECT MAX(last_refreshed) FROM similar_artists WHERE source_artist_id = ?")
            .bind(source_artist_id)
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    /// Similar artists ordered by how many distinct watched artists surfaced
    /// them, for discovery-pool candidate selection (spec §4.7).
    pub async fn top_by_occurrence(&self, limit: i64) -> Result<Vec<SimilarArtist>, CatalogError> {
        let rows = sqlx::query_as::<_, DbSimilarArtist>(
            "SELECT * FROM similar_artists ORDER BY occurrence_count DESC, rank ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(rows.into_iter().map(SimilarArtist::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;

    #[tokio::test]
    async fn last_refreshed_for_source_reflects_most_recent_pair() {
        let store = prepare_store().await;
        let earlier = Utc::now() - chrono::Duration::days(10);
        let later = Utc::now();
        store.similar_artists().upsert_occurrence("sp:a1", "sp:sim:1", "One", 0, earlier).await.unwrap();
        store.similar_artists().upsert_occurrence("sp:a1", "sp:sim:2", "Two", 1, later).await.unwrap();

        let refreshed = store.similar_artists().last_refreshed_for_source("sp:a1").await.unwrap();
        assert_eq!(refreshed, Some(later));

        let unknown = store.similar_artists().last_refreshed_for_source("sp:unknown").await.unwrap();
        assert_eq!(unknown, None);
    }

    #[tokio::test]
    async fn repeated_discovery_bumps_occurrence_count() {
        let store = prepare_store().await;
        let now = Utc::now();
        store.similar_artists().upsert_occurrence("sp:a1", "sp:sim:1", "Similar One", 0, now).await.unwrap();
        store.similar_artists().upsert_occurrence("sp:a2", "sp:sim:1", "Similar One", 2, now).await.unwrap();

        let top = store.similar_artists().top_by_occurrence(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].occurrence_count, 2);
    }
}
