use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};

use crate::domain::artist::Artist;
use crate::domain::MatchStatus;

use super::CatalogError;

#[derive(FromRow)]
struct DbArtist {
    id: i64,
    name: String,
    thumb_url: Option<String>,
    genres: Option<String>,
    external_id: Option<String>,
    match_status: String,
    last_attempted: Option<DateTime<Utc>>,
}

impl TryFrom<DbArtist> for Artist {
    type Error = CatalogError;

    fn try_from(row: DbArtist) -> Result<Self, Self::Error> {
        let genres = row.genres.map(|raw| serde_json::from_str(&raw)).transpose()?;
        let match_status = MatchStatus::try_from(row.match_status.as_str()).unwrap_or(MatchStatus::Unattempted);

        let mut artist = Artist::new(row.id, row.name).map_err(|_| CatalogError::ConstraintViolation {
            description: "artist row had an empty name".into(),
        })?;
        artist.set_image_url(row.thumb_url);
        artist.set_genres(genres);
        if match_status != MatchStatus::Unattempted {
            artist.set_match_result(match_status, row.external_id, row.last_attempted.unwrap_or_else(Utc::now));
        }
        Ok(artist)
    }
}

pub struct ArtistsRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ArtistsRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new artist row, or updates an existing one matched by
    /// external_id, bumping `updated_at` either way (spec §4.1 upsert).
    pub async fn upsert(&self, artist: &Artist) -> Result<i64, CatalogError> {
        let genres = artist.genres().map(serde_json::to_string).transpose()?;

        if let Some(external_id) = artist.external_id() {
            if let Some(existing_id) = self.id_by_external_id(external_id).await? {
                sqlx::query(
                    "UPDATE artists SET name = ?, thumb_url = ?, genres = ?, match_status = ?,
                     last_attempted = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                )
                .bind(artist.name())
                .bind(artist.image_url())
                .bind(&genres)
                .bind(artist.match_status().as_str())
                .bind(artist.last_attempted())
                .bind(existing_id)
                .execute(self.pool)
                .await
                .map_err(CatalogError::from_sqlx_error)?;
                return Ok(existing_id);
            }
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO artists (name, thumb_url, genres, external_id, match_status, last_attempted)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(artist.name())
        .bind(artist.image_url())
        .bind(&genres)
        .bind(artist.external_id())
        .bind(artist.match_status().as_str())
        .bind(artist.last_attempted())
        .fetch_one(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Artist>, CatalogError> {
        let row = sqlx::query_as::<_, DbArtist>("SELECT * FROM artists WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        row.map(Artist::try_from).transpose()
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Artist>, CatalogError> {
        let row = sqlx::query_as::<_, DbArtist>("SELECT * FROM artists WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        row.map(Artist::try_from).transpose()
    }

    async fn id_by_external_id(&self, external_id: &str) -> Result<Option<i64>, CatalogError> {
        sqlx::query_scalar("SELECT id FROM artists WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    /// Fuzzy lookup used by the Match Engine's existence checks (spec §4.4):
    /// a case-insensitive substring match against stored names.
    pub async fn find_by_fuzzy_name(&self, name_fragment: &str) -> Result<Vec<Artist>, CatalogError> {
        let pattern = format!("%{}%", name_fragment.to_lowercase());
        let rows = sqlx::query_as::<_, DbArtist>("SELECT * FROM artists WHERE LOWER(name) LIKE ? LIMIT 25")
            .bind(pattern)
            .fetch_all(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(Artist::try_from).collect()
    }

    /// Artists whose match attempt is stale enough to retry (spec §7): never
    /// attempted, or `not_found`/`error` past their respective cool-down.
    pub async fn find_needing_enrichment(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Artist>, CatalogError> {
        let not_found_cutoff = now - chrono::Duration::days(crate::domain::NOT_FOUND_RETRY_DAYS);
        let error_cutoff = now - chrono::Duration::days(crate::domain::ERROR_RETRY_DAYS);

        let rows = sqlx::query_as::<_, DbArtist>(
            "SELECT * FROM artists WHERE match_status = 'unattempted'
                OR (match_status = 'not_found' AND (last_attempted IS NULL OR last_attempted < ?))
                OR (match_status = 'error' AND (last_attempted IS NULL OR last_attempted < ?))
             ORDER BY last_attempted ASC NULLS FIRST
             LIMIT ?",
        )
        .bind(not_found_cutoff)
        .bind(error_cutoff)
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(Artist::try_from).collect()
    }

    /// Rule 1 of the enrichment priority list (spec §4.6): one artist that
    /// has never had a match attempt, oldest row first.
    pub async fn find_one_unattempted(&self) -> Result<Option<Artist>, CatalogError> {
        let row = sqlx::query_as::<_, DbArtist>(
            "SELECT * FROM artists WHERE match_status = 'unattempted' ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        row.map(Artist::try_from).transpose()
    }

    /// Rule 2's "album batch" seed (spec §4.6): a matched artist with at
    /// least one unattempted child album still waiting for its own pass.
    pub async fn find_album_batch_seed(&self) -> Result<Option<Artist>, CatalogError> {
        let row = sqlx::query_as::<_, DbArtist>(
            "SELECT * FROM artists a WHERE a.match_status = 'matched'
               AND EXISTS (SELECT 1 FROM albums al WHERE al.artist_id = a.id AND al.match_status = 'unattempted')
             ORDER BY a.id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        row.map(Artist::try_from).transpose()
    }

    pub async fn count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM artists")
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    pub async fn delete(&self, id: i64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM artists WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::IdNotFound(id));
        }
        Ok(())
    }

    pub async fn id_exists(&self, id: i64) -> Result<bool, CatalogError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM artists WHERE id = ?)")
            .bind(id)
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;
        let exists: i64 = row.try_get(0).map_err(CatalogError::from_sqlx_error)?;
        Ok(exists == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = prepare_store().await;
        let mut artist = Artist::new(0, "Boards of Canada").unwrap();
        artist.set_genres(Some(vec!["idm".into()]));

        let id = store.artists().upsert(&artist).await.unwrap();
        let fetched = store.artists().get(id).await.unwrap().unwrap();

        assert_eq!(fetched.name(), "Boards of Canada");
        assert_eq!(fetched.genres(), Some(&["idm".to_string()][..]));
    }

    #[tokio::test]
    async fn upsert_on_existing_external_id_updates_in_place() {
        let store = prepare_store().await;
        let mut artist = Artist::new(0, "Aphex Twin").unwrap();
        artist.set_match_result(MatchStatus::Matched, Some("spotify:artist:1".into()), Utc::now());

        let first_id = store.artists().upsert(&artist).await.unwrap();

        let mut updated = Artist::new(0, "Aphex Twin (updated)").unwrap();
        updated.set_match_result(MatchStatus::Matched, Some("spotify:artist:1".into()), Utc::now());
        let second_id = store.artists().upsert(&updated).await.unwrap();

        assert_eq!(first_id, second_id);
        let fetched = store.artists().get(first_id).await.unwrap().unwrap();
        assert_eq!(fetched.name(), "Aphex Twin (updated)");
    }

    #[tokio::test]
    async fn fuzzy_name_search_is_case_insensitive() {
        let store = prepare_store().await;
        let artist = Artist::new(0, "Burial").unwrap();
        store.artists().upsert(&artist).await.unwrap();

        let matches = store.artists().find_by_fuzzy_name("buri").await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn needing_enrichment_excludes_fresh_not_found() {
        let store = prepare_store().await;
        let mut stale = Artist::new(0, "Stale Artist").unwrap();
        stale.set_match_result(MatchStatus::NotFound, None, Utc::now() - chrono::Duration::days(31));
        store.artists().upsert(&stale).await.unwrap();

        let mut fresh = Artist::new(0, "Fresh Artist").unwrap();
        fresh.set_match_result(MatchStatus::NotFound, None, Utc::now());
        store.artists().upsert(&fresh).await.unwrap();

        let due = store.artists().find_needing_enrichment(Utc::now(), 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name(), "Stale Artist");
    }
}
