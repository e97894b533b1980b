use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};

use crate::domain::album::Album;
use crate::domain::MatchStatus;

use super::CatalogError;

#[derive(FromRow)]
struct DbAlbum {
    id: i64,
    artist_id: i64,
    title: String,
    year: Option<i32>,
    thumb_url: Option<String>,
    genres: Option<String>,
    track_count: Option<i32>,
    duration_ms: Option<i64>,
    external_id: Option<String>,
    match_status: String,
    last_attempted: Option<DateTime<Utc>>,
}

impl TryFrom<DbAlbum> for Album {
    type Error = CatalogError;

    fn try_from(row: DbAlbum) -> Result<Self, Self::Error> {
        let genres = row.genres.map(|raw| serde_json::from_str(&raw)).transpose()?;
        let match_status = MatchStatus::try_from(row.match_status.as_str()).unwrap_or(MatchStatus::Unattempted);

        let mut album =
            Album::new(row.id, row.artist_id, row.title).map_err(|_| CatalogError::ConstraintViolation {
                description: "album row had an empty title".into(),
            })?;
        album.set_release_year(row.year);
        album.set_image_url(row.thumb_url);
        album.set_genres(genres);
        album.set_track_count(row.track_count);
        album.set_duration_ms(row.duration_ms);
        if match_status != MatchStatus::Unattempted {
            album.set_match_result(match_status, row.external_id, row.last_attempted.unwrap_or_else(Utc::now));
        }
        Ok(album)
    }
}

#[derive(FromRow)]
struct DbAlbumCandidate {
    id: i64,
    artist_id: i64,
    title: String,
    year: Option<i32>,
    thumb_url: Option<String>,
    genres: Option<String>,
    track_count: Option<i32>,
    duration_ms: Option<i64>,
    external_id: Option<String>,
    match_status: String,
    last_attempted: Option<DateTime<Utc>>,
    artist_name: String,
}

impl From<DbAlbumCandidate> for DbAlbum {
    fn from(row: DbAlbumCandidate) -> Self {
        DbAlbum {
            id: row.id,
            artist_id: row.artist_id,
            title: row.title,
            year: row.year,
            thumb_url: row.thumb_url,
            genres: row.genres,
            track_count: row.track_count,
            duration_ms: row.duration_ms,
            external_id: row.external_id,
            match_status: row.match_status,
            last_attempted: row.last_attempted,
        }
    }
}

pub struct AlbumsRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AlbumsRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, album: &Album) -> Result<i64, CatalogError> {
        let genres = album.genres().map(serde_json::to_string).transpose()?;

        if let Some(external_id) = album.external_id() {
            let existing_id: Option<i64> = sqlx::query_scalar("SELECT id FROM albums WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(self.pool)
                .await
                .map_err(CatalogError::from_sqlx_error)?;

            if let Some(existing_id) = existing_id {
                sqlx::query(
                    "UPDATE albums SET title = ?, year = ?, thumb_url = ?, genres = ?, track_count = ?,
                     duration_ms = ?, match_status = ?, last_attempted = ?, updated_at = CURRENT_TIMESTAMP
                     WHERE id = ?",
                )
                .bind(album.title())
                .bind(album.release_year())
                .bind(album.image_url())
                .bind(&genres)
                .bind(album.track_count())
                .bind(album.duration_ms())
                .bind(album.match_status().as_str())
                .bind(album.last_attempted())
                .bind(existing_id)
                .execute(self.pool)
                .await
                .map_err(CatalogError::from_sqlx_error)?;
                return Ok(existing_id);
            }
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO albums (artist_id, title, year, thumb_url, genres, track_count, duration_ms,
             external_id, match_status, last_attempted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(album.artist_id())
        .bind(album.title())
        .bind(album.release_year())
        .bind(album.image_url())
        .bind(&genres)
        .bind(album.track_count())
        .bind(album.duration_ms())
        .bind(album.external_id())
        .bind(album.match_status().as_str())
        .bind(album.last_attempted())
        .fetch_one(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Album>, CatalogError> {
        let row = sqlx::query_as::<_, DbAlbum>("SELECT * FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        row.map(Album::try_from).transpose()
    }

    pub async fn list_by_artist(&self, artist_id: i64) -> Result<Vec<Album>, CatalogError> {
        let rows = sqlx::query_as::<_, DbAlbum>("SELECT * FROM albums WHERE artist_id = ? ORDER BY year DESC")
            .bind(artist_id)
            .fetch_all(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(Album::try_from).collect()
    }

    /// Fuzzy existence check for the Match Engine (spec §4.1, §4.4): a
    /// case-insensitive substring match against an artist's albums.
    pub async fn find_by_fuzzy_title(&self, artist_id: i64, title_fragment: &str) -> Result<Vec<Album>, CatalogError> {
        let pattern = format!("%{}%", title_fragment.to_lowercase());
        let rows = sqlx::query_as::<_, DbAlbum>(
            "SELECT * FROM albums WHERE artist_id = ? AND LOWER(title) LIKE ? LIMIT 25",
        )
        .bind(artist_id)
        .bind(pattern)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(Album::try_from).collect()
    }

    /// `check_album_completeness(album_id, expected_track_count)` (spec
    /// §4.1): `(owned, expected, is_complete)` where `is_complete` means
    /// `owned / expected >= 0.9` and `owned > 0`.
    pub async fn check_completeness(&self, album_id: i64, expected_track_count: i32) -> Result<(i64, i64, bool), CatalogError> {
        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tracks WHERE album_id = ? AND file_path IS NOT NULL",
        )
        .bind(album_id)
        .fetch_one(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        let expected = i64::from(expected_track_count);
        let is_complete = owned > 0 && expected > 0 && (owned as f64 / expected as f64) >= 0.9;

        Ok((owned, expected, is_complete))
    }

    /// `check_album_exists(title, artist, threshold)` (spec §4.1): mirrors
    /// `TracksRepo::check_track_exists` — SQL narrows candidates by owning
    /// artist name, the Match Engine scores title/artist similarity and the
    /// best candidate above `threshold` wins.
    pub async fn check_album_exists(
        &self,
        title: &str,
        artist: &str,
        threshold: f64,
    ) -> Result<(Option<Album>, f64), CatalogError> {
        let artist_pattern = format!("%{}%", artist.to_lowercase());
        let rows = sqlx::query_as::<_, DbAlbumCandidate>(
            "SELECT al.id, al.artist_id, al.title, al.year, al.thumb_url, al.genres, al.track_count,
                    al.duration_ms, al.external_id, al.match_status, al.last_attempted, a.name AS artist_name
             FROM albums al JOIN artists a ON a.id = al.artist_id
             WHERE LOWER(a.name) LIKE ? OR LOWER(?) LIKE '%' || LOWER(a.name) || '%'",
        )
        .bind(&artist_pattern)
        .bind(artist)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        let mut best: Option<(Album, f64)> = None;
        for row in rows {
            let artist_name = row.artist_name.clone();
            let album = Album::try_from(DbAlbum::from(row))?;

            let title_similarity = crate::matching::similarity(album.title(), title);
            let artist_similarity = crate::matching::similarity(&artist_name, artist);
            let score = crate::matching::score_candidate(crate::matching::CandidateScoreInput {
                title_similarity,
                artist_similarity,
                quality_term: 0.0,
            });

            if score >= threshold && best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                best = Some((album, score));
            }
        }

        match best {
            Some((album, score)) => Ok((Some(album), score)),
            None => Ok((None, 0.0)),
        }
    }

    /// Rule 3's "track batch" seed (spec §4.6): a matched album with at
    /// least one unattempted child track.
    pub async fn find_track_batch_seed(&self) -> Result<Option<Album>, CatalogError> {
        let row = sqlx::query_as::<_, DbAlbum>(
            "SELECT * FROM albums al WHERE al.match_status = 'matched'
               AND EXISTS (SELECT 1 FROM tracks t WHERE t.album_id = al.id AND t.match_status = 'unattempted')
             ORDER BY al.id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        row.map(Album::try_from).transpose()
    }

    /// Rule 4's fallback individual album (spec §4.6): unattempted, and its
    /// parent artist never matched (so there is no batch to ride along with).
    pub async fn find_fallback_unattempted(&self) -> Result<Option<Album>, CatalogError> {
        let row = sqlx::query_as::<_, DbAlbumCandidate>(
            "SELECT al.id, al.artist_id, al.title, al.year, al.thumb_url, al.genres, al.track_count,
                    al.duration_ms, al.external_id, al.match_status, al.last_attempted, a.name AS artist_name
             FROM albums al JOIN artists a ON a.id = al.artist_id
             WHERE al.match_status = 'unattempted' AND a.match_status != 'matched'
             ORDER BY al.id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        row.map(|r| Album::try_from(DbAlbum::from(r))).transpose()
    }

    pub async fn find_needing_enrichment(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Album>, CatalogError> {
        let not_found_cutoff = now - chrono::Duration::days(crate::domain::NOT_FOUND_RETRY_DAYS);
        let error_cutoff = now - chrono::Duration::days(crate::domain::ERROR_RETRY_DAYS);

        let rows = sqlx::query_as::<_, DbAlbum>(
            "SELECT * FROM albums WHERE match_status = 'unattempted'
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

        rows.into_iter().map(Album::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM albums")
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    pub async fn id_exists(&self, id: i64) -> Result<bool, CatalogError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM albums WHERE id = ?)")
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
    use crate::domain::artist::Artist;
    use crate::domain::track::Track;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Burial").unwrap()).await.unwrap();

        let mut album = Album::new(0, artist_id, "Untrue").unwrap();
        album.set_track_count(Some(13));
        let album_id = store.albums().upsert(&album).await.unwrap();

        let fetched = store.albums().get(album_id).await.unwrap().unwrap();
        assert_eq!(fetched.title(), "Untrue");
        assert_eq!(fetched.track_count(), Some(13));
    }

    #[tokio::test]
    async fn completeness_requires_every_track_to_have_a_file() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Four Tet").unwrap()).await.unwrap();
        let mut album = Album::new(0, artist_id, "Rounds").unwrap();
        album.set_track_count(Some(2));
        let album_id = store.albums().upsert(&album).await.unwrap();

        let mut t1 = Track::new(0, album_id, artist_id, "Hands").unwrap();
        t1.set_file_path(Some("/music/hands.flac".into()));
        store.tracks().upsert(&t1).await.unwrap();

        let (owned, expected, is_complete) = store.albums().check_completeness(album_id, 2).await.unwrap();
        assert_eq!((owned, expected), (1, 2));
        assert!(!is_complete);

        let mut t2 = Track::new(0, album_id, artist_id, "My Angel Rocks Back and Forth").unwrap();
        t2.set_file_path(Some("/music/angel.flac".into()));
        store.tracks().upsert(&t2).await.unwrap();

        let (_, _, is_complete) = store.albums().check_completeness(album_id, 2).await.unwrap();
        assert!(is_complete);
    }

    #[tokio::test]
    async fn check_album_exists_finds_fuzzy_match_above_threshold() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Burial").unwrap()).await.unwrap();
        store.albums().upsert(&Album::new(0, artist_id, "Untrue").unwrap()).await.unwrap();

        let (found, confidence) = store.albums().check_album_exists("untrue", "burial", 0.7).await.unwrap();
        assert!(found.is_some());
        assert!(confidence >= 0.7);
    }
}
