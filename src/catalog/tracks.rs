use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};

use crate::domain::track::Track;
use crate::domain::MatchStatus;

use super::CatalogError;

#[derive(FromRow)]
struct DbTrack {
    id: i64,
    album_id: i64,
    artist_id: i64,
    title: String,
    track_number: Option<i32>,
    duration_ms: Option<i64>,
    file_path: Option<String>,
    bitrate: Option<i32>,
    explicit: Option<bool>,
    external_id: Option<String>,
    match_status: String,
    last_attempted: Option<DateTime<Utc>>,
}

impl TryFrom<DbTrack> for Track {
    type Error = CatalogError;

    fn try_from(row: DbTrack) -> Result<Self, Self::Error> {
        let match_status = MatchStatus::try_from(row.match_status.as_str()).unwrap_or(MatchStatus::Unattempted);

        let mut track = Track::new(row.id, row.album_id, row.artist_id, row.title).map_err(|_| {
            CatalogError::ConstraintViolation { description: "track row had an empty title".into() }
        })?;
        track.set_track_number(row.track_number);
        track.set_duration_ms(row.duration_ms);
        track.set_file_path(row.file_path.map(PathBuf::from));
        track.set_bitrate(row.bitrate);
        track.set_explicit(row.explicit);
        if match_status != MatchStatus::Unattempted {
            track.set_match_result(match_status, row.external_id, row.last_attempted.unwrap_or_else(Utc::now));
        }
        Ok(track)
    }
}

#[derive(FromRow)]
struct DbTrackCandidate {
    id: i64,
    album_id: i64,
    artist_id: i64,
    title: String,
    track_number: Option<i32>,
    duration_ms: Option<i64>,
    file_path: Option<String>,
    bitrate: Option<i32>,
    explicit: Option<bool>,
    external_id: Option<String>,
    match_status: String,
    last_attempted: Option<DateTime<Utc>>,
    artist_name: String,
}

impl From<DbTrackCandidate> for DbTrack {
    fn from(row: DbTrackCandidate) -> Self {
        DbTrack {
            id: row.id,
            album_id: row.album_id,
            artist_id: row.artist_id,
            title: row.title,
            track_number: row.track_number,
            duration_ms: row.duration_ms,
            file_path: row.file_path,
            bitrate: row.bitrate,
            explicit: row.explicit,
            external_id: row.external_id,
            match_status: row.match_status,
            last_attempted: row.last_attempted,
        }
    }
}

pub struct TracksRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TracksRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, track: &Track) -> Result<i64, CatalogError> {
        let file_path = track
            .file_path()
            .map(|p| p.to_str().map(str::to_owned).ok_or_else(|| CatalogError::InvalidPathEncoding(p.clone())))
            .transpose()?;

        if let Some(external_id) = track.external_id() {
            let existing_id: Option<i64> = sqlx::query_scalar("SELECT id FROM tracks WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(self.pool)
                .await
                .map_err(CatalogError::from_sqlx_error)?;

            if let Some(existing_id) = existing_id {
                sqlx::query(
                    "UPDATE tracks SET title = ?, track_number = ?, duration_ms = ?, file_path = ?, bitrate = ?,
                     explicit = ?, match_status = ?, last_attempted = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                )
                .bind(track.title())
                .bind(track.track_number())
                .bind(track.duration_ms())
                .bind(&file_path)
                .bind(track.bitrate())
                .bind(track.explicit())
                .bind(track.match_status().as_str())
                .bind(track.last_attempted())
                .bind(existing_id)
                .execute(self.pool)
                .await
                .map_err(CatalogError::from_sqlx_error)?;
                return Ok(existing_id);
            }
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tracks (album_id, artist_id, title, track_number, duration_ms, file_path, bitrate,
             explicit, external_id, match_status, last_attempted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(track.album_id())
        .bind(track.artist_id())
        .bind(track.title())
        .bind(track.track_number())
        .bind(track.duration_ms())
        .bind(&file_path)
        .bind(track.bitrate())
        .bind(track.explicit())
        .bind(track.external_id())
        .bind(track.match_status().as_str())
        .bind(track.last_attempted())
        .fetch_one(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Track>, CatalogError> {
        let row = sqlx::query_as::<_, DbTrack>("SELECT * FROM tracks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        row.map(Track::try_from).transpose()
    }

    pub async fn list_by_album(&self, album_id: i64) -> Result<Vec<Track>, CatalogError> {
        let rows = sqlx::query_as::<_, DbTrack>("SELECT * FROM tracks WHERE album_id = ? ORDER BY track_number ASC")
            .bind(album_id)
            .fetch_all(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)?;

        rows.into_iter().map(Track::try_from).collect()
    }

    /// Fuzzy existence check used before queuing a fulfillment task (spec
    /// §4.1, backed by the Match Engine's `similarity()`): returns every
    /// track on the album whose title's normalized similarity to
    /// `title_fragment` the caller should score itself, since scoring
    /// lives in the Match Engine, not the store.
    pub async fn candidates_for_fuzzy_match(&self, album_id: i64) -> Result<Vec<Track>, CatalogError> {
        self.list_by_album(album_id).await
    }

    /// `check_track_exists(title, artist, threshold)` (spec §4.1): SQL
    /// narrows to tracks whose owning artist name loosely overlaps
    /// `artist`, then the Match Engine scores each candidate on title and
    /// artist similarity (spec §4.5 weights: 0.6 title, 0.4 artist) and the
    /// best-scoring candidate above `threshold` wins. Also used by the
    /// Wishlist "already satisfied" invariant (spec §3) at threshold 0.7.
    pub async fn check_track_exists(
        &self,
        title: &str,
        artist: &str,
        threshold: f64,
    ) -> Result<(Option<Track>, f64), CatalogError> {
        let artist_pattern = format!("%{}%", artist.to_lowercase());
        let rows = sqlx::query_as::<_, DbTrackCandidate>(
            "SELECT t.id, t.album_id, t.artist_id, t.title, t.track_number, t.duration_ms, t.file_path,
                    t.bitrate, t.explicit, t.external_id, t.match_status, t.last_attempted, a.name AS artist_name
             FROM tracks t JOIN artists a ON a.id = t.artist_id
             WHERE LOWER(a.name) LIKE ? OR LOWER(?) LIKE '%' || LOWER(a.name) || '%'",
        )
        .bind(&artist_pattern)
        .bind(artist)
        .fetch_all(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        let mut best: Option<(Track, f64)> = None;
        for row in rows {
            let artist_name = row.artist_name.clone();
            let track = Track::try_from(DbTrack::from(row))?;

            let title_similarity = crate::matching::similarity(track.title(), title);
            let artist_similarity = crate::matching::similarity(&artist_name, artist);
            let score = crate::matching::score_candidate(crate::matching::CandidateScoreInput {
                title_similarity,
                artist_similarity,
                quality_term: 0.0,
            });

            if score >= threshold && best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                best = Some((track, score));
            }
        }

        match best {
            Some((track, score)) => Ok((Some(track), score)),
            None => Ok((None, 0.0)),
        }
    }

    /// Rule 5's fallback individual track (spec §4.6): unattempted, and its
    /// parent album never matched.
    pub async fn find_fallback_unattempted(&self) -> Result<Option<Track>, CatalogError> {
        let row = sqlx::query_as::<_, DbTrackCandidate>(
            "SELECT t.id, t.album_id, t.artist_id, t.title, t.track_number, t.duration_ms, t.file_path,
                    t.bitrate, t.explicit, t.external_id, t.match_status, t.last_attempted, a.name AS artist_name
             FROM tracks t
             JOIN artists a ON a.id = t.artist_id
             JOIN albums al ON al.id = t.album_id
             WHERE t.match_status = 'unattempted' AND al.match_status != 'matched'
             ORDER BY t.id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        row.map(|r| Track::try_from(DbTrack::from(r))).transpose()
    }

    pub async fn find_needing_enrichment(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Track>, CatalogError> {
        let not_found_cutoff = now - chrono::Duration::days(crate::domain::NOT_FOUND_RETRY_DAYS);
        let error_cutoff = now - chrono::Duration::days(crate::domain::ERROR_RETRY_DAYS);

        let rows = sqlx::query_as::<_, DbTrack>(
            "SELECT * FROM tracks WHERE match_status = 'unattempted'
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

        rows.into_iter().map(Track::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
            .fetch_one(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    pub async fn id_exists(&self, id: i64) -> Result<bool, CatalogError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM tracks WHERE id = ?)")
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
    use crate::domain::album::Album;
    use crate::domain::artist::Artist;

    #[tokio::test]
    async fn upsert_then_get_round_trips_file_path() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Bonobo").unwrap()).await.unwrap();
        let album_id = store.albums().upsert(&Album::new(0, artist_id, "Migration").unwrap()).await.unwrap();

        let mut track = Track::new(0, album_id, artist_id, "Kerala").unwrap();
        track.set_file_path(Some("/music/bonobo/migration/01 - kerala.flac".into()));
        track.set_track_number(Some(1));

        let id = store.tracks().upsert(&track).await.unwrap();
        let fetched = store.tracks().get(id).await.unwrap().unwrap();

        assert_eq!(fetched.file_path().unwrap().to_str().unwrap(), "/music/bonobo/migration/01 - kerala.flac");
        assert_eq!(fetched.track_number(), Some(1));
    }

    #[tokio::test]
    async fn deleting_album_cascades_to_tracks() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Burial").unwrap()).await.unwrap();
        let album_id = store.albums().upsert(&Album::new(0, artist_id, "Untrue").unwrap()).await.unwrap();
        let track_id =
            store.tracks().upsert(&Track::new(0, album_id, artist_id, "Archangel").unwrap()).await.unwrap();

        store.artists().delete(artist_id).await.unwrap();

        assert!(!store.tracks().id_exists(track_id).await.unwrap());
    }

    #[tokio::test]
    async fn check_track_exists_finds_fuzzy_match_above_threshold() {
        let store = prepare_store().await;
        let artist_id = store.artists().upsert(&Artist::new(0, "Bonobo").unwrap()).await.unwrap();
        let album_id = store.albums().upsert(&Album::new(0, artist_id, "Migration").unwrap()).await.unwrap();
        store.tracks().upsert(&Track::new(0, album_id, artist_id, "Kerala").unwrap()).await.unwrap();

        let (found, confidence) = store.tracks().check_track_exists("kerala", "bonobo", 0.7).await.unwrap();
        assert!(found.is_some());
        assert!(confidence >= 0.7);

        let (missing, _) = store.tracks().check_track_exists("totally different song", "bonobo", 0.7).await.unwrap();
        assert!(missing.is_none());
    }
}
