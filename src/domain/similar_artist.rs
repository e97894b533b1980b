use chrono::{DateTime, Utc};

/// `(source_artist_id, similar_artist_id)` is unique; `occurrence_count`
/// aggregates across every watchlist source that names this pair (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarArtist {
    pub source_artist_id: String,
    pub similar_artist_id: String,
    pub name: String,
    pub rank: i32,
    pub occurrence_count: i32,
    pub last_refreshed: DateTime<Utc>,
}
