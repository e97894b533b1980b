use chrono::{DateTime, Utc};

use super::{require_display_name, MatchStatus, ValidationError};

/// Catalog-resident album (spec §3). Every Album has exactly one owning
/// Artist; the Catalog Store enforces the cascade-on-delete, not this type.
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    id: i64,
    artist_id: i64,
    title: String,
    release_year: Option<i32>,
    image_url: Option<String>,
    genres: Option<Vec<String>>,
    track_count: Option<i32>,
    duration_ms: Option<i64>,
    match_status: MatchStatus,
    external_id: Option<String>,
    last_attempted: Option<DateTime<Utc>>,
}

impl Album {
    pub fn new<S: Into<String>>(id: i64, artist_id: i64, title: S) -> Result<Self, ValidationError> {
        let title = require_display_name(title.into())?;
        Ok(Self {
            id,
            artist_id,
            title,
            release_year: None,
            image_url: None,
            genres: None,
            track_count: None,
            duration_ms: None,
            match_status: MatchStatus::Unattempted,
            external_id: None,
            last_attempted: None,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn artist_id(&self) -> i64 {
        self.artist_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn release_year(&self) -> Option<i32> {
        self.release_year
    }

    pub fn set_release_year(&mut self, year: Option<i32>) {
        self.release_year = year;
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn set_image_url(&mut self, url: Option<String>) {
        self.image_url = url;
    }

    pub fn genres(&self) -> Option<&[String]> {
        self.genres.as_deref()
    }

    pub fn set_genres(&mut self, genres: Option<Vec<String>>) {
        self.genres = genres;
    }

    pub fn track_count(&self) -> Option<i32> {
        self.track_count
    }

    pub fn set_track_count(&mut self, count: Option<i32>) {
        self.track_count = count;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
    }

    pub fn set_duration_ms(&mut self, duration_ms: Option<i64>) {
        self.duration_ms = duration_ms;
    }

    pub fn match_status(&self) -> MatchStatus {
        self.match_status
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn last_attempted(&self) -> Option<DateTime<Utc>> {
        self.last_attempted
    }

    pub fn set_match_result(&mut self, status: MatchStatus, external_id: Option<String>, at: DateTime<Utc>) {
        debug_assert!(status != MatchStatus::Unattempted, "use requeue() to reset");
        self.match_status = status;
        self.external_id = external_id;
        self.last_attempted = Some(at);
    }

    pub fn requeue(&mut self) {
        self.match_status = MatchStatus::Unattempted;
        self.last_attempted = None;
    }

    /// track_count <= 3 => single, 4-6 => EP, >= 7 => album (spec §4.4).
    pub fn release_category(&self) -> Option<ReleaseCategory> {
        self.track_count.map(ReleaseCategory::from_track_count)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCategory {
    Single,
    Ep,
    Album,
}

impl ReleaseCategory {
    pub fn from_track_count(track_count: i32) -> Self {
        if track_count <= 3 {
            ReleaseCategory::Single
        } else if track_count <= 6 {
            ReleaseCategory::Ep
        } else {
            ReleaseCategory::Album
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_category_boundaries() {
        assert_eq!(ReleaseCategory::from_track_count(1), ReleaseCategory::Single);
        assert_eq!(ReleaseCategory::from_track_count(3), ReleaseCategory::Single);
        assert_eq!(ReleaseCategory::from_track_count(4), ReleaseCategory::Ep);
        assert_eq!(ReleaseCategory::from_track_count(6), ReleaseCategory::Ep);
        assert_eq!(ReleaseCategory::from_track_count(7), ReleaseCategory::Album);
    }
}
