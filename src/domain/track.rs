use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{require_display_name, MatchStatus, ValidationError};

/// Catalog-resident track (spec §3). Every Track has exactly one owning
/// Album and Artist.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: i64,
    album_id: i64,
    artist_id: i64,
    title: String,
    track_number: Option<i32>,
    duration_ms: Option<i64>,
    file_path: Option<PathBuf>,
    bitrate: Option<i32>,
    explicit: Option<bool>,
    match_status: MatchStatus,
    external_id: Option<String>,
    last_attempted: Option<DateTime<Utc>>,
}

impl Track {
    pub fn new<S: Into<String>>(id: i64, album_id: i64, artist_id: i64, title: S) -> Result<Self, ValidationError> {
        let title = require_display_name(title.into())?;
        Ok(Self {
            id,
            album_id,
            artist_id,
            title,
            track_number: None,
            duration_ms: None,
            file_path: None,
            bitrate: None,
            explicit: None,
            match_status: MatchStatus::Unattempted,
            external_id: None,
            last_attempted: None,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn album_id(&self) -> i64 {
        self.album_id
    }

    pub fn artist_id(&self) -> i64 {
        self.artist_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: String) {
        if let Ok(title) = require_display_name(title) {
            self.title = title;
        }
    }

    pub fn track_number(&self) -> Option<i32> {
        self.track_number
    }

    pub fn set_track_number(&mut self, track_number: Option<i32>) {
        self.track_number = track_number;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
    }

    pub fn set_duration_ms(&mut self, duration_ms: Option<i64>) {
        self.duration_ms = duration_ms;
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn set_file_path(&mut self, path: Option<PathBuf>) {
        self.file_path = path;
    }

    pub fn bitrate(&self) -> Option<i32> {
        self.bitrate
    }

    pub fn set_bitrate(&mut self, bitrate: Option<i32>) {
        self.bitrate = bitrate;
    }

    pub fn explicit(&self) -> Option<bool> {
        self.explicit
    }

    pub fn set_explicit(&mut self, explicit: Option<bool>) {
        self.explicit = explicit;
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

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_title() {
        assert!(Track::new(1, 1, 1, "").is_err());
    }
}
