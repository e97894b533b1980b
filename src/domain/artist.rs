use chrono::{DateTime, Utc};

use super::{require_display_name, MatchStatus, ValidationError};

/// Catalog-resident artist (spec §3). `id` is the stable local id assigned by
/// whichever collaborator created the row (the out-of-scope catalog sync, or
/// the Post-Processor on a first-seen download); it is not recomputed here.
#[derive(Debug, Clone, PartialEq)]
pub struct Artist {
    id: i64,
    name: String,
    image_url: Option<String>,
    genres: Option<Vec<String>>,
    match_status: MatchStatus,
    external_id: Option<String>,
    last_attempted: Option<DateTime<Utc>>,
}

impl Artist {
    pub fn new<S: Into<String>>(id: i64, name: S) -> Result<Self, ValidationError> {
        let name = require_display_name(name.into())?;
        Ok(Self {
            id,
            name,
            image_url: None,
            genres: None,
            match_status: MatchStatus::Unattempted,
            external_id: None,
            last_attempted: None,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
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

    pub fn match_status(&self) -> MatchStatus {
        self.match_status
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn last_attempted(&self) -> Option<DateTime<Utc>> {
        self.last_attempted
    }

    /// Monotonic match-status transition (spec §3: any state may only go back
    /// to `Unattempted` via an explicit requeue, never through this setter).
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
    fn rejects_empty_name() {
        assert!(Artist::new(1, "   ").is_err());
    }

    #[test]
    fn new_artist_is_unattempted() {
        let artist = Artist::new(1, "Boards of Canada").unwrap();
        assert_eq!(artist.match_status(), MatchStatus::Unattempted);
        assert!(artist.external_id().is_none());
    }
}
