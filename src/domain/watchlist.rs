use chrono::{DateTime, Utc};

/// Release types a watchlist entry wants to see fulfilled (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseTypeFilter {
    pub albums: bool,
    pub eps: bool,
    pub singles: bool,
}

impl Default for ReleaseTypeFilter {
    fn default() -> Self {
        Self { albums: true, eps: true, singles: true }
    }
}

/// Content categories a watchlist entry wants filtered out (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFilter {
    pub live: bool,
    pub remix: bool,
    pub acoustic: bool,
    pub compilation: bool,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self { live: true, remix: true, acoustic: true, compilation: true }
    }
}

/// A watched artist. User-created, updated by the Watchlist Scanner on each
/// scan, never deleted except by explicit user action (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistEntry {
    external_artist_id: String,
    name: String,
    last_scan_timestamp: Option<DateTime<Utc>>,
    release_types: ReleaseTypeFilter,
    content_filter: ContentFilter,
}

impl WatchlistEntry {
    pub fn new(external_artist_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_artist_id: external_artist_id.into(),
            name: name.into(),
            last_scan_timestamp: None,
            release_types: ReleaseTypeFilter::default(),
            content_filter: ContentFilter::default(),
        }
    }

    pub fn external_artist_id(&self) -> &str {
        &self.external_artist_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_scan_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_scan_timestamp
    }

    pub fn set_last_scan_timestamp(&mut self, at: DateTime<Utc>) {
        self.last_scan_timestamp = Some(at);
    }

    pub fn release_types(&self) -> ReleaseTypeFilter {
        self.release_types
    }

    pub fn set_release_types(&mut self, filter: ReleaseTypeFilter) {
        self.release_types = filter;
    }

    pub fn content_filter(&self) -> ContentFilter {
        self.content_filter
    }

    pub fn set_content_filter(&mut self, filter: ContentFilter) {
        self.content_filter = filter;
    }

    /// "must-scan" per spec §4.7 step 1: never scanned, or stale by more than 7 days.
    pub fn must_scan(&self, now: DateTime<Utc>) -> bool {
        match self.last_scan_timestamp {
            None => true,
            Some(last) => now.signed_duration_since(last).num_days() >= 7,
        }
    }
}
