use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A track cached for curation (Release Radar / Discovery Weekly) from a
/// similar artist's catalog. Append-only with a rolling 365-day eviction
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPoolTrack {
    pub external_track_id: String,
    pub external_artist_id: String,
    pub external_album_id: String,
    pub name: String,
    pub artist_name: String,
    pub album_name: String,
    pub cover_url: Option<String>,
    pub duration_ms: i64,
    pub popularity: i32,
    pub release_date: Option<String>,
    pub is_new_release: bool,
    #[serde(default)]
    pub artist_genres: Vec<String>,
    /// The full original descriptor as returned by the metadata provider,
    /// cached so curation never has to re-fetch it.
    pub original: serde_json::Value,
    pub added_at: DateTime<Utc>,
}

impl DiscoveryPoolTrack {
    /// A release is "new" if its release date falls within 30 days of `now`
    /// (spec §4.7 discovery-pool population rule).
    pub fn classify_is_new_release(release_date: Option<&str>, now: DateTime<Utc>) -> bool {
        let Some(date_str) = release_date else { return false };
        let Some(parsed) = parse_release_date(date_str) else { return false };
        let age_days = now.signed_duration_since(parsed).num_days();
        (0..=30).contains(&age_days)
    }
}

pub fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(&format!("{raw}-01-01"), "%Y-%m-%d") {
        if raw.len() == 4 {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        if raw.len() == 7 {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recent_release_as_new() {
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().to_utc();
        assert!(DiscoveryPoolTrack::classify_is_new_release(Some("2026-07-10"), now));
        assert!(!DiscoveryPoolTrack::classify_is_new_release(Some("2025-01-01"), now));
    }

    #[test]
    fn parses_year_only_release_date() {
        let parsed = parse_release_date("2024").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-01-01");
    }
}
