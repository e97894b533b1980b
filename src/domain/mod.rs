pub mod track;
pub mod album;
pub mod artist;
pub mod watchlist;
pub mod wishlist;
pub mod discovery;
pub mod similar_artist;

use serde::{Serialize, Deserialize};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Name field cannot be an empty string.")]
    NameIsEmptyString,

    #[error("Duration cannot be zero.")]
    DurationIsZero,
}

/// Monotonic external-match lifecycle shared by Artist, Album and Track (spec §3).
///
/// `Unattempted -> {Matched | NotFound | Error}`; any terminal state returns to
/// `Unattempted` only via an explicit requeue (the enrichment worker's stale-retry
/// rule, never a direct transition performed by this type itself).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Unattempted,
    Matched,
    NotFound,
    Error,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unattempted => "unattempted",
            MatchStatus::Matched => "matched",
            MatchStatus::NotFound => "not_found",
            MatchStatus::Error => "error",
        }
    }
}

impl TryFrom<&str> for MatchStatus {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "unattempted" => Ok(MatchStatus::Unattempted),
            "matched" => Ok(MatchStatus::Matched),
            "not_found" => Ok(MatchStatus::NotFound),
            "error" => Ok(MatchStatus::Error),
            _ => Ok(MatchStatus::Unattempted),
        }
    }
}

/// Re-eligibility windows for a stale `not_found`/`error` match attempt (spec §3, §7).
pub const NOT_FOUND_RETRY_DAYS: i64 = 30;
pub const ERROR_RETRY_DAYS: i64 = 7;

/// Trims a display name and rejects it if nothing is left. Unlike
/// `matching::normalize`, this does not lowercase or strip punctuation —
/// catalog rows keep the title exactly as the source provided it.
pub(crate) fn require_display_name(name: String) -> Result<String, ValidationError> {
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() {
        return Err(ValidationError::NameIsEmptyString);
    }
    Ok(trimmed)
}
