use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form album summary carried alongside a wishlist/discovery entry
/// (spec §3's "album {id,name,images,release_date,album_type}").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub release_date: Option<String>,
    pub album_type: Option<String>,
}

/// Full external track descriptor, carried verbatim from the metadata
/// provider through fulfillment and into the wishlist on failure (spec §3, §GLOSSARY).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: AlbumDescriptor,
    pub duration_ms: i64,
    pub popularity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Playlist,
    Album,
    Watchlist,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Playlist => "playlist",
            SourceType::Album => "album",
            SourceType::Watchlist => "watchlist",
            SourceType::Manual => "manual",
        }
    }
}

impl TryFrom<&str> for SourceType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "playlist" => Ok(SourceType::Playlist),
            "album" => Ok(SourceType::Album),
            "watchlist" => Ok(SourceType::Watchlist),
            "manual" => Ok(SourceType::Manual),
            _ => Err(()),
        }
    }
}

/// A persisted, time-retried fulfillment failure (spec §3). Unique on
/// `external_track_id`; a second add merges `source_info` rather than
/// inserting a duplicate row (spec §3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct WishlistEntry {
    descriptor: TrackDescriptor,
    failure_reason: String,
    source_type: SourceType,
    source_info: serde_json::Value,
    retry_count: i32,
    date_added: DateTime<Utc>,
    last_attempted: Option<DateTime<Utc>>,
}

impl WishlistEntry {
    pub fn new(
        descriptor: TrackDescriptor,
        failure_reason: impl Into<String>,
        source_type: SourceType,
        source_info: serde_json::Value,
        date_added: DateTime<Utc>,
    ) -> Self {
        Self {
            descriptor,
            failure_reason: failure_reason.into(),
            source_type,
            source_info,
            retry_count: 0,
            date_added,
            last_attempted: None,
        }
    }

    pub fn external_track_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    pub fn failure_reason(&self) -> &str {
        &self.failure_reason
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_info(&self) -> &serde_json::Value {
        &self.source_info
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn date_added(&self) -> DateTime<Utc> {
        self.date_added
    }

    pub fn last_attempted(&self) -> Option<DateTime<Utc>> {
        self.last_attempted
    }

    /// Merge source info from a second failed attempt on the same track
    /// instead of inserting a duplicate row (spec §3 invariant).
    pub fn merge_source_info(&mut self, other: serde_json::Value) {
        match (&mut self.source_info, other) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (slot, incoming) => *slot = incoming,
        }
    }

    pub fn record_retry_attempt(&mut self, failure_reason: impl Into<String>, at: DateTime<Utc>) {
        self.retry_count += 1;
        self.failure_reason = failure_reason.into();
        self.last_attempted = Some(at);
    }
}
