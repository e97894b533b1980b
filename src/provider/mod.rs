//! Metadata Provider Client (C3, spec §4.3): a rate-limited async wrapper
//! over the external streaming-metadata provider's search/fetch endpoints.
//! `HttpProviderClient` is the only I/O-performing impl; the `ProviderClient`
//! trait exists so C7/C8 and their tests can run against canned responses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderClientError {
    #[error("request to the metadata provider timed out")]
    Timeout,

    #[error("request to the metadata provider failed: {0}")]
    Request(String),

    #[error("metadata provider returned an unexpected payload: {0}")]
    Decode(String),

    #[error("metadata provider rejected our credentials")]
    Auth,

    #[error("metadata provider returned a numeric-only id where an alphanumeric id was expected: {0}")]
    InvalidId(String),
}

impl ProviderClientError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderClientError::Timeout
        } else if matches!(err.status().map(|s| s.as_u16()), Some(401) | Some(403)) {
            ProviderClientError::Auth
        } else {
            ProviderClientError::Request(err.to_string())
        }
    }
}

/// Identities the provider hands back must be alphanumeric; a numeric-only
/// id signals a misconfigured secondary provider (spec §6, §7).
pub fn is_valid_external_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub album_type: Option<String>,
    #[serde(default)]
    pub total_tracks: Option<i32>,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub tracks: Option<ProviderTrackPage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrackPage {
    pub items: Vec<ProviderTrack>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub track_number: Option<i32>,
    #[serde(default)]
    pub duration_ms: Option<i32>,
    #[serde(default)]
    pub explicit: Option<bool>,
}

/// One entry of a "fans of X also listen to" response (spec §4.7's "external
/// similar-artists source"). The crate only specifies the storage/refresh
/// cadence that sits on top of this; the wire shape here is the minimal
/// contract the Watchlist Scanner needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSimilarArtist {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn search_artists(&self, query: &str, limit: u32) -> Result<Vec<ProviderArtist>, ProviderClientError>;
    async fn search_albums(&self, query: &str, limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError>;
    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<ProviderTrack>, ProviderClientError>;
    async fn get_artist(&self, id: &str) -> Result<ProviderArtist, ProviderClientError>;
    async fn get_artist_albums(&self, id: &str, album_type: Option<&str>, limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError>;
    async fn get_album(&self, id: &str) -> Result<ProviderAlbum, ProviderClientError>;
    async fn get_album_tracks(&self, id: &str) -> Result<Vec<ProviderTrack>, ProviderClientError>;

    /// Up to `limit` artists similar to `id`, ordered by the provider's own
    /// rank (spec §4.7). Default implementation returns no results so
    /// existing test doubles don't need updating; `HttpProviderClient`
    /// overrides it with a real call.
    async fn get_similar_artists(&self, _id: &str, _limit: u32) -> Result<Vec<ProviderSimilarArtist>, ProviderClientError> {
        Ok(Vec::new())
    }

    /// Must be side-effect-free and cheap: no network call.
    fn is_authenticated(&self) -> bool;
}

/// Enforces a minimum gap between outbound calls (target 200ms, spec §4.3)
/// by having every caller await the same mutex-guarded clock.
struct PacedGate {
    min_gap: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PacedGate {
    fn new(min_gap: Duration) -> Self {
        Self { min_gap, last_call: Mutex::new(None) }
    }

    async fn wait_turn(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_gap {
                tokio::time::sleep(self.min_gap - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    gate: Arc<PacedGate>,
    token: Mutex<Option<AccessToken>>,
}

const MIN_CALL_GAP: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

impl HttpProviderClient {
    pub fn new(base_url: impl Into<String>, client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            client_id,
            client_secret,
            gate: Arc::new(PacedGate::new(MIN_CALL_GAP)),
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn bearer_token(&self) -> Result<Option<String>, ProviderClientError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Ok(None);
        };

        let mut guard = self.token.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.expires_at > Instant::now() {
                return Ok(Some(existing.token.clone()));
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default = "default_expires_in")]
            expires_in: u64,
        }
        fn default_expires_in() -> u64 {
            3600
        }

        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(&[("grant_type", "client_credentials"), ("client_id", client_id), ("client_secret", client_secret)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(ProviderClientError::from_reqwest)?;

        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            return Err(ProviderClientError::Auth);
        }

        let body: TokenResponse = response.json().await.map_err(|e| ProviderClientError::Decode(e.to_string()))?;
        let fresh = AccessToken {
            token: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in.saturating_sub(30)),
        };
        *guard = Some(fresh);
        Ok(Some(body.access_token))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ProviderClientError> {
        self.gate.wait_turn().await;

        let token = self.bearer_token().await?;
        let mut request = self.http.get(self.url(path)).query(query).timeout(REQUEST_TIMEOUT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ProviderClientError::from_reqwest)?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderClientError::Auth);
        }
        response.json::<T>().await.map_err(|e| ProviderClientError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchArtistsEnvelope {
    artists: ProviderArtistPage,
}
#[derive(Debug, Deserialize)]
struct ProviderArtistPage {
    items: Vec<ProviderArtist>,
}
#[derive(Debug, Deserialize)]
struct SearchAlbumsEnvelope {
    albums: ProviderAlbumPage,
}
#[derive(Debug, Deserialize)]
struct ProviderAlbumPage {
    items: Vec<ProviderAlbum>,
}
#[derive(Debug, Deserialize)]
struct SearchTracksEnvelope {
    tracks: ProviderTrackPage,
}
#[derive(Debug, Deserialize)]
struct ArtistAlbumsEnvelope {
    items: Vec<ProviderAlbum>,
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn search_artists(&self, query: &str, limit: u32) -> Result<Vec<ProviderArtist>, ProviderClientError> {
        let envelope: SearchArtistsEnvelope = self
            .get_json("/search", &[("q", query.to_string()), ("type", "artist".into()), ("limit", limit.to_string())])
            .await?;
        Ok(envelope.artists.items)
    }

    async fn search_albums(&self, query: &str, limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
        let envelope: SearchAlbumsEnvelope = self
            .get_json("/search", &[("q", query.to_string()), ("type", "album".into()), ("limit", limit.to_string())])
            .await?;
        Ok(envelope.albums.items)
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<ProviderTrack>, ProviderClientError> {
        let envelope: SearchTracksEnvelope = self
            .get_json("/search", &[("q", query.to_string()), ("type", "track".into()), ("limit", limit.to_string())])
            .await?;
        Ok(envelope.tracks.items)
    }

    async fn get_artist(&self, id: &str) -> Result<ProviderArtist, ProviderClientError> {
        if !is_valid_external_id(id) {
            return Err(ProviderClientError::InvalidId(id.to_string()));
        }
        self.get_json(&format!("/artists/{id}"), &[]).await
    }

    async fn get_artist_albums(&self, id: &str, album_type: Option<&str>, limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
        if !is_valid_external_id(id) {
            return Err(ProviderClientError::InvalidId(id.to_string()));
        }
        let mut query = vec![("limit", limit.to_string())];
        if let Some(album_type) = album_type {
            query.push(("include_groups", album_type.to_string()));
        }
        let envelope: ArtistAlbumsEnvelope = self.get_json(&format!("/artists/{id}/albums"), &query).await?;
        Ok(envelope.items)
    }

    async fn get_album(&self, id: &str) -> Result<ProviderAlbum, ProviderClientError> {
        if !is_valid_external_id(id) {
            return Err(ProviderClientError::InvalidId(id.to_string()));
        }
        self.get_json(&format!("/albums/{id}"), &[]).await
    }

    async fn get_album_tracks(&self, id: &str) -> Result<Vec<ProviderTrack>, ProviderClientError> {
        if !is_valid_external_id(id) {
            return Err(ProviderClientError::InvalidId(id.to_string()));
        }
        let page: ProviderTrackPage = self.get_json(&format!("/albums/{id}/tracks"), &[]).await?;
        Ok(page.items)
    }

    async fn get_similar_artists(&self, id: &str, limit: u32) -> Result<Vec<ProviderSimilarArtist>, ProviderClientError> {
        if !is_valid_external_id(id) {
            return Err(ProviderClientError::InvalidId(id.to_string()));
        }
        #[derive(Debug, Deserialize)]
        struct RelatedArtistsEnvelope {
            artists: Vec<ProviderArtist>,
        }
        let envelope: RelatedArtistsEnvelope =
            self.get_json(&format!("/artists/{id}/related-artists"), &[("limit", limit.to_string())]).await?;
        Ok(envelope
            .artists
            .into_iter()
            .map(|artist| ProviderSimilarArtist { id: artist.id, name: artist.name })
            .collect())
    }

    fn is_authenticated(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_numeric_only_ids() {
        assert!(!is_valid_external_id("123456"));
        assert!(is_valid_external_id("4iV5W9uYEdYUVa79Axb7Rh"));
        assert!(!is_valid_external_id(""));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_gate_enforces_minimum_gap() {
        let gate = PacedGate::new(Duration::from_millis(200));
        let start = Instant::now();

        gate.wait_turn().await;
        gate.wait_turn().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn http_client_without_credentials_reports_unauthenticated() {
        let client = HttpProviderClient::new("https://provider.example.test", None, None);
        assert!(!client.is_authenticated());
    }
}
