//! P2P Client (C2, spec §4.2, §6): a thin async wrapper over the download
//! daemon's HTTP surface. `HttpP2pClient` is the only I/O-performing impl;
//! the `P2pClient` trait exists so the fulfillment engine (C5) and its
//! tests can run against a fake transfer table without a live daemon.

pub mod cache;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum P2pClientError {
    #[error("request to the P2P daemon timed out")]
    Timeout,

    #[error("request to the P2P daemon failed: {0}")]
    Request(String),

    #[error("P2P daemon returned an unexpected payload: {0}")]
    Decode(String),
}

impl P2pClientError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            P2pClientError::Timeout
        } else {
            P2pClientError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub username: String,
    pub filename: String,
    pub size: u64,
    pub bitrate: Option<i32>,
    pub quality_score: f64,
}

impl TrackCandidate {
    pub fn source_key(&self) -> String {
        source_key(&self.username, &self.filename)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumCandidate {
    pub username: String,
    pub directory: String,
    pub tracks: Vec<TrackCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub tracks: Vec<TrackCandidate>,
    pub albums: Vec<AlbumCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub username: String,
    pub filename: String,
    pub state: String,
    #[serde(rename = "percentComplete")]
    pub percent_complete: f64,
}

impl TransferRecord {
    pub fn source_key(&self) -> String {
        source_key(&self.username, &self.filename)
    }

    /// Daemon state is a free-form string carrying substrings like
    /// `Queued`, `InProgress`, `Succeeded`/`Completed`, `Errored`/`Failed`
    /// (spec §4.2/§6) — never an exact enum match.
    pub fn is_succeeded(&self) -> bool {
        (self.state.contains("Succeeded") || self.state.contains("Completed")) && self.percent_complete >= 100.0
    }

    pub fn is_errored(&self) -> bool {
        self.state.contains("Errored") || self.state.contains("Failed")
    }

    pub fn is_queued(&self) -> bool {
        self.state.contains("Queued")
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.contains("InProgress")
    }
}

/// `username::basename(filename)` (spec GLOSSARY's Candidate key).
pub fn source_key(username: &str, filename: &str) -> String {
    let basename =
        std::path::Path::new(filename).file_name().and_then(|n| n.to_str()).unwrap_or(filename);
    format!("{username}::{basename}")
}

#[async_trait]
pub trait P2pClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults, P2pClientError>;
    async fn download(&self, username: &str, filename: &str, size: u64) -> Result<Option<String>, P2pClientError>;
    async fn get_all_transfers(&self) -> Result<Vec<TransferRecord>, P2pClientError>;
    async fn cancel_download(&self, id: &str, username: &str, remove: bool) -> Result<(), P2pClientError>;
    async fn clear_all_completed_downloads(&self) -> Result<(), P2pClientError>;
    async fn check_connection(&self) -> bool;
}

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const STATE_POLL_TIMEOUT: Duration = Duration::from_secs(10);
const START_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpP2pClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpP2pClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct DaemonTransfersUser {
    username: String,
    directories: Vec<DaemonTransfersDirectory>,
}

#[derive(Debug, Deserialize)]
struct DaemonTransfersDirectory {
    files: Vec<DaemonTransferFile>,
}

#[derive(Debug, Deserialize)]
struct DaemonTransferFile {
    filename: String,
    state: String,
    #[serde(rename = "percentComplete", default)]
    percent_complete: f64,
    id: String,
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    username: &'a str,
    filename: &'a str,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    id: Option<String>,
}

#[async_trait]
impl P2pClient for HttpP2pClient {
    async fn search(&self, query: &str) -> Result<SearchResults, P2pClientError> {
        let response = self
            .http
            .get(self.url("/search"))
            .query(&[("query", query)])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(P2pClientError::from_reqwest)?;

        response.json::<SearchResults>().await.map_err(|e| P2pClientError::Decode(e.to_string()))
    }

    async fn download(&self, username: &str, filename: &str, size: u64) -> Result<Option<String>, P2pClientError> {
        let response = self
            .http
            .post(self.url("/transfers/downloads"))
            .json(&DownloadRequest { username, filename, size })
            .timeout(START_DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(P2pClientError::from_reqwest)?;

        let body: DownloadResponse = response.json().await.map_err(|e| P2pClientError::Decode(e.to_string()))?;
        Ok(body.id)
    }

    async fn get_all_transfers(&self) -> Result<Vec<TransferRecord>, P2pClientError> {
        let response = self
            .http
            .get(self.url("/transfers/downloads"))
            .timeout(STATE_POLL_TIMEOUT)
            .send()
            .await
            .map_err(P2pClientError::from_reqwest)?;

        let users: Vec<DaemonTransfersUser> =
            response.json().await.map_err(|e| P2pClientError::Decode(e.to_string()))?;

        Ok(users
            .into_iter()
            .flat_map(|user| {
                let username = user.username;
                user.directories.into_iter().flat_map(move |dir| {
                    let username = username.clone();
                    dir.files.into_iter().map(move |f| TransferRecord {
                        id: f.id,
                        username: username.clone(),
                        filename: f.filename,
                        state: f.state,
                        percent_complete: f.percent_complete,
                    })
                })
            })
            .collect())
    }

    async fn cancel_download(&self, id: &str, username: &str, remove: bool) -> Result<(), P2pClientError> {
        self.http
            .delete(self.url(&format!("/transfers/downloads/{id}")))
            .query(&[("username", username), ("remove", if remove { "true" } else { "false" })])
            .timeout(STATE_POLL_TIMEOUT)
            .send()
            .await
            .map_err(P2pClientError::from_reqwest)?;
        Ok(())
    }

    async fn clear_all_completed_downloads(&self) -> Result<(), P2pClientError> {
        self.http
            .post(self.url("/transfers/downloads/clear-completed"))
            .timeout(STATE_POLL_TIMEOUT)
            .send()
            .await
            .map_err(P2pClientError::from_reqwest)?;
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        self.http.get(self.url("/ping")).timeout(Duration::from_secs(5)).send().await.is_ok_and(|r| r.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_uses_basename_only() {
        assert_eq!(source_key("alice", "/shared/Artist/Album/01 - Track.flac"), "alice::01 - Track.flac");
    }

    #[test]
    fn transfer_record_state_classification_is_substring_based() {
        let record = |state: &str, pct: f64| TransferRecord {
            id: "1".into(),
            username: "alice".into(),
            filename: "track.flac".into(),
            state: state.to_string(),
            percent_complete: pct,
        };

        assert!(record("Completed, Succeeded", 100.0).is_succeeded());
        assert!(!record("InProgress", 99.0).is_succeeded());
        assert!(record("Errored", 0.0).is_errored());
        assert!(record("TransferStates.Queued", 0.0).is_queued());
    }
}
