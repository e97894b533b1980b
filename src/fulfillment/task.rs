//! Task state machine for the Download Fulfillment Engine (C5, spec §4.5).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::wishlist::{SourceType, TrackDescriptor};
use crate::p2p::TrackCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Submitted but not yet claimed by the slot dispatcher.
    Pending,
    Searching,
    Queued,
    Downloading,
    PostProcessing,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// The set counted by the slot dispatcher's `active_count` and by the
    /// healing tick's reconciliation (spec §4.5, §8 property 1).
    pub fn counts_as_active(self) -> bool {
        matches!(self, TaskStatus::Searching | TaskStatus::Downloading | TaskStatus::Queued)
    }
}

/// A caller-submitted desire for one track (spec GLOSSARY's "Fulfillment request").
#[derive(Debug, Clone)]
pub struct FulfillmentRequest {
    pub descriptor: TrackDescriptor,
    pub source_type: SourceType,
    pub source_info: serde_json::Value,
    pub is_album_download: bool,
    pub track_number: Option<i32>,
}

pub const MAX_ERROR_RETRIES: u32 = 3;
pub const MAX_TIMEOUT_RETRIES: u32 = 3;
pub const ERROR_RETRY_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(5);
pub const TIMEOUT_RETRY_MIN_GAP: std::time::Duration = std::time::Duration::from_secs(30);
pub const ALBUM_DOWNLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
pub const BACKGROUND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);
pub const MISSING_LIVE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);

pub struct Task {
    pub descriptor: TrackDescriptor,
    pub source_type: SourceType,
    pub source_info: serde_json::Value,
    pub is_album_download: bool,
    pub track_number: Option<i32>,

    pub status: TaskStatus,
    pub status_change_time: Instant,
    pub queued_since: Option<Instant>,
    pub downloading_since: Option<Instant>,

    pub used_sources: HashSet<String>,
    pub current_candidate: Option<TrackCandidate>,
    pub transfer_id: Option<String>,

    pub error_retry_count: u32,
    pub timeout_retry_count: u32,
    pub last_error_retry: Option<Instant>,
    pub last_timeout_retry: Option<Instant>,

    pub destination_path: Option<std::path::PathBuf>,
    pub failure_reason: Option<String>,

    /// Woken by the monitor after it mutates this task's status (retry,
    /// completion) so the owning `run_task` worker can react without polling.
    pub notify: Arc<Notify>,
}

impl Task {
    pub fn new(request: FulfillmentRequest) -> Self {
        Self {
            descriptor: request.descriptor,
            source_type: request.source_type,
            source_info: request.source_info,
            is_album_download: request.is_album_download,
            track_number: request.track_number,
            status: TaskStatus::Pending,
            status_change_time: Instant::now(),
            queued_since: None,
            downloading_since: None,
            used_sources: HashSet::new(),
            current_candidate: None,
            transfer_id: None,
            error_retry_count: 0,
            timeout_retry_count: 0,
            last_error_retry: None,
            last_timeout_retry: None,
            destination_path: None,
            failure_reason: None,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn queued_or_downloading_timeout(&self) -> std::time::Duration {
        if self.is_album_download {
            ALBUM_DOWNLOAD_TIMEOUT
        } else {
            BACKGROUND_TIMEOUT
        }
    }

    /// Mutates this task into a fresh search attempt against the next
    /// candidate (spec §4.5 "Retry mechanics"). The caller is responsible
    /// for notifying the task's worker afterward.
    pub fn retry(&mut self) {
        if let Some(candidate) = &self.current_candidate {
            self.used_sources.insert(candidate.source_key());
        }
        self.status = TaskStatus::Searching;
        self.status_change_time = Instant::now();
        self.queued_since = None;
        self.downloading_since = None;
        self.current_candidate = None;
        self.transfer_id = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.status_change_time = Instant::now();
        self.failure_reason = Some(reason.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.status_change_time = Instant::now();
    }
}
