//! Download Fulfillment Engine (C5, spec §4.5): the hardest subsystem. It
//! drives batches of per-track tasks through `searching -> (starting) ->
//! queued/downloading -> completed -> post-processing -> done`, ranking
//! candidates with the Match Engine (C4), retrying stalled or errored
//! sources, and routing permanent failures to the Wishlist.
//!
//! Redesign per spec §9: no shared mutable dict reached into by callers.
//! All batch/task state lives behind one mutex owned by `Engine`; outside
//! callers only see events on `events()` and the results of `submit_batch`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::domain::wishlist::WishlistEntry;
use crate::p2p::cache::TransferCache;
use crate::p2p::{P2pClient, TrackCandidate};

use super::errors::FulfillmentError;
use super::task::{
    FulfillmentRequest, Task, TaskStatus, ERROR_RETRY_COOLDOWN, MAX_ERROR_RETRIES, MAX_TIMEOUT_RETRIES,
    TIMEOUT_RETRY_MIN_GAP,
};

const MISSING_LIVE_TIMEOUT: Duration = Duration::from_secs(90);
const FILE_SETTLE_DELAY: Duration = Duration::from_secs(1);
const FILENAME_MATCH_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const MONITOR_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const HEALING_TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub batch_id: Uuid,
    pub external_track_id: String,
    pub status: TaskStatus,
    pub progress: Option<f64>,
    pub error: Option<String>,
}

/// A batch's per-task terminal outcome, returned by `Engine::batch_outcomes`.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub external_track_id: String,
    pub status: TaskStatus,
    pub failure_reason: Option<String>,
}

struct Batch {
    tasks: Vec<Task>,
    queue_index: usize,
    active_count: usize,
    max_concurrent: usize,
}

struct Inner {
    store: Arc<CatalogStore>,
    p2p: Arc<dyn P2pClient>,
    cache: Arc<TransferCache>,
    download_root: PathBuf,
    library_root: PathBuf,
    batches: Mutex<HashMap<Uuid, Batch>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

enum TimeoutOutcome {
    Retried,
    WaitLonger,
    Exhausted,
}

impl Engine {
    pub fn new(
        store: Arc<CatalogStore>,
        p2p: Arc<dyn P2pClient>,
        cache: Arc<TransferCache>,
        download_root: PathBuf,
        library_root: PathBuf,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            inner: Arc::new(Inner { store, p2p, cache, download_root, library_root, batches: Mutex::new(HashMap::new()), events: tx }),
        };
        (engine, rx)
    }

    /// Submits a new batch and kicks off the slot dispatcher. Returns
    /// immediately; progress is observable via `events()`.
    pub async fn submit_batch(&self, requests: Vec<FulfillmentRequest>, max_concurrent: Option<usize>) -> Uuid {
        let batch_id = Uuid::new_v4();
        let batch = Batch {
            tasks: requests.into_iter().map(Task::new).collect(),
            queue_index: 0,
            active_count: 0,
            max_concurrent: max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
        };
        self.inner.batches.lock().await.insert(batch_id, batch);
        self.dispatch(batch_id).await;
        batch_id
    }

    pub async fn is_batch_complete(&self, batch_id: Uuid) -> Result<bool, FulfillmentError> {
        let batches = self.inner.batches.lock().await;
        let batch = batches.get(&batch_id).ok_or(FulfillmentError::UnknownBatch(batch_id))?;
        Ok(batch.queue_index == batch.tasks.len() && batch.active_count == 0)
    }

    /// Per-task terminal outcomes for a completed batch, keyed by external
    /// track id — what the Wishlist Auto-Retry Scheduler (C9, spec §4.8)
    /// reconciles against the wishlist once `is_batch_complete` is true.
    pub async fn batch_outcomes(&self, batch_id: Uuid) -> Result<Vec<TaskOutcome>, FulfillmentError> {
        let batches = self.inner.batches.lock().await;
        let batch = batches.get(&batch_id).ok_or(FulfillmentError::UnknownBatch(batch_id))?;
        Ok(batch
            .tasks
            .iter()
            .map(|t| TaskOutcome {
                external_track_id: t.descriptor.id.clone(),
                status: t.status,
                failure_reason: t.failure_reason.clone(),
            })
            .collect())
    }

    /// Drops a finished batch's bookkeeping. Callers that only need
    /// aggregate completion (C9) should release the batch once they've read
    /// its outcomes, since the engine itself never evicts a terminal batch.
    pub async fn forget_batch(&self, batch_id: Uuid) {
        self.inner.batches.lock().await.remove(&batch_id);
    }

    /// Runs the global stall/error monitor loop forever. Exactly one
    /// instance should be spawned per process; ticks are inherently
    /// serialized because the loop body runs to completion before the next
    /// `tick()` (spec §5 ordering guarantee).
    pub async fn run_monitor_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.monitor_tick().await;
        }
    }

    /// Runs the periodic worker-count healing reconciliation forever
    /// (spec §4.5 "Worker-count healing"). Retained intentionally as a
    /// defensive backstop, not an optimization (spec §9).
    pub async fn run_healing_loop(&self) {
        let mut interval = tokio::time::interval(HEALING_TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.healing_tick().await;
        }
    }

    async fn dispatch(&self, batch_id: Uuid) {
        loop {
            let idx = {
                let mut batches = self.inner.batches.lock().await;
                let Some(batch) = batches.get_mut(&batch_id) else { return };
                if batch.active_count < batch.max_concurrent && batch.queue_index < batch.tasks.len() {
                    let idx = batch.queue_index;
                    batch.queue_index += 1;
                    batch.active_count += 1;
                    batch.tasks[idx].status = TaskStatus::Searching;
                    batch.tasks[idx].status_change_time = Instant::now();
                    Some(idx)
                } else {
                    None
                }
            };
            match idx {
                Some(idx) => {
                    let engine = self.clone();
                    tokio::spawn(async move { engine.run_task(batch_id, idx).await });
                }
                None => break,
            }
        }
    }

    async fn task_status(&self, batch_id: Uuid, idx: usize) -> Option<TaskStatus> {
        let batches = self.inner.batches.lock().await;
        batches.get(&batch_id)?.tasks.get(idx).map(|t| t.status)
    }

    async fn task_notify(&self, batch_id: Uuid, idx: usize) -> Option<Arc<Notify>> {
        let batches = self.inner.batches.lock().await;
        batches.get(&batch_id)?.tasks.get(idx).map(|t| t.notify.clone())
    }

    async fn emit(&self, batch_id: Uuid, idx: usize) {
        let batches = self.inner.batches.lock().await;
        if let Some(task) = batches.get(&batch_id).and_then(|b| b.tasks.get(idx)) {
            let _ = self.inner.events.send(EngineEvent {
                batch_id,
                external_track_id: task.descriptor.id.clone(),
                status: task.status,
                progress: None,
                error: task.failure_reason.clone(),
            });
        }
    }

    /// A task's full attempt loop: it owns the slot from the moment the
    /// dispatcher hands it a `Searching` status until it reaches a
    /// terminal status or hands off to post-processing.
    async fn run_task(&self, batch_id: Uuid, idx: usize) {
        loop {
            match self.task_status(batch_id, idx).await {
                None => return,
                Some(TaskStatus::Searching) => self.attempt_search_and_download(batch_id, idx).await,
                Some(TaskStatus::PostProcessing) => return,
                Some(status) if status.is_terminal() => {
                    self.emit(batch_id, idx).await;
                    self.finish_slot(batch_id).await;
                    return;
                }
                _ => {}
            }

            match self.task_status(batch_id, idx).await {
                None | Some(TaskStatus::PostProcessing) => return,
                Some(status) if status.is_terminal() => {
                    self.emit(batch_id, idx).await;
                    self.finish_slot(batch_id).await;
                    return;
                }
                _ => {}
            }

            self.emit(batch_id, idx).await;
            match self.task_notify(batch_id, idx).await {
                Some(notify) => notify.notified().await,
                None => return,
            }
        }
    }

    async fn finish_slot(&self, batch_id: Uuid) {
        {
            let mut batches = self.inner.batches.lock().await;
            if let Some(batch) = batches.get_mut(&batch_id) {
                batch.active_count = batch.active_count.saturating_sub(1);
            }
        }
        self.dispatch(batch_id).await;
    }

    /// Searches C2 for candidates, ranks them with C4, and issues a
    /// download against the best remaining one. Tries successive
    /// candidates inline (without waiting for the monitor) when the
    /// download call itself fails transiently (spec §7 "candidate-level
    /// failure -> try next candidate").
    async fn attempt_search_and_download(&self, batch_id: Uuid, idx: usize) {
        let (descriptor, used_sources, had_any_attempt) = {
            let batches = self.inner.batches.lock().await;
            let Some(task) = batches.get(&batch_id).and_then(|b| b.tasks.get(idx)) else { return };
            (task.descriptor.clone(), task.used_sources.clone(), !task.used_sources.is_empty())
        };

        let query = format!(
            "{} {}",
            descriptor.artists.first().cloned().unwrap_or_default(),
            crate::matching::clean_track_name_for_search(&descriptor.name),
        );

        let search_results = match self.inner.p2p.search(&query).await {
            Ok(results) => results,
            Err(err) => {
                self.mark_failed_and_route(batch_id, idx, format!("search failed: {err}")).await;
                return;
            }
        };

        let mut candidates: Vec<TrackCandidate> = search_results.tracks;
        for album in search_results.albums {
            candidates.extend(album.tracks);
        }

        let target_title = descriptor.name.as_str();
        let target_artist = descriptor.artists.first().map(|s| s.as_str()).unwrap_or_default();

        let mut scored: Vec<(TrackCandidate, f64, f64)> = candidates
            .into_iter()
            .filter(|c| !used_sources.contains(&c.source_key()))
            .map(|c| {
                let parsed = crate::matching::parse_filename(Path::new(&c.filename));
                let title_similarity =
                    crate::matching::similarity(parsed.title.as_deref().unwrap_or(&c.filename), target_title);
                let artist_similarity = parsed
                    .artist
                    .as_deref()
                    .map(|a| crate::matching::similarity(a, target_artist))
                    .unwrap_or(0.5);
                let quality_term = crate::matching::quality_term_from_bitrate(c.bitrate);
                let score = crate::matching::score_candidate(crate::matching::CandidateScoreInput {
                    title_similarity,
                    artist_similarity,
                    quality_term,
                });
                (c, score, quality_term)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
        });

        if scored.is_empty() {
            let reason = if had_any_attempt { "no remaining sources" } else { "no candidates found" };
            self.mark_failed_and_route(batch_id, idx, reason).await;
            return;
        }

        for (candidate, _score, _quality) in scored {
            match self.inner.p2p.download(&candidate.username, &candidate.filename, candidate.size).await {
                Ok(transfer_id) => {
                    let mut batches = self.inner.batches.lock().await;
                    if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                        task.used_sources.insert(candidate.source_key());
                        task.current_candidate = Some(candidate);
                        task.transfer_id = transfer_id;
                        task.status = TaskStatus::Queued;
                        task.status_change_time = Instant::now();
                        task.queued_since = Some(Instant::now());
                    }
                    return;
                }
                Err(err) => {
                    log::warn!("download call failed for candidate of track '{}': {err}", descriptor.name);
                    let mut batches = self.inner.batches.lock().await;
                    if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                        task.used_sources.insert(candidate.source_key());
                    }
                }
            }
        }

        self.mark_failed_and_route(batch_id, idx, "no remaining sources").await;
    }

    async fn mark_failed_and_route(&self, batch_id: Uuid, idx: usize, reason: impl Into<String>) {
        {
            let mut batches = self.inner.batches.lock().await;
            if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                task.mark_failed(reason);
            }
        }
        self.route_failure_to_wishlist(batch_id, idx).await;
    }

    async fn route_failure_to_wishlist(&self, batch_id: Uuid, idx: usize) {
        let entry = {
            let batches = self.inner.batches.lock().await;
            let Some(task) = batches.get(&batch_id).and_then(|b| b.tasks.get(idx)) else { return };
            if task.status != TaskStatus::Failed {
                return;
            }
            let reason = task.failure_reason.clone().unwrap_or_default();
            WishlistEntry::new(task.descriptor.clone(), reason, task.source_type, task.source_info.clone(), chrono::Utc::now())
        };
        if let Err(err) = self.inner.store.wishlist().add_or_merge(&entry).await {
            log::warn!("failed to record wishlist entry after permanent failure: {err}");
        }
    }

    /// The global stall/error monitor (spec §4.5). Mutations happen under
    /// one lock acquisition; any suspending follow-up (wishlist writes,
    /// post-processing) runs after the lock is released.
    async fn monitor_tick(&self) {
        let snapshot = self.inner.cache.snapshot().await;

        let mut woken: Vec<(Uuid, usize)> = Vec::new();
        let mut newly_failed: Vec<(Uuid, usize)> = Vec::new();
        let mut completed: Vec<(Uuid, usize)> = Vec::new();

        {
            let mut batches = self.inner.batches.lock().await;
            for (batch_id, batch) in batches.iter_mut() {
                for (idx, task) in batch.tasks.iter_mut().enumerate() {
                    if !matches!(task.status, TaskStatus::Queued | TaskStatus::Downloading) {
                        continue;
                    }
                    let Some(candidate) = task.current_candidate.clone() else { continue };
                    let live = snapshot.get(&candidate.source_key());

                    match live {
                        None => {
                            if task.status_change_time.elapsed() > MISSING_LIVE_TIMEOUT {
                                match apply_timeout_retry(task) {
                                    TimeoutOutcome::Retried => woken.push((*batch_id, idx)),
                                    TimeoutOutcome::WaitLonger => {}
                                    TimeoutOutcome::Exhausted => {
                                        task.mark_failed("no remaining sources");
                                        newly_failed.push((*batch_id, idx));
                                        woken.push((*batch_id, idx));
                                    }
                                }
                            }
                        }
                        Some(record) if record.is_errored() => {
                            let cooldown_elapsed =
                                task.last_error_retry.is_none_or(|t| t.elapsed() >= ERROR_RETRY_COOLDOWN);
                            if cooldown_elapsed {
                                if task.error_retry_count < MAX_ERROR_RETRIES {
                                    task.error_retry_count += 1;
                                    task.last_error_retry = Some(Instant::now());
                                    task.retry();
                                    woken.push((*batch_id, idx));
                                } else {
                                    task.mark_failed("too many errored sources");
                                    newly_failed.push((*batch_id, idx));
                                    woken.push((*batch_id, idx));
                                }
                            }
                        }
                        Some(record) if record.is_succeeded() => {
                            task.status = TaskStatus::PostProcessing;
                            task.status_change_time = Instant::now();
                            completed.push((*batch_id, idx));
                            woken.push((*batch_id, idx));
                        }
                        Some(record) => {
                            let threshold = task.queued_or_downloading_timeout();
                            if record.is_queued() {
                                if task.queued_since.is_none() {
                                    task.queued_since = Some(Instant::now());
                                }
                                let elapsed = task.queued_since.map(|t| t.elapsed()).unwrap_or_default();
                                if elapsed > threshold {
                                    match apply_timeout_retry(task) {
                                        TimeoutOutcome::Retried => woken.push((*batch_id, idx)),
                                        TimeoutOutcome::WaitLonger => {}
                                        TimeoutOutcome::Exhausted => {
                                            task.mark_failed("no remaining sources");
                                            newly_failed.push((*batch_id, idx));
                                            woken.push((*batch_id, idx));
                                        }
                                    }
                                }
                            } else if record.is_in_progress() {
                                if record.percent_complete < 1.0 {
                                    if task.downloading_since.is_none() {
                                        task.downloading_since = Some(Instant::now());
                                    }
                                    let elapsed = task.downloading_since.map(|t| t.elapsed()).unwrap_or_default();
                                    if elapsed > threshold {
                                        match apply_timeout_retry(task) {
                                            TimeoutOutcome::Retried => woken.push((*batch_id, idx)),
                                            TimeoutOutcome::WaitLonger => {}
                                            TimeoutOutcome::Exhausted => {
                                                task.mark_failed("no remaining sources");
                                                newly_failed.push((*batch_id, idx));
                                                woken.push((*batch_id, idx));
                                            }
                                        }
                                    }
                                } else {
                                    task.status = TaskStatus::Downloading;
                                    task.queued_since = None;
                                    task.downloading_since = None;
                                    task.error_retry_count = 0;
                                    task.timeout_retry_count = 0;
                                }
                            }
                        }
                    }
                }
            }
        }

        for (batch_id, idx) in &newly_failed {
            self.route_failure_to_wishlist(*batch_id, *idx).await;
        }
        for (batch_id, idx) in &completed {
            let engine = self.clone();
            let (batch_id, idx) = (*batch_id, *idx);
            tokio::spawn(async move { engine.complete_task(batch_id, idx).await });
        }
        for (batch_id, idx) in woken {
            self.emit(batch_id, idx).await;
            if let Some(notify) = self.task_notify(batch_id, idx).await {
                notify.notify_one();
            }
        }
    }

    async fn healing_tick(&self) {
        let mut to_redispatch = Vec::new();
        {
            let mut batches = self.inner.batches.lock().await;
            for (batch_id, batch) in batches.iter_mut() {
                let actual = batch.tasks.iter().filter(|t| t.status.counts_as_active()).count();
                if actual != batch.active_count {
                    batch.active_count = actual;
                    to_redispatch.push(*batch_id);
                }
            }
        }
        for batch_id in to_redispatch {
            self.dispatch(batch_id).await;
        }
    }

    /// Completion handoff: locates the downloaded file on disk and calls
    /// C10 (spec §4.5 "Completion detection & post-processing"). Runs
    /// independently of `run_task`, which has already relinquished the
    /// task to `PostProcessing` ownership.
    async fn complete_task(&self, batch_id: Uuid, idx: usize) {
        tokio::time::sleep(FILE_SETTLE_DELAY).await;

        let (candidate, descriptor, track_number) = {
            let batches = self.inner.batches.lock().await;
            let Some(task) = batches.get(&batch_id).and_then(|b| b.tasks.get(idx)) else { return };
            (task.current_candidate.clone(), task.descriptor.clone(), task.track_number)
        };
        let Some(candidate) = candidate else { return };

        let basename = Path::new(&candidate.filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&candidate.filename)
            .to_string();

        let located = locate_downloaded_file(self.inner.download_root.clone(), basename).await;

        match located {
            Some(path) => {
                let year = descriptor.album.release_date.as_deref().and_then(|d| d.get(0..4)).and_then(|y| y.parse().ok());
                let ctx = crate::postprocess::PostProcessContext {
                    artist_name: descriptor.artists.first().cloned().unwrap_or_default(),
                    album_name: descriptor.album.name.clone(),
                    track_title: descriptor.name.clone(),
                    track_number,
                    year,
                    external_track_id: descriptor.id.clone(),
                    external_album_id: Some(descriptor.album.id.clone()),
                    external_artist_id: None,
                };

                match crate::postprocess::process(&self.inner.store, &self.inner.library_root, &path, ctx).await {
                    Ok(destination) => {
                        self.remove_completed_transfer(&candidate).await;
                        let mut batches = self.inner.batches.lock().await;
                        if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                            task.destination_path = Some(destination);
                            task.status = TaskStatus::Done;
                            task.status_change_time = Instant::now();
                        }
                    }
                    Err(err) => {
                        {
                            let mut batches = self.inner.batches.lock().await;
                            if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                                task.mark_failed(format!("post-processing failed: {err}"));
                            }
                        }
                        self.route_failure_to_wishlist(batch_id, idx).await;
                    }
                }
            }
            None => {
                // Fatal: the daemon reported success but the file is missing.
                // Not retried, not wishlisted (spec §7).
                let mut batches = self.inner.batches.lock().await;
                if let Some(task) = batches.get_mut(&batch_id).and_then(|b| b.tasks.get_mut(idx)) {
                    task.mark_failed("download completed but file not found");
                }
            }
        }

        self.emit(batch_id, idx).await;
        self.finish_slot(batch_id).await;
    }

    async fn remove_completed_transfer(&self, candidate: &TrackCandidate) {
        let key = candidate.source_key();
        if let Some(record) = self.inner.cache.get(&key).await {
            if let Err(err) = self.inner.p2p.cancel_download(&record.id, &record.username, true).await {
                log::warn!("failed to signal daemon to remove completed transfer: {err}");
            }
        }
    }
}

fn apply_timeout_retry(task: &mut Task) -> TimeoutOutcome {
    if task.timeout_retry_count >= MAX_TIMEOUT_RETRIES {
        return TimeoutOutcome::Exhausted;
    }
    if let Some(last) = task.last_timeout_retry {
        if last.elapsed() < TIMEOUT_RETRY_MIN_GAP {
            return TimeoutOutcome::WaitLonger;
        }
    }
    task.timeout_retry_count += 1;
    task.last_timeout_retry = Some(Instant::now());
    task.retry();
    TimeoutOutcome::Retried
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;
    use crate::domain::wishlist::{AlbumDescriptor, SourceType, TrackDescriptor};
    use crate::p2p::{AlbumCandidate, P2pClientError, SearchResults, TransferRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn descriptor() -> TrackDescriptor {
        TrackDescriptor {
            id: "sp:track:1".into(),
            name: "Kerala".into(),
            artists: vec!["Bonobo".into()],
            album: AlbumDescriptor {
                id: "alb:1".into(),
                name: "Migration".into(),
                images: vec![],
                release_date: Some("2017-01-13".into()),
                album_type: Some("album".into()),
            },
            duration_ms: 264_000,
            popularity: 62,
        }
    }

    fn request() -> FulfillmentRequest {
        FulfillmentRequest {
            descriptor: descriptor(),
            source_type: SourceType::Manual,
            source_info: serde_json::json!({}),
            is_album_download: false,
            track_number: None,
        }
    }

    /// A scripted daemon: `search` always returns the same candidate list;
    /// `download` always succeeds; transfer state for each source key is
    /// whatever the test has stashed in `states`.
    struct ScriptedP2p {
        candidates: Vec<TrackCandidate>,
        states: Mutex<HashMap<String, (String, f64)>>,
        download_calls: AtomicU32,
    }

    #[async_trait]
    impl P2pClient for ScriptedP2p {
        async fn search(&self, _query: &str) -> Result<SearchResults, P2pClientError> {
            Ok(SearchResults { tracks: self.candidates.clone(), albums: Vec::<AlbumCandidate>::new() })
        }

        async fn download(&self, username: &str, filename: &str, _size: u64) -> Result<Option<String>, P2pClientError> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            let key = crate::p2p::source_key(username, filename);
            self.states.lock().await.entry(key.clone()).or_insert(("Queued".into(), 0.0));
            Ok(Some(key))
        }

        async fn get_all_transfers(&self) -> Result<Vec<TransferRecord>, P2pClientError> {
            let states = self.states.lock().await;
            Ok(states
                .iter()
                .map(|(key, (state, pct))| {
                    let (username, filename) = key.split_once("::").unwrap();
                    TransferRecord {
                        id: key.clone(),
                        username: username.to_string(),
                        filename: filename.to_string(),
                        state: state.clone(),
                        percent_complete: *pct,
                    }
                })
                .collect())
        }

        async fn cancel_download(&self, _id: &str, _username: &str, _remove: bool) -> Result<(), P2pClientError> {
            Ok(())
        }

        async fn clear_all_completed_downloads(&self) -> Result<(), P2pClientError> {
            Ok(())
        }

        async fn check_connection(&self) -> bool {
            true
        }
    }

    fn candidate(username: &str, filename: &str) -> TrackCandidate {
        TrackCandidate { username: username.into(), filename: filename.into(), size: 1024, bitrate: Some(320), quality_score: 1.0 }
    }

    #[tokio::test(start_paused = true)]
    async fn three_errored_sources_route_to_wishlist() {
        let store = Arc::new(prepare_store().await);
        let candidates =
            vec![candidate("e1", "01 - Kerala.flac"), candidate("e2", "01 - Kerala.flac"), candidate("e3", "01 - Kerala.flac")];
        let mut states = HashMap::new();
        for c in &candidates {
            states.insert(c.source_key(), ("Errored".to_string(), 0.0));
        }
        let p2p: Arc<dyn P2pClient> =
            Arc::new(ScriptedP2p { candidates, states: Mutex::new(states), download_calls: AtomicU32::new(0) });
        let cache = Arc::new(TransferCache::with_ttl(p2p.clone(), Duration::from_millis(10)));

        let (engine, _events) =
            Engine::new(store.clone(), p2p, cache, PathBuf::from("/tmp/downloads"), PathBuf::from("/tmp/library"));

        let batch_id = engine.submit_batch(vec![request()], Some(1)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        for _ in 0..4 {
            engine.monitor_tick().await;
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            tokio::time::advance(ERROR_RETRY_COOLDOWN + Duration::from_millis(100)).await;
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
        }

        let status = engine.task_status(batch_id, 0).await;
        assert_eq!(status, Some(TaskStatus::Failed));

        let wishlist_entry = store.wishlist().get("sp:track:1").await.unwrap();
        assert!(wishlist_entry.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_search_and_download_reaches_queued() {
        let store = Arc::new(prepare_store().await);
        let candidates = vec![candidate("alice", "01 - Kerala.flac")];
        let p2p: Arc<dyn P2pClient> = Arc::new(ScriptedP2p {
            candidates,
            states: Mutex::new(HashMap::new()),
            download_calls: AtomicU32::new(0),
        });
        let cache = Arc::new(TransferCache::with_ttl(p2p.clone(), Duration::from_millis(10)));
        let (engine, _events) =
            Engine::new(store, p2p, cache, PathBuf::from("/tmp/downloads"), PathBuf::from("/tmp/library"));

        let batch_id = engine.submit_batch(vec![request()], Some(1)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let status = engine.task_status(batch_id, 0).await;
        assert_eq!(status, Some(TaskStatus::Queued));
    }
}

async fn locate_downloaded_file(root: PathBuf, basename: String) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || {
        let entries: Vec<PathBuf> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();

        if let Some(exact) = entries.iter().find(|p| p.file_name().and_then(|n| n.to_str()) == Some(basename.as_str())) {
            return Some(exact.clone());
        }

        entries
            .into_iter()
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                let score = crate::matching::similarity(&name, &basename);
                (score >= FILENAME_MATCH_THRESHOLD).then_some((p, score))
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(p, _)| p)
    })
    .await
    .ok()
    .flatten()
}
