//! Watchlist Scanner (C8, spec §4.7): a periodic sampled scan of watched
//! artists that grows the wishlist with missing tracks and feeds the
//! discovery pool consumed by the Release Radar / Discovery Weekly curation
//! functions below. Runs standalone (no C5 dependency) — it only writes to
//! the wishlist; the Wishlist Auto-Retry Scheduler (C9) is what actually
//! submits those entries to the fulfillment engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;

use crate::catalog::{CatalogError, CatalogStore};
use crate::domain::album::ReleaseCategory;
use crate::domain::discovery::DiscoveryPoolTrack;
use crate::domain::watchlist::WatchlistEntry;
use crate::domain::wishlist::{AlbumDescriptor, SourceType, TrackDescriptor, WishlistEntry};
use crate::matching::classify::{is_acoustic_version, is_compilation_album, is_live_version, is_remix_version};
use crate::provider::{ProviderAlbum, ProviderClient, ProviderClientError, ProviderTrack};

#[derive(Debug, thiserror::Error)]
pub enum WatchlistScannerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Provider(#[from] ProviderClientError),
}

const TRACK_EXISTS_THRESHOLD: f64 = 0.7;
const SIMILAR_ARTIST_STALE_DAYS: i64 = 30;
const SIMILAR_ARTIST_FETCH_LIMIT: u32 = 20;
const DISCOVERY_POOL_REFRESH_HOURS: i64 = 24;
const DISCOVERY_POOL_EVICTION_DAYS: i64 = 365;
const TOP_SIMILAR_ARTISTS_FOR_POOL: i64 = 50;
const RELEASES_PER_ARTIST: usize = 10;
const RECENT_RELEASES_BIAS: usize = 3;

/// Key-value slot consulted for the runtime-configurable scan lookback
/// (spec §4.7: "a configured key-value in the metadata slot"). `"all"`
/// disables the release-date filter entirely.
const LOOKBACK_METADATA_KEY: &str = "discovery_lookback_period";
const POOL_LAST_POPULATED_KEY: &str = "discovery_pool_last_populated";

#[derive(Debug, Default, Clone)]
pub struct ScanSummary {
    pub artists_scanned: usize,
    pub tracks_added_to_wishlist: usize,
    pub similar_artist_caches_refreshed: usize,
    pub discovery_pool_refreshed: bool,
}

pub struct WatchlistScanner {
    store: Arc<CatalogStore>,
    provider: Arc<dyn ProviderClient>,
    scan_batch_size: usize,
    default_lookback_days: i64,
}

/// Default cadence for the background scan loop. The spec names no fixed
/// interval for C8 (it calls it "periodic ... invoked by the scheduler or
/// on user demand"); 6 hours keeps well clear of the 7-day must-scan and
/// 30-day lookback windows while still noticing new releases promptly.
pub const DEFAULT_SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 60 * 60);

impl WatchlistScanner {
    pub fn new(
        store: Arc<CatalogStore>,
        provider: Arc<dyn ProviderClient>,
        scan_batch_size: usize,
        default_lookback_days: i64,
    ) -> Self {
        Self { store, provider, scan_batch_size, default_lookback_days }
    }

    /// Runs `run_once` on a fixed interval until `shutdown` fires (spec
    /// §4.7, §5: one of the four background services the process wires up).
    pub async fn run_loop(&self, interval: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) => log::info!(
                            "watchlist scan: {} artists scanned, {} tracks added to wishlist",
                            summary.artists_scanned, summary.tracks_added_to_wishlist
                        ),
                        Err(err) => log::warn!("watchlist scan failed: {err}"),
                    }
                }
            }
        }
    }

    /// Runs one full scan pass (spec §4.7 steps 1-3): artist selection,
    /// per-artist release/track scan, similar-artist refresh, then discovery
    /// pool population.
    pub async fn run_once(&self) -> Result<ScanSummary, WatchlistScannerError> {
        let mut summary = ScanSummary::default();
        let now = Utc::now();

        let all_entries = self.store.watchlist().list_all().await?;
        let selected = self.select_artists(all_entries, now);

        for mut entry in selected {
            match self.scan_artist(&entry, now).await {
                Ok(added) => summary.tracks_added_to_wishlist += added,
                Err(err) => log::warn!("watchlist scan failed for '{}': {err}", entry.name()),
            }

            if self.refresh_similar_artists_if_stale(&entry, now).await? {
                summary.similar_artist_caches_refreshed += 1;
            }

            entry.set_last_scan_timestamp(now);
            self.store.watchlist().set_last_scan_timestamp(entry.external_artist_id(), now).await?;
            summary.artists_scanned += 1;
        }

        summary.discovery_pool_refreshed = self.populate_discovery_pool(now).await?;
        Ok(summary)
    }

    /// spec §4.7 step 1: all must-scan entries, plus a random fill from
    /// can-skip up to `scan_batch_size`, shuffled.
    fn select_artists(&self, entries: Vec<WatchlistEntry>, now: DateTime<Utc>) -> Vec<WatchlistEntry> {
        let (mut must_scan, mut can_skip): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| entry.must_scan(now));

        let mut rng = rand::thread_rng();
        if must_scan.len() < self.scan_batch_size {
            let remaining = self.scan_batch_size - must_scan.len();
            can_skip.shuffle(&mut rng);
            must_scan.extend(can_skip.into_iter().take(remaining));
        }

        must_scan.shuffle(&mut rng);
        must_scan
    }

    async fn lookback_cutoff(&self, entry: &WatchlistEntry, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, WatchlistScannerError> {
        let configured = self.store.metadata_kv().get(LOOKBACK_METADATA_KEY).await?;
        let lookback_days = match configured.as_deref() {
            Some("all") => return Ok(None),
            Some(raw) => raw.parse::<i64>().unwrap_or(self.default_lookback_days),
            None => self.default_lookback_days,
        };

        let lookback_floor = now - ChronoDuration::days(lookback_days);
        Ok(Some(match entry.last_scan_timestamp() {
            Some(last) if last > lookback_floor => last,
            _ => lookback_floor,
        }))
    }

    /// spec §4.7 step 2: fetch recent releases, categorize, apply the
    /// entry's filters, and add any missing track to the wishlist. Returns
    /// the number of tracks added.
    async fn scan_artist(&self, entry: &WatchlistEntry, now: DateTime<Utc>) -> Result<usize, WatchlistScannerError> {
        let cutoff = self.lookback_cutoff(entry, now).await?;
        let albums = self.provider.get_artist_albums(entry.external_artist_id(), None, 50).await?;
        let release_types = entry.release_types();
        let content_filter = entry.content_filter();

        let mut added = 0usize;

        for album in albums {
            if let Some(cutoff) = cutoff {
                let Some(release_date) = album.release_date.as_deref().and_then(crate::domain::discovery::parse_release_date) else {
                    continue;
                };
                if release_date <= cutoff {
                    continue;
                }
            }

            if !content_filter.compilation && is_compilation_album(&album.name) {
                continue;
            }

            let tracks = self.provider.get_album_tracks(&album.id).await?;
            let category = ReleaseCategory::from_track_count(tracks.len() as i32);
            let category_allowed = match category {
                ReleaseCategory::Album => release_types.albums,
                ReleaseCategory::Ep => release_types.eps,
                ReleaseCategory::Single => release_types.singles,
            };
            if !category_allowed {
                continue;
            }

            for track in tracks {
                if !content_filter.live && is_live_version(&track.name) {
                    continue;
                }
                if !content_filter.remix && is_remix_version(&track.name) {
                    continue;
                }
                if !content_filter.acoustic && is_acoustic_version(&track.name) {
                    continue;
                }

                let (existing, _score) = self.store.tracks().check_track_exists(&track.name, entry.name(), TRACK_EXISTS_THRESHOLD).await?;
                if existing.is_some() {
                    continue;
                }

                let descriptor = track_descriptor(&track, &album, entry.name());
                let source_info = serde_json::json!({
                    "artist_name": entry.name(),
                    "album_name": album.name,
                    "scan_timestamp": now.to_rfc3339(),
                });
                let wishlist_entry = WishlistEntry::new(
                    descriptor,
                    "missing from local library",
                    SourceType::Watchlist,
                    source_info,
                    now,
                );
                self.store.wishlist().add_or_merge(&wishlist_entry).await?;
                added += 1;
            }
        }

        Ok(added)
    }

    /// spec §4.7 step 2's similar-artist refresh: if the cache for this
    /// artist is older than 30 days (or never populated), refresh it.
    async fn refresh_similar_artists_if_stale(&self, entry: &WatchlistEntry, now: DateTime<Utc>) -> Result<bool, WatchlistScannerError> {
        let last_refreshed = self.store.similar_artists().last_refreshed_for_source(entry.external_artist_id()).await?;
        let is_stale = match last_refreshed {
            None => true,
            Some(last) => now.signed_duration_since(last).num_days() >= SIMILAR_ARTIST_STALE_DAYS,
        };
        if !is_stale {
            return Ok(false);
        }

        let similar = self.provider.get_similar_artists(entry.external_artist_id(), SIMILAR_ARTIST_FETCH_LIMIT).await?;
        for (rank, artist) in similar.into_iter().enumerate() {
            self.store
                .similar_artists()
                .upsert_occurrence(entry.external_artist_id(), &artist.id, &artist.name, rank as i32, now)
                .await?;
        }
        Ok(true)
    }

    /// spec §4.7 discovery-pool population subsection.
    async fn populate_discovery_pool(&self, now: DateTime<Utc>) -> Result<bool, WatchlistScannerError> {
        if let Some(raw) = self.store.metadata_kv().get(POOL_LAST_POPULATED_KEY).await? {
            if let Ok(last) = DateTime::parse_from_rfc3339(&raw) {
                if now.signed_duration_since(last.to_utc()).num_hours() < DISCOVERY_POOL_REFRESH_HOURS {
                    return Ok(false);
                }
            }
        }

        let top_similar = self.store.similar_artists().top_by_occurrence(TOP_SIMILAR_ARTISTS_FOR_POOL).await?;
        let mut genre_cache: HashMap<String, Vec<String>> = HashMap::new();

        for similar in top_similar {
            let releases = match self.provider.get_artist_albums(&similar.similar_artist_id, None, 50).await {
                Ok(releases) => releases,
                Err(err) => {
                    log::warn!("discovery pool: failed to fetch releases for '{}': {err}", similar.name);
                    continue;
                }
            };

            let sampled = sample_releases(releases);

            let genres = match genre_cache.get(&similar.similar_artist_id) {
                Some(genres) => genres.clone(),
                None => {
                    let genres = self
                        .provider
                        .get_artist(&similar.similar_artist_id)
                        .await
                        .map(|artist| artist.genres)
                        .unwrap_or_default();
                    genre_cache.insert(similar.similar_artist_id.clone(), genres.clone());
                    genres
                }
            };

            for album in sampled {
                let tracks = match self.provider.get_album_tracks(&album.id).await {
                    Ok(tracks) => tracks,
                    Err(err) => {
                        log::warn!("discovery pool: failed to fetch tracklist for album '{}': {err}", album.name);
                        continue;
                    }
                };

                let is_new_release = DiscoveryPoolTrack::classify_is_new_release(album.release_date.as_deref(), now);

                for track in tracks {
                    let pool_track = DiscoveryPoolTrack {
                        external_track_id: track.id.clone(),
                        external_artist_id: similar.similar_artist_id.clone(),
                        external_album_id: album.id.clone(),
                        name: track.name.clone(),
                        artist_name: similar.name.clone(),
                        album_name: album.name.clone(),
                        cover_url: album.thumb_url.clone(),
                        duration_ms: track.duration_ms.unwrap_or(0) as i64,
                        popularity: 0,
                        release_date: album.release_date.clone(),
                        is_new_release,
                        artist_genres: genres.clone(),
                        original: serde_json::json!({
                            "album_type": album.album_type,
                            "track": track,
                        }),
                        added_at: now,
                    };
                    self.store.discovery_pool().add_if_absent(&pool_track).await?;
                }
            }
        }

        self.store.discovery_pool().evict_older_than(now - ChronoDuration::days(DISCOVERY_POOL_EVICTION_DAYS)).await?;
        self.store.metadata_kv().set(POOL_LAST_POPULATED_KEY, &now.to_rfc3339()).await?;
        Ok(true)
    }
}

fn track_descriptor(track: &ProviderTrack, album: &ProviderAlbum, artist_name: &str) -> TrackDescriptor {
    TrackDescriptor {
        id: track.id.clone(),
        name: track.name.clone(),
        artists: vec![artist_name.to_string()],
        album: AlbumDescriptor {
            id: album.id.clone(),
            name: album.name.clone(),
            images: album.thumb_url.iter().cloned().collect(),
            release_date: album.release_date.clone(),
            album_type: album.album_type.clone(),
        },
        duration_ms: track.duration_ms.unwrap_or(0) as i64,
        popularity: 0,
    }
}

/// Biases toward the 3 most recent releases, filling the rest with a
/// random sample of the older ones, up to `RELEASES_PER_ARTIST` total
/// (spec §4.7 discovery-pool population).
fn sample_releases(mut releases: Vec<ProviderAlbum>) -> Vec<ProviderAlbum> {
    releases.sort_by(|a, b| {
        let a_date = a.release_date.as_deref().and_then(crate::domain::discovery::parse_release_date);
        let b_date = b.release_date.as_deref().and_then(crate::domain::discovery::parse_release_date);
        b_date.cmp(&a_date)
    });

    if releases.len() <= RELEASES_PER_ARTIST {
        return releases;
    }

    let recent: Vec<_> = releases.drain(..RECENT_RELEASES_BIAS).collect();
    let remaining_slots = RELEASES_PER_ARTIST - recent.len();
    let mut rng = rand::thread_rng();
    let mut older_sample: Vec<_> = releases.choose_multiple(&mut rng, remaining_slots).cloned().collect();

    let mut result = recent;
    result.append(&mut older_sample);
    result
}

/// Release Radar (spec §4.7 curation): the last 30 days' releases across
/// the watchlist, scored by recency/popularity/single-bonus, capped at 6
/// tracks per artist, top 75 by score, shuffled, sliced to 50.
pub fn build_release_radar(pool: &[DiscoveryPoolTrack], watchlist_artist_ids: &HashSet<String>, now: DateTime<Utc>) -> Vec<DiscoveryPoolTrack> {
    const LIMIT_PER_ARTIST: usize = 6;
    const CANDIDATE_POOL: usize = 75;
    const FINAL_SIZE: usize = 50;

    let mut scored: Vec<(f64, DiscoveryPoolTrack)> = pool
        .iter()
        .filter(|track| track.is_new_release && watchlist_artist_ids.contains(&track.external_artist_id))
        .map(|track| (release_radar_score(track, now), track.clone()))
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut per_artist_count: HashMap<String, usize> = HashMap::new();
    let mut capped = Vec::new();
    for (score, track) in scored {
        let count = per_artist_count.entry(track.external_artist_id.clone()).or_insert(0);
        if *count >= LIMIT_PER_ARTIST {
            continue;
        }
        *count += 1;
        capped.push((score, track));
        if capped.len() >= CANDIDATE_POOL {
            break;
        }
    }

    let mut candidates: Vec<DiscoveryPoolTrack> = capped.into_iter().map(|(_, track)| track).collect();
    candidates.shuffle(&mut rand::thread_rng());
    candidates.truncate(FINAL_SIZE);
    candidates
}

fn release_radar_score(track: &DiscoveryPoolTrack, now: DateTime<Utc>) -> f64 {
    let recency = track
        .release_date
        .as_deref()
        .and_then(crate::domain::discovery::parse_release_date)
        .map(|date| {
            let age_days = now.signed_duration_since(date).num_days().max(0) as f64;
            (1.0 - age_days / 30.0).clamp(0.0, 1.0)
        })
        .unwrap_or(0.0);
    let popularity = (track.popularity as f64 / 100.0).clamp(0.0, 1.0);
    let is_single = track.original.get("album_type").and_then(|v| v.as_str()) == Some("single");

    0.5 * recency + 0.3 * popularity + if is_single { 0.2 } else { 0.0 }
}

/// Discovery Weekly (spec §4.7 curation): popular (pop >= 60) / mid (40-60) /
/// deep-cut (< 40) tiers, 20/20/10 randomly picked, shuffled together.
pub fn build_discovery_weekly(pool: &[DiscoveryPoolTrack]) -> Vec<DiscoveryPoolTrack> {
    let (mut popular, rest): (Vec<_>, Vec<_>) = pool.iter().cloned().partition(|t| t.popularity >= 60);
    let (mut mid, mut deep): (Vec<_>, Vec<_>) = rest.into_iter().partition(|t| t.popularity >= 40);

    let mut rng = rand::thread_rng();
    popular.shuffle(&mut rng);
    mid.shuffle(&mut rng);
    deep.shuffle(&mut rng);

    popular.truncate(20);
    mid.truncate(20);
    deep.truncate(10);

    let mut combined = popular;
    combined.append(&mut mid);
    combined.append(&mut deep);
    combined.shuffle(&mut rng);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;
    use crate::domain::watchlist::WatchlistEntry;
    use crate::provider::ProviderArtist;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeProvider {
        albums: StdMutex<HashMap<String, Vec<ProviderAlbum>>>,
        tracks: StdMutex<HashMap<String, Vec<ProviderTrack>>>,
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn search_artists(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderArtist>, ProviderClientError> {
            Ok(vec![])
        }
        async fn search_albums(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
            Ok(vec![])
        }
        async fn search_tracks(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderTrack>, ProviderClientError> {
            Ok(vec![])
        }
        async fn get_artist(&self, id: &str) -> Result<ProviderArtist, ProviderClientError> {
            Ok(ProviderArtist { id: id.to_string(), name: "Artist".into(), genres: vec!["idm".into()], image_url: None })
        }
        async fn get_artist_albums(&self, id: &str, _album_type: Option<&str>, _limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
            Ok(self.albums.lock().unwrap().get(id).cloned().unwrap_or_default())
        }
        async fn get_album(&self, id: &str) -> Result<ProviderAlbum, ProviderClientError> {
            Ok(ProviderAlbum { id: id.to_string(), ..Default::default() })
        }
        async fn get_album_tracks(&self, id: &str) -> Result<Vec<ProviderTrack>, ProviderClientError> {
            Ok(self.tracks.lock().unwrap().get(id).cloned().unwrap_or_default())
        }
        fn is_authenticated(&self) -> bool {
            true
        }
    }

    fn sample_track(id: &str, name: &str) -> ProviderTrack {
        ProviderTrack { id: id.into(), name: name.into(), track_number: Some(1), duration_ms: Some(200_000), explicit: Some(false) }
    }

    #[tokio::test]
    async fn scan_adds_missing_track_to_wishlist() {
        let store = Arc::new(prepare_store().await);
        let provider = Arc::new(FakeProvider::default());

        provider.albums.lock().unwrap().insert(
            "sp:artist:1".into(),
            vec![ProviderAlbum {
                id: "sp:album:1".into(),
                name: "New Album".into(),
                release_date: Some(Utc::now().format("%Y-%m-%d").to_string()),
                album_type: Some("album".into()),
                total_tracks: Some(1),
                ..Default::default()
            }],
        );
        provider.tracks.lock().unwrap().insert("sp:album:1".into(), vec![sample_track("sp:track:1", "Brand New Song")]);

        store.watchlist().add(&WatchlistEntry::new("sp:artist:1", "Four Tet")).await.unwrap();

        let scanner = WatchlistScanner::new(store.clone(), provider, 50, 30);
        let summary = scanner.run_once().await.unwrap();

        assert_eq!(summary.artists_scanned, 1);
        assert_eq!(summary.tracks_added_to_wishlist, 1);
        assert_eq!(store.wishlist().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_skips_tracks_already_owned() {
        let store = Arc::new(prepare_store().await);
        let provider = Arc::new(FakeProvider::default());

        provider.albums.lock().unwrap().insert(
            "sp:artist:1".into(),
            vec![ProviderAlbum {
                id: "sp:album:1".into(),
                name: "New Album".into(),
                release_date: Some(Utc::now().format("%Y-%m-%d").to_string()),
                album_type: Some("album".into()),
                ..Default::default()
            }],
        );
        provider.tracks.lock().unwrap().insert("sp:album:1".into(), vec![sample_track("sp:track:1", "Owned Song")]);
        store.watchlist().add(&WatchlistEntry::new("sp:artist:1", "Four Tet")).await.unwrap();

        let artist = crate::domain::artist::Artist::new(0, "Four Tet").unwrap();
        let artist_id = store.artists().upsert(&artist).await.unwrap();
        let album = crate::domain::album::Album::new(0, artist_id, "New Album").unwrap();
        let album_id = store.albums().upsert(&album).await.unwrap();
        let track = crate::domain::track::Track::new(0, album_id, artist_id, "Owned Song").unwrap();
        store.tracks().upsert(&track).await.unwrap();

        let scanner = WatchlistScanner::new(store.clone(), provider, 50, 30);
        let summary = scanner.run_once().await.unwrap();

        assert_eq!(summary.tracks_added_to_wishlist, 0);
        assert_eq!(store.wishlist().count().await.unwrap(), 0);
    }

    #[test]
    fn release_radar_caps_six_per_artist_and_fifty_total() {
        let now = Utc::now();
        let mut pool = Vec::new();
        for artist_idx in 0..5 {
            for track_idx in 0..10 {
                pool.push(DiscoveryPoolTrack {
                    external_track_id: format!("t-{artist_idx}-{track_idx}"),
                    external_artist_id: format!("artist-{artist_idx}"),
                    external_album_id: "album".into(),
                    name: "Track".into(),
                    artist_name: "Artist".into(),
                    album_name: "Album".into(),
                    cover_url: None,
                    duration_ms: 200_000,
                    popularity: 50,
                    release_date: Some(now.format("%Y-%m-%d").to_string()),
                    is_new_release: true,
                    artist_genres: vec![],
                    original: serde_json::json!({"album_type": "single"}),
                    added_at: now,
                });
            }
        }
        let watchlist_ids: HashSet<String> = (0..5).map(|i| format!("artist-{i}")).collect();

        let radar = build_release_radar(&pool, &watchlist_ids, now);
        assert!(radar.len() <= 50);

        let mut per_artist: HashMap<String, usize> = HashMap::new();
        for track in &radar {
            *per_artist.entry(track.external_artist_id.clone()).or_insert(0) += 1;
        }
        assert!(per_artist.values().all(|&count| count <= 6));
    }

    #[test]
    fn discovery_weekly_respects_tier_caps() {
        let now = Utc::now();
        let mut pool = Vec::new();
        for i in 0..100 {
            pool.push(DiscoveryPoolTrack {
                external_track_id: format!("t-{i}"),
                external_artist_id: "artist".into(),
                external_album_id: "album".into(),
                name: "Track".into(),
                artist_name: "Artist".into(),
                album_name: "Album".into(),
                cover_url: None,
                duration_ms: 200_000,
                popularity: (i % 100) as i32,
                release_date: None,
                is_new_release: false,
                artist_genres: vec![],
                original: serde_json::json!({}),
                added_at: now,
            });
        }

        let weekly = build_discovery_weekly(&pool);
        assert!(weekly.len() <= 50);
    }
}
