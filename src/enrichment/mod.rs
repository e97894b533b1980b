//! Metadata Enrichment Worker (C7, spec §4.6): a single long-running loop
//! that walks a fixed priority list of catalog gaps — one item per tick —
//! and attaches external ids (plus whatever thumbnail/genre/year/explicit
//! data comes along for free) via the Metadata Provider Client (C3).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::catalog::{CatalogError, CatalogStore};
use crate::domain::album::Album;
use crate::domain::artist::Artist;
use crate::domain::track::Track;
use crate::domain::MatchStatus;
use crate::matching::{self, OfficialTrack, ParsedFilename};
use crate::provider::{ProviderClient, ProviderClientError};

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

const NAME_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// What the worker did on a given tick, surfaced for the CLI's `enrich`
/// command and for tests; the background loop only logs it.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    ArtistMatched { name: String },
    ArtistNotFound { name: String },
    AlbumBatch { artist_name: String, matched: usize, not_found: usize },
    TrackBatch { album_title: String, matched: usize, not_found: usize },
    AlbumFallback { title: String, matched: bool },
    TrackFallback { title: String, matched: bool },
    StaleRetry,
    /// The provider rejected our credentials (spec §7 Auth row): the item
    /// was left untouched, not marked `error`, so it's picked up again on
    /// the next tick once credentials are fixed.
    AuthRetry,
}

/// Spec §7 Auth row: an item must not be consumed on an auth rejection, and
/// the tick backs off ~30s before giving the caller a chance to retry —
/// keeps a misconfigured credential from spinning a tight failure loop.
const AUTH_RETRY_SLEEP: Duration = Duration::from_secs(30);

pub struct EnrichmentWorker {
    store: Arc<CatalogStore>,
    provider: Arc<dyn ProviderClient>,
}

impl EnrichmentWorker {
    pub fn new(store: Arc<CatalogStore>, provider: Arc<dyn ProviderClient>) -> Self {
        Self { store, provider }
    }

    /// Runs forever, pausing `tick_interval` between items and stopping as
    /// soon as `shutdown` fires (spec §4.6: "must remain responsive to
    /// shutdown signals between items").
    pub async fn run_loop(&self, tick_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(tick_interval) => {
                    match self.tick().await {
                        Ok(outcome) => log::debug!("enrichment tick: {outcome:?}"),
                        Err(err) => log::warn!("enrichment tick failed: {err}"),
                    }
                }
            }
        }
    }

    /// Processes exactly one item from the priority list (spec §4.6). A
    /// `ProviderClientError::Auth` from any provider call below is handled
    /// separately from an ordinary network failure (spec §7): the item is
    /// left untouched rather than marked `error`.
    pub async fn tick(&self) -> Result<TickOutcome, EnrichmentError> {
        if !self.provider.is_authenticated() {
            return Ok(TickOutcome::Idle);
        }

        if let Some(artist) = self.store.artists().find_one_unattempted().await? {
            return self.process_artist(artist).await;
        }

        if let Some(artist) = self.store.artists().find_album_batch_seed().await? {
            return self.process_album_batch(artist).await;
        }

        if let Some(album) = self.store.albums().find_track_batch_seed().await? {
            return self.process_track_batch(album).await;
        }

        if let Some(album) = self.store.albums().find_fallback_unattempted().await? {
            return self.process_fallback_album(album).await;
        }

        if let Some(track) = self.store.tracks().find_fallback_unattempted().await? {
            return self.process_fallback_track(track).await;
        }

        self.process_stale_retry().await
    }

    async fn process_artist(&self, mut artist: Artist) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();
        match self.provider.search_artists(artist.name(), 5).await {
            Ok(results) => {
                let best = results
                    .into_iter()
                    .filter(|r| crate::provider::is_valid_external_id(&r.id))
                    .map(|r| {
                        let score = matching::similarity(&r.name, artist.name());
                        (r, score)
                    })
                    .filter(|(_, score)| *score >= NAME_SIMILARITY_THRESHOLD)
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

                match best {
                    Some((provider_artist, _)) => {
                        artist.set_image_url(provider_artist.image_url);
                        if !provider_artist.genres.is_empty() {
                            artist.set_genres(Some(provider_artist.genres));
                        }
                        artist.set_match_result(MatchStatus::Matched, Some(provider_artist.id), now);
                        self.store.artists().upsert(&artist).await?;
                        Ok(TickOutcome::ArtistMatched { name: artist.name().to_string() })
                    }
                    None => {
                        artist.set_match_result(MatchStatus::NotFound, None, now);
                        self.store.artists().upsert(&artist).await?;
                        Ok(TickOutcome::ArtistNotFound { name: artist.name().to_string() })
                    }
                }
            }
            Err(ProviderClientError::Auth) => {
                log::warn!("provider rejected credentials searching for artist '{}'", artist.name());
                tokio::time::sleep(AUTH_RETRY_SLEEP).await;
                Ok(TickOutcome::AuthRetry)
            }
            Err(err) => {
                log::warn!("artist search failed for '{}': {err}", artist.name());
                artist.set_match_result(MatchStatus::Error, None, now);
                self.store.artists().upsert(&artist).await?;
                Ok(TickOutcome::ArtistNotFound { name: artist.name().to_string() })
            }
        }
    }

    /// Rule 2 (spec §4.6): one `get_artist_albums` call covers every
    /// unattempted child album of a single already-matched artist.
    async fn process_album_batch(&self, artist: Artist) -> Result<TickOutcome, EnrichmentError> {
        let Some(external_id) = artist.external_id() else { return Ok(TickOutcome::Idle) };
        let now = Utc::now();

        let unattempted: Vec<Album> = self
            .store
            .albums()
            .list_by_artist(artist.id())
            .await?
            .into_iter()
            .filter(|a| a.match_status() == MatchStatus::Unattempted)
            .collect();

        let provider_albums = match self.provider.get_artist_albums(external_id, None, 50).await {
            Ok(albums) => albums,
            Err(ProviderClientError::Auth) => {
                log::warn!("provider rejected credentials fetching albums for artist '{}'", artist.name());
                tokio::time::sleep(AUTH_RETRY_SLEEP).await;
                return Ok(TickOutcome::AuthRetry);
            }
            Err(err) => {
                log::warn!("album batch fetch failed for artist '{}': {err}", artist.name());
                return self.bulk_mark_error_albums(unattempted).await;
            }
        };

        let mut matched = 0usize;
        let mut not_found = 0usize;
        for mut album in unattempted {
            let best = provider_albums
                .iter()
                .map(|p| (p, matching::similarity(&p.name, album.title())))
                .filter(|(_, score)| *score >= NAME_SIMILARITY_THRESHOLD)
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((provider_album, _)) => {
                    if album.image_url().is_none() {
                        album.set_image_url(provider_album.thumb_url.clone());
                    }
                    if album.release_year().is_none() {
                        album.set_release_year(
                            provider_album.release_date.as_deref().and_then(|d| d.get(0..4)).and_then(|y| y.parse().ok()),
                        );
                    }
                    album.set_match_result(MatchStatus::Matched, Some(provider_album.id.clone()), now);
                    matched += 1;
                }
                None => {
                    album.set_match_result(MatchStatus::NotFound, None, now);
                    not_found += 1;
                }
            }
            self.store.albums().upsert(&album).await?;
        }

        Ok(TickOutcome::AlbumBatch { artist_name: artist.name().to_string(), matched, not_found })
    }

    /// Rule 3 (spec §4.6): one `get_album_tracks` call covers every
    /// unattempted child track of a single already-matched album.
    async fn process_track_batch(&self, album: Album) -> Result<TickOutcome, EnrichmentError> {
        let Some(external_id) = album.external_id() else { return Ok(TickOutcome::Idle) };
        let now = Utc::now();

        let unattempted: Vec<Track> = self
            .store
            .tracks()
            .list_by_album(album.id())
            .await?
            .into_iter()
            .filter(|t| t.match_status() == MatchStatus::Unattempted)
            .collect();

        let provider_tracks = match self.provider.get_album_tracks(external_id).await {
            Ok(tracks) => tracks,
            Err(ProviderClientError::Auth) => {
                log::warn!("provider rejected credentials fetching tracks for album '{}'", album.title());
                tokio::time::sleep(AUTH_RETRY_SLEEP).await;
                return Ok(TickOutcome::AuthRetry);
            }
            Err(err) => {
                log::warn!("track batch fetch failed for album '{}': {err}", album.title());
                return self.bulk_mark_error_tracks(unattempted).await;
            }
        };

        let official: Vec<OfficialTrack> =
            provider_tracks.iter().map(|t| OfficialTrack { track_number: t.track_number, title: t.name.clone() }).collect();

        let mut matched = 0usize;
        let mut not_found = 0usize;
        for mut track in unattempted {
            let parsed =
                ParsedFilename { track_number: track.track_number(), title: Some(track.title().to_string()), ..Default::default() };
            match matching::match_track_to_spotify_list(&parsed, &official) {
                Some(official_track) => {
                    let provider_track = provider_tracks.iter().find(|t| t.name == official_track.title);
                    if let Some(provider_track) = provider_track {
                        if track.explicit().is_none() {
                            track.set_explicit(provider_track.explicit);
                        }
                        track.set_match_result(MatchStatus::Matched, Some(provider_track.id.clone()), now);
                    } else {
                        track.set_match_result(MatchStatus::NotFound, None, now);
                    }
                    matched += 1;
                }
                None => {
                    track.set_match_result(MatchStatus::NotFound, None, now);
                    not_found += 1;
                }
            }
            self.store.tracks().upsert(&track).await?;
        }

        Ok(TickOutcome::TrackBatch { album_title: album.title().to_string(), matched, not_found })
    }

    async fn process_fallback_album(&self, mut album: Album) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();
        let artist_name = self.store.artists().get(album.artist_id()).await?.map(|a| a.name().to_string()).unwrap_or_default();
        let query = format!("{artist_name} {}", album.title());

        match self.provider.search_albums(&query, 5).await {
            Ok(results) => {
                let best = results
                    .into_iter()
                    .filter(|r| crate::provider::is_valid_external_id(&r.id))
                    .map(|r| {
                        let score = matching::similarity(&r.name, album.title());
                        (r, score)
                    })
                    .filter(|(_, score)| *score >= NAME_SIMILARITY_THRESHOLD)
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

                let matched = best.is_some();
                match best {
                    Some((provider_album, _)) => {
                        album.set_match_result(MatchStatus::Matched, Some(provider_album.id), now);
                    }
                    None => album.set_match_result(MatchStatus::NotFound, None, now),
                }
                self.store.albums().upsert(&album).await?;
                Ok(TickOutcome::AlbumFallback { title: album.title().to_string(), matched })
            }
            Err(ProviderClientError::Auth) => {
                log::warn!("provider rejected credentials in fallback search for album '{}'", album.title());
                tokio::time::sleep(AUTH_RETRY_SLEEP).await;
                Ok(TickOutcome::AuthRetry)
            }
            Err(err) => {
                log::warn!("fallback album search failed for '{}': {err}", album.title());
                album.set_match_result(MatchStatus::Error, None, now);
                self.store.albums().upsert(&album).await?;
                Ok(TickOutcome::AlbumFallback { title: album.title().to_string(), matched: false })
            }
        }
    }

    async fn process_fallback_track(&self, mut track: Track) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();
        let artist_name = self.store.artists().get(track.artist_id()).await?.map(|a| a.name().to_string()).unwrap_or_default();
        let query = format!("{artist_name} {}", track.title());

        match self.provider.search_tracks(&query, 5).await {
            Ok(results) => {
                let best = results
                    .into_iter()
                    .filter(|r| crate::provider::is_valid_external_id(&r.id))
                    .map(|r| {
                        let score = matching::similarity(&r.name, track.title());
                        (r, score)
                    })
                    .filter(|(_, score)| *score >= NAME_SIMILARITY_THRESHOLD)
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

                let matched = best.is_some();
                match best {
                    Some((provider_track, _)) => {
                        if track.explicit().is_none() {
                            track.set_explicit(provider_track.explicit);
                        }
                        track.set_match_result(MatchStatus::Matched, Some(provider_track.id), now);
                    }
                    None => track.set_match_result(MatchStatus::NotFound, None, now),
                }
                self.store.tracks().upsert(&track).await?;
                Ok(TickOutcome::TrackFallback { title: track.title().to_string(), matched })
            }
            Err(ProviderClientError::Auth) => {
                log::warn!("provider rejected credentials in fallback search for track '{}'", track.title());
                tokio::time::sleep(AUTH_RETRY_SLEEP).await;
                Ok(TickOutcome::AuthRetry)
            }
            Err(err) => {
                log::warn!("fallback track search failed for '{}': {err}", track.title());
                track.set_match_result(MatchStatus::Error, None, now);
                self.store.tracks().upsert(&track).await?;
                Ok(TickOutcome::TrackFallback { title: track.title().to_string(), matched: false })
            }
        }
    }

    /// Rule 6 (spec §4.6): among artists/albums/tracks overdue for a retry
    /// (past the 30-day not_found or 7-day error cooldown), re-attempt
    /// whichever is globally oldest by `last_attempted`, via the same
    /// single-item search path its fallback rule would have used — by this
    /// point it's no longer part of a fresh unattempted batch.
    async fn process_stale_retry(&self) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();

        let stale_artist = self.store.artists().find_needing_enrichment(now, 1).await?.into_iter().next();
        let stale_album = self.store.albums().find_needing_enrichment(now, 1).await?.into_iter().next();
        let stale_track = self.store.tracks().find_needing_enrichment(now, 1).await?.into_iter().next();

        let artist_age = stale_artist.as_ref().and_then(Artist::last_attempted);
        let album_age = stale_album.as_ref().and_then(Album::last_attempted);
        let track_age = stale_track.as_ref().and_then(Track::last_attempted);

        let oldest = [artist_age, album_age, track_age].into_iter().flatten().min();

        let Some(oldest) = oldest else { return Ok(TickOutcome::Idle) };

        if Some(oldest) == artist_age {
            self.process_artist(stale_artist.unwrap()).await?;
        } else if Some(oldest) == album_age {
            self.process_fallback_album(stale_album.unwrap()).await?;
        } else {
            self.process_fallback_track(stale_track.unwrap()).await?;
        }

        Ok(TickOutcome::StaleRetry)
    }

    async fn bulk_mark_error_albums(&self, albums: Vec<Album>) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();
        let count = albums.len();
        for mut album in albums {
            album.set_match_result(MatchStatus::Error, None, now);
            self.store.albums().upsert(&album).await?;
        }
        Ok(TickOutcome::AlbumBatch { artist_name: String::new(), matched: 0, not_found: count })
    }

    async fn bulk_mark_error_tracks(&self, tracks: Vec<Track>) -> Result<TickOutcome, EnrichmentError> {
        let now = Utc::now();
        let count = tracks.len();
        for mut track in tracks {
            track.set_match_result(MatchStatus::Error, None, now);
            self.store.tracks().upsert(&track).await?;
        }
        Ok(TickOutcome::TrackBatch { album_title: String::new(), matched: 0, not_found: count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;
    use crate::provider::{ProviderAlbum, ProviderArtist, ProviderTrack};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        artists: Vec<ProviderArtist>,
        albums: Vec<ProviderAlbum>,
        tracks: Vec<ProviderTrack>,
        fail: Mutex<bool>,
        auth_fail: Mutex<bool>,
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn search_artists(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderArtist>, ProviderClientError> {
            if *self.auth_fail.lock().await {
                return Err(ProviderClientError::Auth);
            }
            if *self.fail.lock().await {
                return Err(ProviderClientError::Request("boom".into()));
            }
            Ok(self.artists.clone())
        }
        async fn search_albums(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
            Ok(self.albums.clone())
        }
        async fn search_tracks(&self, _query: &str, _limit: u32) -> Result<Vec<ProviderTrack>, ProviderClientError> {
            Ok(self.tracks.clone())
        }
        async fn get_artist(&self, _id: &str) -> Result<ProviderArtist, ProviderClientError> {
            self.artists.first().cloned().ok_or(ProviderClientError::Request("none".into()))
        }
        async fn get_artist_albums(&self, _id: &str, _album_type: Option<&str>, _limit: u32) -> Result<Vec<ProviderAlbum>, ProviderClientError> {
            if *self.fail.lock().await {
                return Err(ProviderClientError::Request("boom".into()));
            }
            Ok(self.albums.clone())
        }
        async fn get_album(&self, _id: &str) -> Result<ProviderAlbum, ProviderClientError> {
            self.albums.first().cloned().ok_or(ProviderClientError::Request("none".into()))
        }
        async fn get_album_tracks(&self, _id: &str) -> Result<Vec<ProviderTrack>, ProviderClientError> {
            if *self.fail.lock().await {
                return Err(ProviderClientError::Request("boom".into()));
            }
            Ok(self.tracks.clone())
        }
        fn is_authenticated(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn matches_unattempted_artist_above_similarity_threshold() {
        let store = Arc::new(prepare_store().await);
        store.artists().upsert(&Artist::new(0, "Bonobo").unwrap()).await.unwrap();

        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProvider {
            artists: vec![ProviderArtist { id: "sp:artist:1".into(), name: "Bonobo".into(), genres: vec!["idm".into()], image_url: None }],
            ..Default::default()
        });

        let worker = EnrichmentWorker::new(store.clone(), provider);
        let outcome = worker.tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::ArtistMatched { name: "Bonobo".into() });
        let artist = store.artists().get_by_external_id("sp:artist:1").await.unwrap().unwrap();
        assert_eq!(artist.match_status(), MatchStatus::Matched);
    }

    #[tokio::test]
    async fn unmatchable_artist_is_marked_not_found() {
        let store = Arc::new(prepare_store().await);
        store.artists().upsert(&Artist::new(0, "Totally Obscure Act").unwrap()).await.unwrap();

        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProvider::default());
        let worker = EnrichmentWorker::new(store.clone(), provider);
        worker.tick().await.unwrap();

        let artists = store.artists().find_needing_enrichment(Utc::now(), 10).await.unwrap();
        assert!(artists.is_empty(), "not_found artist should not be immediately re-eligible");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_leaves_artist_unattempted_instead_of_erroring() {
        let store = Arc::new(prepare_store().await);
        store.artists().upsert(&Artist::new(0, "Bonobo").unwrap()).await.unwrap();

        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProvider { auth_fail: Mutex::new(true), ..Default::default() });
        let worker = EnrichmentWorker::new(store.clone(), provider);
        let outcome = worker.tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::AuthRetry);
        let artist = store.artists().find_one_unattempted().await.unwrap().unwrap();
        assert_eq!(artist.name(), "Bonobo");
        assert_eq!(artist.match_status(), MatchStatus::Unattempted);
    }

    #[tokio::test]
    async fn album_batch_network_failure_marks_all_unattempted_children_error() {
        let store = Arc::new(prepare_store().await);
        let mut artist = Artist::new(0, "Bonobo").unwrap();
        artist.set_match_result(MatchStatus::Matched, Some("sp:artist:1".into()), Utc::now());
        let artist_id = store.artists().upsert(&artist).await.unwrap();
        store.albums().upsert(&Album::new(0, artist_id, "Migration").unwrap()).await.unwrap();
        store.albums().upsert(&Album::new(0, artist_id, "Black Sands").unwrap()).await.unwrap();

        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProvider { fail: Mutex::new(true), ..Default::default() });
        let worker = EnrichmentWorker::new(store.clone(), provider);
        let outcome = worker.tick().await.unwrap();

        assert!(matches!(outcome, TickOutcome::AlbumBatch { not_found: 2, .. }));
        let albums = store.albums().list_by_artist(artist_id).await.unwrap();
        assert!(albums.iter().all(|a| a.match_status() == MatchStatus::Error));
    }
}
