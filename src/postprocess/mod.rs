//! Post-Processor (C10, spec §4.9). Given a completed download plus the
//! matched context the fulfillment engine already resolved (artist/album/
//! track names, track number, external ids), this module renames the file
//! into the library layout, writes tags, folds in the track-number/title
//! repair pass recovered from `core/repair_worker.py` (SPEC_FULL §B), and
//! publishes the Artist/Album/Track rows to the catalog.

use std::path::{Path, PathBuf};

use chrono::Utc;

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};

use crate::catalog::{CatalogError, CatalogStore};
use crate::domain::album::Album;
use crate::domain::artist::Artist;
use crate::domain::track::Track;
use crate::domain::{MatchStatus, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("invalid name: {0}")]
    Validation(#[from] ValidationError),

    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("downloaded file vanished before it could be moved: {0}")]
    SourceMissing(PathBuf),
}

/// The matched context a completed download is finalized against (spec
/// §4.9). Everything here was already resolved upstream by the Match Engine
/// and the metadata provider; this module only trusts and applies it.
#[derive(Debug, Clone)]
pub struct PostProcessContext {
    pub artist_name: String,
    pub album_name: String,
    pub track_title: String,
    pub track_number: Option<i32>,
    pub year: Option<i32>,
    pub external_track_id: String,
    pub external_album_id: Option<String>,
    pub external_artist_id: Option<String>,
}

const MAX_COMPONENT_LEN: usize = 120;
const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

/// Entry point: moves `source_path` into `<library_root>/<artist>/<album>/
/// <NN> - <title>.<ext>`, tags it, repairs track-number/title drift against
/// whatever sibling tracks the catalog already knows about for this album,
/// and upserts the Artist/Album/Track rows (spec §4.9 steps 1-5).
pub async fn process(
    store: &CatalogStore,
    library_root: &Path,
    source_path: &Path,
    ctx: PostProcessContext,
) -> Result<PathBuf, PostProcessError> {
    let artist_id = resolve_artist_id(store, &ctx).await?;
    let album_id = resolve_album_id(store, &ctx, artist_id).await?;

    let (title, track_number) = repair_track_metadata(store, album_id, &ctx).await?;

    let extension = source_path.extension().and_then(|e| e.to_str()).unwrap_or("mp3").to_lowercase();
    let destination = library_root
        .join(sanitize_component(&ctx.artist_name))
        .join(sanitize_component(&ctx.album_name))
        .join(sanitize_component(&track_filename(track_number, &title, &extension)));

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::try_exists(&destination).await? {
        // Never overwrite silently (spec §4.9 step 2): the existing file
        // already owns this slot in the library, so the new copy is waste.
        tokio::fs::remove_file(source_path).await?;
        return Ok(destination);
    }

    let source_owned = source_path.to_path_buf();
    let dest_owned = destination.clone();
    let tag_ctx = TagWrite {
        title: title.clone(),
        artist: ctx.artist_name.clone(),
        album: ctx.album_name.clone(),
        track_number,
        year: ctx.year,
    };
    let bitrate = tokio::task::spawn_blocking(move || move_and_tag(&source_owned, &dest_owned, &tag_ctx)).await??;

    let mut track = Track::new(0, album_id, artist_id, title.clone())?;
    track.set_track_number(track_number);
    track.set_file_path(Some(destination.clone()));
    track.set_bitrate(bitrate);
    track.set_match_result(MatchStatus::Matched, Some(ctx.external_track_id.clone()), Utc::now());
    store.tracks().upsert(&track).await?;

    cleanup_if_empty(source_path.parent()).await;

    Ok(destination)
}

/// Finds the artist by external id (update-in-place via `upsert`'s own
/// external-id lookup) or, absent one, by fuzzy name against the existing
/// catalog so repeated downloads of the same artist don't fork into
/// duplicate rows (spec §4.1 "Artist ... created by ... the Post-Processor").
async fn resolve_artist_id(store: &CatalogStore, ctx: &PostProcessContext) -> Result<i64, PostProcessError> {
    if let Some(external_id) = &ctx.external_artist_id {
        let mut artist = Artist::new(0, ctx.artist_name.clone())?;
        artist.set_match_result(MatchStatus::Matched, Some(external_id.clone()), Utc::now());
        return Ok(store.artists().upsert(&artist).await?);
    }

    let candidates = store.artists().find_by_fuzzy_name(&ctx.artist_name).await?;
    if let Some(existing) = best_fuzzy_match(candidates, |a| a.name(), &ctx.artist_name) {
        return Ok(existing.id());
    }

    let artist = Artist::new(0, ctx.artist_name.clone())?;
    Ok(store.artists().upsert(&artist).await?)
}

async fn resolve_album_id(store: &CatalogStore, ctx: &PostProcessContext, artist_id: i64) -> Result<i64, PostProcessError> {
    if let Some(external_id) = &ctx.external_album_id {
        let mut album = Album::new(0, artist_id, ctx.album_name.clone())?;
        album.set_release_year(ctx.year);
        album.set_match_result(MatchStatus::Matched, Some(external_id.clone()), Utc::now());
        return Ok(store.albums().upsert(&album).await?);
    }

    let candidates = store.albums().find_by_fuzzy_title(artist_id, &ctx.album_name).await?;
    if let Some(existing) = best_fuzzy_match(candidates, |a| a.title(), &ctx.album_name) {
        return Ok(existing.id());
    }

    let mut album = Album::new(0, artist_id, ctx.album_name.clone())?;
    album.set_release_year(ctx.year);
    Ok(store.albums().upsert(&album).await?)
}

fn best_fuzzy_match<T>(candidates: Vec<T>, key: impl Fn(&T) -> &str, target: &str) -> Option<T> {
    candidates
        .into_iter()
        .map(|c| {
            let score = crate::matching::similarity(key(&c), target);
            (c, score)
        })
        .filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

/// Repair pass recovered from `core/repair_worker.py` (SPEC_FULL §B), folded
/// into the Post-Processor as the spec's Open Question resolution directs.
/// The original cross-references the album's official API tracklist; this
/// port cross-references whatever sibling tracks this album already has in
/// the catalog (populated by an earlier post-process or by enrichment),
/// since re-fetching the official tracklist is C3's out-of-scope surface.
/// Returns the corrected `(title, track_number)` to publish.
async fn repair_track_metadata(
    store: &CatalogStore,
    album_id: i64,
    ctx: &PostProcessContext,
) -> Result<(String, Option<i32>), PostProcessError> {
    const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

    let siblings = store.tracks().list_by_album(album_id).await?;

    let best = siblings
        .into_iter()
        .filter(|t| t.track_number().is_some())
        .map(|t| {
            let score = crate::matching::similarity(t.title(), &ctx.track_title);
            (t, score)
        })
        .filter(|(_, score)| *score >= TITLE_SIMILARITY_THRESHOLD)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    match best {
        Some((sibling, _)) if sibling.track_number() != ctx.track_number => {
            log::info!(
                "repaired track metadata for '{}': #{:?} -> #{:?}",
                ctx.track_title,
                ctx.track_number,
                sibling.track_number()
            );
            Ok((sibling.title().to_string(), sibling.track_number()))
        }
        _ => Ok((ctx.track_title.clone(), ctx.track_number)),
    }
}

struct TagWrite {
    title: String,
    artist: String,
    album: String,
    track_number: Option<i32>,
    year: Option<i32>,
}

/// Runs on a blocking thread: moves the file (atomically when possible,
/// falling back to copy+fsync+unlink across filesystems) and writes tags,
/// returning the audio bitrate lofty read back off the written file.
fn move_and_tag(source: &Path, destination: &Path, tags: &TagWrite) -> Result<Option<i32>, PostProcessError> {
    if !source.is_file() {
        return Err(PostProcessError::SourceMissing(source.to_path_buf()));
    }

    match std::fs::rename(source, destination) {
        Ok(()) => {}
        Err(err) if err.raw_os_error() == Some(libc_exdev()) => {
            std::fs::copy(source, destination)?;
            let file = std::fs::File::open(destination)?;
            file.sync_all()?;
            std::fs::remove_file(source)?;
        }
        Err(err) => return Err(err.into()),
    }

    let bitrate = write_tags(destination, tags).unwrap_or_else(|err| {
        log::warn!("failed to write tags for {}: {err} (keeping file untagged)", destination.display());
        None
    });

    Ok(bitrate)
}

fn write_tags(path: &Path, tags: &TagWrite) -> Result<Option<i32>, lofty::error::LoftyError> {
    let mut tagged_file = Probe::open(path)?.read()?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file.primary_tag_mut().expect("tag was just inserted if absent");

    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    tag.set_album(tags.album.clone());
    if let Some(track_number) = tags.track_number {
        tag.set_track(track_number as u32);
    }
    if let Some(year) = tags.year {
        tag.set_year(year as u32);
    }

    tagged_file.save_to_path(path, WriteOptions::default())?;
    Ok(tagged_file.properties().audio_bitrate().map(|b| b as i32))
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    // Windows has no cross-device rename errno to match; copy+unlink never
    // triggers there since `std::fs::rename` already copies across volumes.
    -1
}

/// Best-effort cleanup of a download's source directory once it's empty
/// (spec §4.9 step 5). Never treated as fatal.
async fn cleanup_if_empty(dir: Option<&Path>) {
    let Some(dir) = dir else { return };
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        if entries.next_entry().await.ok().flatten().is_none() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}

/// Sanitizes one path component: strips characters forbidden on common
/// filesystems, trims the trailing dots/spaces Windows rejects, and bounds
/// the length so deeply nested libraries don't blow past filesystem limits.
fn sanitize_component(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control() { ' ' } else { c })
        .collect();

    cleaned = cleaned.trim().trim_end_matches('.').trim().to_string();
    cleaned.truncate(MAX_COMPONENT_LEN);
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned
    }
}

fn track_filename(track_number: Option<i32>, title: &str, extension: &str) -> String {
    match track_number {
        Some(n) => format!("{n:02} - {title}.{extension}"),
        None => format!("{title}.{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(sanitize_component("AC/DC: Back in Black?"), "AC DC  Back in Black");
    }

    #[test]
    fn trims_trailing_dots() {
        assert_eq!(sanitize_component("Vol. II..."), "Vol. II");
    }

    #[test]
    fn empty_after_sanitizing_falls_back_to_unknown() {
        assert_eq!(sanitize_component("///"), "Unknown");
    }

    #[test]
    fn track_filename_includes_zero_padded_number() {
        assert_eq!(track_filename(Some(3), "Kerala", "flac"), "03 - Kerala.flac");
        assert_eq!(track_filename(None, "Kerala", "flac"), "Kerala.flac");
    }

    #[tokio::test]
    async fn process_moves_file_and_upserts_catalog_rows() {
        let store = CatalogStore::connect_in_memory().await.unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let library_dir = tempfile::tempdir().unwrap();

        let source_path = source_dir.path().join("Kerala.flac");
        std::fs::write(&source_path, b"not really audio, lofty should skip tagging it").unwrap();

        let ctx = PostProcessContext {
            artist_name: "Bonobo".into(),
            album_name: "Migration".into(),
            track_title: "Kerala".into(),
            track_number: Some(1),
            year: Some(2017),
            external_track_id: "spotify:track:1".into(),
            external_album_id: Some("spotify:album:1".into()),
            external_artist_id: Some("spotify:artist:1".into()),
        };

        let destination = process(&store, library_dir.path(), &source_path, ctx).await.unwrap();

        assert!(destination.exists());
        assert!(!source_path.exists());
        assert_eq!(destination.file_name().unwrap().to_str().unwrap(), "01 - Kerala.flac");

        let (found, _) = store.tracks().check_track_exists("Kerala", "Bonobo", 0.7).await.unwrap();
        let found = found.unwrap();
        assert_eq!(found.file_path(), Some(&destination));
    }

    #[tokio::test]
    async fn existing_destination_is_left_in_place_and_source_is_dropped() {
        let store = CatalogStore::connect_in_memory().await.unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let library_dir = tempfile::tempdir().unwrap();

        let existing_dest = library_dir.path().join("Bonobo").join("Migration").join("01 - Kerala.flac");
        std::fs::create_dir_all(existing_dest.parent().unwrap()).unwrap();
        std::fs::write(&existing_dest, b"already here").unwrap();

        let source_path = source_dir.path().join("Kerala.flac");
        std::fs::write(&source_path, b"new copy").unwrap();

        let ctx = PostProcessContext {
            artist_name: "Bonobo".into(),
            album_name: "Migration".into(),
            track_title: "Kerala".into(),
            track_number: Some(1),
            year: None,
            external_track_id: "spotify:track:1".into(),
            external_album_id: None,
            external_artist_id: None,
        };

        let destination = process(&store, library_dir.path(), &source_path, ctx).await.unwrap();

        assert_eq!(destination, existing_dest);
        assert_eq!(std::fs::read(&existing_dest).unwrap(), b"already here");
        assert!(!source_path.exists());
    }

    #[tokio::test]
    async fn repairs_track_number_against_existing_sibling() {
        let store = CatalogStore::connect_in_memory().await.unwrap();
        let artist_id = store.artists().upsert(&Artist::new(0, "Bonobo").unwrap()).await.unwrap();
        let album_id = store.albums().upsert(&Album::new(0, artist_id, "Migration").unwrap()).await.unwrap();

        let mut sibling = Track::new(0, album_id, artist_id, "Kerala").unwrap();
        sibling.set_track_number(Some(1));
        store.tracks().upsert(&sibling).await.unwrap();

        let ctx = PostProcessContext {
            artist_name: "Bonobo".into(),
            album_name: "Migration".into(),
            track_title: "Kerala".into(),
            track_number: Some(99),
            year: None,
            external_track_id: "spotify:track:2".into(),
            external_album_id: None,
            external_artist_id: None,
        };

        let (title, track_number) = repair_track_metadata(&store, album_id, &ctx).await.unwrap();
        assert_eq!(title, "Kerala");
        assert_eq!(track_number, Some(1));
    }
}
