//! Local dev fixture management (SPEC_FULL §A test tooling): tagged audio
//! files for exercising the Post-Processor's tag-writing path against a
//! real container format, generated with `lofty` the way the teacher's
//! `utils/audio_fixtures.rs` does. The teacher's Windows-only
//! permission-denial machinery (`icacls`, inaccessible directories) isn't
//! ported — this crate has no directory-scanner permission edge case to
//! exercise.

use std::fs;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};

#[derive(Debug, thiserror::Error)]
pub enum FixturesError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Lofty(#[from] lofty::error::LoftyError),
}

const FIXTURES_DIR: &str = "test_fixtures";

struct FixtureSpec {
    file_name: &'static str,
    title: &'static str,
    artist: &'static str,
    album: &'static str,
    track_number: u32,
}

const FIXTURES: &[FixtureSpec] = &[
    FixtureSpec { file_name: "tagged_a.wav", title: "Fixture Track A", artist: "Fixture Artist", album: "Fixture Album", track_number: 1 },
    FixtureSpec { file_name: "tagged_b.wav", title: "Fixture Track B", artist: "Fixture Artist", album: "Fixture Album", track_number: 2 },
];

/// Writes a handful of minimal, validly-tagged WAV fixtures under
/// `./test_fixtures/files` and returns their paths.
pub fn prepare() -> Result<Vec<PathBuf>, FixturesError> {
    let dir = Path::new(FIXTURES_DIR).join("files");
    fs::create_dir_all(&dir)?;

    let mut paths = Vec::new();
    for spec in FIXTURES {
        let path = dir.join(spec.file_name);
        write_silent_wav(&path)?;
        tag_fixture(&path, spec)?;
        paths.push(path);
    }
    Ok(paths)
}

pub fn cleanup() -> Result<(), FixturesError> {
    let dir = Path::new(FIXTURES_DIR);
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

fn tag_fixture(path: &Path, spec: &FixtureSpec) -> Result<(), FixturesError> {
    let mut tagged_file = Probe::open(path)?.read()?;
    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file.primary_tag_mut().expect("tag was just inserted if absent");
    tag.set_title(spec.title.to_string());
    tag.set_artist(spec.artist.to_string());
    tag.set_album(spec.album.to_string());
    tag.set_track(spec.track_number);
    tagged_file.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

/// Minimal valid one-second silent 16-bit mono PCM WAV file — enough for
/// lofty to probe and tag without pulling in an encoder crate.
fn write_silent_wav(path: &Path) -> Result<(), FixturesError> {
    const SAMPLE_RATE: u32 = 8_000;
    const NUM_SAMPLES: u32 = SAMPLE_RATE;
    const BITS_PER_SAMPLE: u16 = 16;
    const NUM_CHANNELS: u16 = 1;

    let byte_rate = SAMPLE_RATE * u32::from(NUM_CHANNELS) * u32::from(BITS_PER_SAMPLE) / 8;
    let block_align = NUM_CHANNELS * (BITS_PER_SAMPLE / 8);
    let data_size = NUM_SAMPLES * u32::from(block_align);

    let mut bytes = Vec::with_capacity(44 + data_size as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_size).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&NUM_CHANNELS.to_le_bytes());
    bytes.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_size.to_le_bytes());
    bytes.extend(std::iter::repeat(0u8).take(data_size as usize));

    fs::write(path, bytes)?;
    Ok(())
}
