//! Filename -> `{artist, title, album, track_number}` parsing (spec §4.4
//! `parse_filename`), tried in the order the spec lists: "`NN - Artist -
//! Title`", "`Artist - Title`", "`NN - Title`", then an underscore variant
//! "`Artist_Album_NN_Title`", falling back to the parent directory.

use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFilename {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<i32>,
}

pub fn parse_filename(path: &Path) -> ParsedFilename {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    let mut parsed = parse_dash_separated(stem).or_else(|| parse_underscore_separated(stem)).unwrap_or_default();

    if parsed.album.is_none() {
        parsed.album = parent_dir_album(path);
    }

    if let (Some(artist), Some(title)) = (parsed.artist.clone(), parsed.title.clone()) {
        parsed.title = Some(strip_artist_from_title(&artist, &title));
    }

    parsed
}

fn parse_dash_separated(stem: &str) -> Option<ParsedFilename> {
    let parts: Vec<&str> = stem.split(" - ").map(str::trim).filter(|p| !p.is_empty()).collect();

    match parts.len() {
        3.. => {
            if let Some(track_number) = leading_track_number(parts[0]) {
                // "NN - Artist - Title"
                return Some(ParsedFilename {
                    track_number: Some(track_number),
                    artist: Some(parts[1].to_string()),
                    title: Some(parts[2..].join(" - ")),
                    album: None,
                });
            }
            // No leading number: treat the first segment as the artist and
            // everything after as the title (spec's "Artist - Title" case
            // with extra dashes inside the title itself).
            Some(ParsedFilename {
                track_number: None,
                artist: Some(parts[0].to_string()),
                title: Some(parts[1..].join(" - ")),
                album: None,
            })
        }
        2 => {
            if let Some(track_number) = leading_track_number(parts[0]) {
                // "NN - Title"
                Some(ParsedFilename { track_number: Some(track_number), artist: None, title: Some(parts[1].to_string()), album: None })
            } else {
                // "Artist - Title"
                Some(ParsedFilename { track_number: None, artist: Some(parts[0].to_string()), title: Some(parts[1].to_string()), album: None })
            }
        }
        _ => None,
    }
}

fn parse_underscore_separated(stem: &str) -> Option<ParsedFilename> {
    if !stem.contains('_') {
        return None;
    }
    let parts: Vec<&str> = stem.split('_').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.len() < 4 {
        return None;
    }

    // "Artist_Album_NN_Title": find the first numeric segment after index 1
    // and treat it as the track number boundary.
    let track_idx = parts.iter().enumerate().skip(2).find_map(|(i, p)| leading_track_number(p).map(|n| (i, n)))?;

    let (idx, track_number) = track_idx;
    Some(ParsedFilename {
        artist: Some(parts[0].to_string()),
        album: Some(parts[1..idx].join(" ")),
        track_number: Some(track_number),
        title: Some(parts[idx + 1..].join(" ")),
    })
}

fn leading_track_number(segment: &str) -> Option<i32> {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    digits.parse().ok()
}

/// The parent directory name, minus a leading "`YYYY - `" prefix, used as
/// the album when the filename itself carries none (spec §4.4).
fn parent_dir_album(path: &Path) -> Option<String> {
    let parent_name = path.parent()?.file_name()?.to_str()?;
    let stripped = strip_leading_year_prefix(parent_name);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

fn strip_leading_year_prefix(name: &str) -> &str {
    let bytes = name.as_bytes();
    if bytes.len() >= 4 && bytes[..4].iter().all(u8::is_ascii_digit) {
        let rest = &name[4..];
        if let Some(stripped) = rest.strip_prefix(" - ") {
            return stripped;
        }
    }
    name
}

/// If the parsed artist also appears verbatim inside the parsed title,
/// drop it (spec §4.4's last rule: avoid "Artist - Artist Title" residue).
fn strip_artist_from_title(artist: &str, title: &str) -> String {
    let lower_title = title.to_lowercase();
    let lower_artist = artist.to_lowercase();
    if let Some(pos) = lower_title.find(&lower_artist) {
        let mut stripped = String::with_capacity(title.len());
        stripped.push_str(title[..pos].trim());
        stripped.push(' ');
        stripped.push_str(title[pos + artist.len()..].trim());
        let stripped = stripped.trim().to_string();
        if !stripped.is_empty() {
            return stripped;
        }
    }
    title.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_numbered_artist_title() {
        let parsed = parse_filename(&PathBuf::from("/music/2017 - Migration/03 - Bonobo - Kerala.flac"));
        assert_eq!(parsed.track_number, Some(3));
        assert_eq!(parsed.artist.as_deref(), Some("Bonobo"));
        assert_eq!(parsed.title.as_deref(), Some("Kerala"));
        assert_eq!(parsed.album.as_deref(), Some("Migration"));
    }

    #[test]
    fn parses_artist_dash_title_without_number() {
        let parsed = parse_filename(&PathBuf::from("/music/unsorted/Burial - Archangel.mp3"));
        assert_eq!(parsed.artist.as_deref(), Some("Burial"));
        assert_eq!(parsed.title.as_deref(), Some("Archangel"));
    }

    #[test]
    fn parses_numbered_title_only() {
        let parsed = parse_filename(&PathBuf::from("/music/Untrue/02 - Archangel.flac"));
        assert_eq!(parsed.track_number, Some(2));
        assert!(parsed.artist.is_none());
        assert_eq!(parsed.title.as_deref(), Some("Archangel"));
        assert_eq!(parsed.album.as_deref(), Some("Untrue"));
    }

    #[test]
    fn parses_underscore_variant() {
        let parsed = parse_filename(&PathBuf::from("/music/Bonobo_Migration_01_Kerala.flac"));
        assert_eq!(parsed.artist.as_deref(), Some("Bonobo"));
        assert_eq!(parsed.album.as_deref(), Some("Migration"));
        assert_eq!(parsed.track_number, Some(1));
        assert_eq!(parsed.title.as_deref(), Some("Kerala"));
    }

    #[test]
    fn strips_redundant_artist_prefix_from_title() {
        let parsed = parse_filename(&PathBuf::from("/music/unsorted/Bonobo - Bonobo Kerala.flac"));
        assert_eq!(parsed.title.as_deref(), Some("Kerala"));
    }
}
