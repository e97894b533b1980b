//! Match Engine (C4, spec §4.4). Pure functions only: normalization,
//! similarity scoring, search-name cleaning, filename parsing, candidate
//! ranking and release-content classification. Nothing here performs I/O;
//! every caller (catalog fuzzy lookups, the fulfillment engine, the
//! enrichment worker, the watchlist scanner) builds its query from data it
//! already fetched and only consults this module for the pure decision.

pub mod classify;
pub mod filename;
pub mod normalize;

pub use classify::{clean_track_name_for_search, is_acoustic_version, is_compilation_album, is_live_version, is_remix_version};
pub use filename::{parse_filename, ParsedFilename};
pub use normalize::{normalize as normalize_str, similarity};

/// One entry of an official tracklist, as returned by the metadata provider
/// (spec §4.4 `match_track_to_spotify_list`). Kept deliberately minimal so
/// this module stays decoupled from C3's wire types.
#[derive(Debug, Clone, PartialEq)]
pub struct OfficialTrack {
    pub track_number: Option<i32>,
    pub title: String,
}

/// Picks the official track whose title best matches `parsed.title` (spec
/// §4.4): similarity must exceed 0.8. When `parsed.track_number` is present
/// it is used as a primary key — an official track at the same number is
/// preferred outright, similarity against title only breaks ties among
/// same-numbered candidates (there should never be more than one, but the
/// source data isn't always clean).
pub fn match_track_to_spotify_list<'a>(
    parsed: &ParsedFilename,
    official_list: &'a [OfficialTrack],
) -> Option<&'a OfficialTrack> {
    const MIN_SIMILARITY: f64 = 0.8;

    let parsed_title = parsed.title.as_deref().unwrap_or_default();

    if let Some(track_number) = parsed.track_number {
        let mut by_number: Vec<&OfficialTrack> =
            official_list.iter().filter(|t| t.track_number == Some(track_number)).collect();
        if !by_number.is_empty() {
            by_number.sort_by(|a, b| {
                similarity(&b.title, parsed_title)
                    .partial_cmp(&similarity(&a.title, parsed_title))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            return Some(by_number[0]);
        }
    }

    official_list
        .iter()
        .map(|t| (t, similarity(&t.title, parsed_title)))
        .filter(|(_, score)| *score > MIN_SIMILARITY)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(t, _)| t)
}

/// Inputs to the fulfillment engine's candidate ranking (spec §4.5): title
/// similarity weight 0.6, artist similarity weight 0.4, plus a quality term
/// derived from bitrate/format when present.
#[derive(Debug, Clone, Copy)]
pub struct CandidateScoreInput {
    pub title_similarity: f64,
    pub artist_similarity: f64,
    pub quality_term: f64,
}

pub const TITLE_SIMILARITY_WEIGHT: f64 = 0.6;
pub const ARTIST_SIMILARITY_WEIGHT: f64 = 0.4;

/// `0.6 * title_similarity + 0.4 * artist_similarity`, plus a quality term
/// used only for tie-breaking (spec §4.5). The quality term is kept out of
/// the weighted sum so two candidates of equal match quality but different
/// bitrate don't let a lossy-but-exact match lose to a fuzzy-but-lossless
/// one; callers sort on `(score, quality_term, first_seen_index)`.
pub fn score_candidate(input: CandidateScoreInput) -> f64 {
    TITLE_SIMILARITY_WEIGHT * input.title_similarity + ARTIST_SIMILARITY_WEIGHT * input.artist_similarity
}

/// Quality term derived from bitrate: normalized against a 320kbps
/// reference, capped at 1.0. Lossless formats (no reliable bitrate
/// reported, or bitrate above the usual lossy ceiling) score the max.
pub fn quality_term_from_bitrate(bitrate: Option<i32>) -> f64 {
    match bitrate {
        Some(bps) if bps > 0 => (f64::from(bps) / 320.0).min(1.0),
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn official(n: i32, title: &str) -> OfficialTrack {
        OfficialTrack { track_number: Some(n), title: title.to_string() }
    }

    #[test]
    fn matches_filenames_to_official_tracklist_by_title() {
        let official_list =
            vec![official(1, "Song A"), official(2, "Song B"), official(3, "Song C")];

        let parsed_a = parse_filename(std::path::Path::new("01 - Song A.mp3"));
        let parsed_b = parse_filename(std::path::Path::new("02 - song-b.mp3"));

        let matched_a = match_track_to_spotify_list(&parsed_a, &official_list).unwrap();
        assert_eq!(matched_a.title, "Song A");

        let matched_b = match_track_to_spotify_list(&parsed_b, &official_list).unwrap();
        assert_eq!(matched_b.title, "Song B");
    }

    #[test]
    fn unmatched_official_track_is_not_an_error() {
        let official_list = vec![official(1, "Song A"), official(2, "Song B"), official(3, "Song C")];
        let parsed = ParsedFilename { title: Some("Completely Unrelated".into()), ..Default::default() };
        assert!(match_track_to_spotify_list(&parsed, &official_list).is_none());
    }

    #[test]
    fn candidate_score_weights_title_over_artist() {
        let high_title = score_candidate(CandidateScoreInput { title_similarity: 1.0, artist_similarity: 0.0, quality_term: 0.0 });
        let high_artist = score_candidate(CandidateScoreInput { title_similarity: 0.0, artist_similarity: 1.0, quality_term: 0.0 });
        assert!(high_title > high_artist);
    }
}
