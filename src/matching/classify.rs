//! Release-content classifiers and search-name cleaning (spec §4.4, GLOSSARY).

use std::sync::LazyLock;

use regex::Regex;

/// Parentheticals stripped from a track name before it is sent to the
/// daemon's search endpoint (spec §4.4 `clean_track_name_for_search`).
/// Case-insensitive; "(Live)"/"(Acoustic)"/"(Remix)"/"(Extended Version)"/
/// "(Remastered)"/"(Demo)"/"(Instrumental)" and year/edition parentheticals
/// are deliberately left alone.
static STRIPPED_PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*\((?:feat\.?|ft\.?|featuring|with)\s+[^)]*\)|\s*\((?:explicit|clean|radio edit|radio version)\)",
    )
    .expect("valid regex")
});

/// spec §4.4 `clean_track_name_for_search`: strip feat./ft./featuring/with
/// and Explicit/Clean/Radio Edit/Radio Version parentheticals. If the result
/// is empty, fall back to the original (never return an empty search term).
pub fn clean_track_name_for_search(name: &str) -> String {
    let cleaned = STRIPPED_PARENTHETICAL.replace_all(name, "").trim().to_string();
    if cleaned.is_empty() {
        name.to_string()
    } else {
        cleaned
    }
}

static LIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\blive\b|live at|\bconcert\b|in concert|\bunplugged\b|live session|live from|live recording|on stage",
    )
    .expect("valid regex")
});

static REMIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bremix\b|\bmix\b|\bedit\b|\bversion\b.*\bmix\b|club mix|dance mix|radio edit|extended.*mix|\bdub\b|vip mix",
    )
    .expect("valid regex")
});

static REMASTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bremaster(?:ed)?\b").expect("valid regex"));

static ACOUSTIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bacoustic\b|\bstripped\b|piano version|\bunplugged\b").expect("valid regex"));

static COMPILATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)greatest hits|best of|anthology|collection|compilation|the essential|complete|\bhits\b|top\s+\d+|very best|definitive",
    )
    .expect("valid regex")
});

pub fn is_live_version(name: &str) -> bool {
    LIVE_RE.is_match(name)
}

/// Explicitly excludes anything matching `\bremaster(ed)?\b` (spec §4.4,
/// testable property #7): a remaster is never classified as a remix even
/// if its title also contains "mix" or "edit".
pub fn is_remix_version(name: &str) -> bool {
    if REMASTER_RE.is_match(name) {
        return false;
    }
    REMIX_RE.is_match(name)
}

pub fn is_acoustic_version(name: &str) -> bool {
    ACOUSTIC_RE.is_match(name)
}

pub fn is_compilation_album(name: &str) -> bool {
    COMPILATION_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_feat_and_radio_edit_but_keeps_live_and_remaster() {
        assert_eq!(clean_track_name_for_search("Song (feat. Someone)"), "Song");
        assert_eq!(clean_track_name_for_search("Song (Radio Edit)"), "Song");
        assert_eq!(clean_track_name_for_search("Song (Live)"), "Song (Live)");
        assert_eq!(clean_track_name_for_search("Song (Remastered 2011)"), "Song (Remastered 2011)");
    }

    #[test]
    fn clean_falls_back_to_original_when_result_is_empty() {
        assert_eq!(clean_track_name_for_search("(feat. Someone)"), "(feat. Someone)");
    }

    #[test]
    fn clean_is_idempotent() {
        let once = clean_track_name_for_search("Song (feat. Someone) (Live)");
        let twice = clean_track_name_for_search(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn remix_excludes_remastered_titles() {
        assert!(!is_remix_version("Song (Remastered)"));
        assert!(!is_remix_version("Song (Remaster 2011 Mix)"));
        assert!(is_remix_version("Song (Club Mix)"));
    }

    #[test]
    fn classifiers_match_glossary_examples() {
        assert!(is_live_version("Song (Live at Wembley)"));
        assert!(is_acoustic_version("Song (Acoustic)"));
        assert!(is_compilation_album("Greatest Hits"));
        assert!(is_compilation_album("Top 40 Anthems"));
    }
}
