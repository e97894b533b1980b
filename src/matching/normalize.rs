//! Pure string normalization (spec §4.4). No I/O, no catalog/provider types.

use unicode_normalization::UnicodeNormalization;

/// Lower-cases, strips accents, drops parenthesized segments, and collapses
/// whitespace/punctuation to single spaces (spec §4.4 `normalize`).
pub fn normalize(s: &str) -> String {
    let without_parens = strip_parenthesized(s);

    let stripped_accents: String = without_parens
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let lowered = stripped_accents.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = false;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    out.trim().to_string()
}

/// Removes every `(...)`/`[...]` segment, regardless of content. Used by
/// `normalize`; callers that need to *selectively* drop parentheticals
/// (`clean_track_name_for_search`) use their own regex pass instead.
fn strip_parenthesized(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth: i32 = 0;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = (depth - 1).max(0),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Symmetric string similarity in `[0, 1]`, `1.0` iff the normalized forms
/// are equal (spec §4.4). Backed by normalized Levenshtein distance, which
/// callers threshold at 0.7/0.8/0.9 per spec.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return 1.0;
    }
    strsim::normalized_levenshtein(&na, &nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_parens_and_punctuation() {
        assert_eq!(normalize("Café (Acoustic Version)!!"), "cafe");
        assert_eq!(normalize("  Boards   of Canada  "), "boards of canada");
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let a = "Kerala";
        let b = "Keralaa";
        let sim_ab = similarity(a, b);
        let sim_ba = similarity(b, a);
        assert_eq!(sim_ab, sim_ba);
        assert!((0.0..=1.0).contains(&sim_ab));
    }

    #[test]
    fn similarity_of_equal_strings_is_one() {
        assert_eq!(similarity("Untrue", "untrue"), 1.0);
    }

    #[test]
    fn similarity_ignores_parenthetical_differences() {
        assert_eq!(similarity("Song A", "Song A (Remastered 2011)"), 1.0);
    }
}
