//! Case-insensitive term matching.
//!
//! Entity resolution (and mention indexing at import time, which reuses
//! it) matches names as plain substrings, so `"lightfield"` is found in
//! `"lightfields"`. The relationship-enrichment fallback is stricter and
//! only accepts hits on word boundaries.

/// Byte offset (in `haystack_lower`) of the first occurrence of
/// `needle_lower`, ignoring surrounding whitespace in the needle.
///
/// Both arguments must already be lowercased.
pub fn find_substring(haystack_lower: &str, needle_lower: &str) -> Option<usize> {
    let needle = needle_lower.trim();
    if needle.is_empty() {
        return None;
    }
    haystack_lower.find(needle)
}

/// Byte offset (in `haystack_lower`) of the first occurrence of
/// `needle_lower` that starts and ends on a word boundary.
///
/// Both arguments must already be lowercased. A boundary is the start or
/// end of the string or any non-alphanumeric character, so `"leia"`
/// matches in `"leia's display"` but not in `"leiasoft"`.
pub fn find_term(haystack_lower: &str, needle_lower: &str) -> Option<usize> {
    let needle = needle_lower.trim();
    if needle.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(pos) = haystack_lower[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack_lower[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack_lower[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(start);
        }
        // Advance by one char so overlapping candidates are still seen.
        from = start
            + haystack_lower[start..]
                .chars()
                .next()
                .map_or(1, |c| c.len_utf8());
        if from >= haystack_lower.len() {
            break;
        }
    }
    None
}

/// Whether `term` appears in `text` on word boundaries, ignoring case.
pub fn contains_term(text: &str, term: &str) -> bool {
    find_term(&text.to_lowercase(), &term.to_lowercase()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_substring_accepts_inflections() {
        assert_eq!(find_substring("holographic displays", "display"), Some(12));
        assert_eq!(find_substring("two lightfields", "lightfield"), Some(4));
        assert_eq!(find_substring("anything", "  "), None);
        assert_eq!(find_substring("leia", "leia inc"), None);
    }

    #[test]
    fn test_find_term_respects_boundaries() {
        assert_eq!(find_term("lightfield displays", "lightfield"), Some(0));
        assert_eq!(find_term("the leia inc tablet", "leia inc"), Some(4));
        assert_eq!(find_term("leiasoft", "leia"), None);
        assert_eq!(find_term("said the ai", "ai"), Some(9));
    }

    #[test]
    fn test_find_term_skips_inner_hit_then_matches_later() {
        assert_eq!(find_term("cables and able", "able"), Some(11));
    }

    #[test]
    fn test_find_term_punctuation_is_boundary() {
        assert_eq!(find_term("(3d-display) tech", "3d-display"), Some(1));
        assert_eq!(find_term("leia's", "leia"), Some(0));
    }

    #[test]
    fn test_empty_needle_never_matches() {
        assert_eq!(find_term("anything", ""), None);
        assert_eq!(find_term("anything", "   "), None);
    }

    #[test]
    fn test_contains_term_ignores_case() {
        assert!(contains_term("Evolution of Leia Inc", "LEIA INC"));
        assert!(!contains_term("Evolution of Leia Inc", "Leia Incorporated"));
    }

    #[test]
    fn test_multibyte_haystack() {
        assert_eq!(find_term("über lightfield", "lightfield"), Some(6));
        assert_eq!(find_term("ééé", "x"), None);
    }
}
