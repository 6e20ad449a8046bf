/// Byte offset of the first whole-word occurrence of `keyword` in `haystack`.
///
/// Both sides are expected lower-cased. A keyword edge made of punctuation
/// (`c++`, `.net`, `sr.`) does not require a word boundary on that side.
pub(crate) fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    if keyword.is_empty() {
        return None;
    }
    let starts_word = keyword.chars().next().is_some_and(char::is_alphanumeric);
    let ends_word = keyword.chars().next_back().is_some_and(char::is_alphanumeric);

    let mut from = 0;
    while let Some(found) = haystack[from..].find(keyword) {
        let start = from + found;
        let end = start + keyword.len();
        let before_ok = !starts_word
            || !haystack[..start].chars().next_back().is_some_and(char::is_alphanumeric);
        let after_ok = !ends_word || !haystack[end..].chars().next().is_some_and(char::is_alphanumeric);
        if before_ok && after_ok {
            return Some(start);
        }
        from = start + keyword.chars().next().map_or(1, char::len_utf8);
    }
    None
}

pub(crate) fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    find_keyword(haystack, keyword).is_some()
}

/// Lower-cases the configured keywords once so matching can skip it.
pub(crate) fn lowered(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_word_boundaries() {
        assert!(contains_keyword("senior java developer", "java"));
        assert!(!contains_keyword("senior javascript developer", "java"));
        assert!(!contains_keyword("pyramid builder", "mid"));
        assert!(contains_keyword("mid-level engineer", "mid"));
    }

    #[test]
    fn punctuation_edges_relax_the_boundary() {
        assert!(contains_keyword("c++/qt engineer", "c++"));
        assert!(contains_keyword("asp.net core", ".net"));
        assert!(contains_keyword("sr. backend", "sr."));
        assert!(!contains_keyword("abc++", "c++"));
    }

    #[test]
    fn matches_arabic_words() {
        assert_eq!(find_keyword("مطلوب مطور متدرب", "متدرب"), Some("مطلوب مطور ".len()));
        assert!(!contains_keyword("المتدربين", "متدرب"));
    }

    #[test]
    fn later_occurrence_is_found_after_a_rejected_one() {
        assert_eq!(find_keyword("javascript or java", "java"), Some(14));
    }
}
