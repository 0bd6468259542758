use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Split text on runs of whitespace. Terms are case-sensitive and kept verbatim;
/// the empty pieces a leading or trailing run would produce are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    WHITESPACE
        .split(text)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinct tokens of `text`, sorted.
pub fn distinct_tokens(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_runs() {
        assert_eq!(tokenize("i like  search\tengine\n"), vec!["i", "like", "search", "engine"]);
    }

    #[test]
    fn keeps_punctuation_and_case() {
        assert_eq!(tokenize("Search@163.com 127.0.0.1 i/like"), vec!["Search@163.com", "127.0.0.1", "i/like"]);
    }

    #[test]
    fn filters_empty_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t ").is_empty());
        assert_eq!(tokenize("  padded  "), vec!["padded"]);
    }

    #[test]
    fn distinct_dedups() {
        let t = distinct_tokens("a b a c b");
        assert_eq!(t.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
