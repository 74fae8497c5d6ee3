//! Message text analysis: keyword extraction and intent bucketing.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("invalid regex"));

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "as", "is", "was", "are", "were", "be",
        "been", "being", "have", "has", "had", "do", "does", "did", "will",
        "would", "should", "could", "may", "might", "must", "can", "this",
        "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
    ]
    .into_iter()
    .collect()
});

/// Extract keywords: lowercase, strip punctuation, drop stop words and
/// anything two characters or shorter.
pub fn extract_keywords(message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let clean = NON_WORD_RE.replace_all(&lower, " ");
    clean
        .split_whitespace()
        .filter(|word| word.len() > 2 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Seven-way intent bucket by phrase presence.
pub fn extract_intent(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    let contains_any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if contains_any(&["how do i", "how to", "how can"]) {
        "how-to"
    } else if contains_any(&["what is", "what are", "explain"]) {
        "explanation"
    } else if contains_any(&["create", "add", "make", "build"]) {
        "creation"
    } else if contains_any(&["fix", "debug", "error", "issue", "problem"]) {
        "troubleshooting"
    } else if contains_any(&["test", "validate", "check"]) {
        "validation"
    } else if contains_any(&["document", "write docs", "readme"]) {
        "documentation"
    } else {
        "general"
    }
}
