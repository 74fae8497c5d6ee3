//! Violation detection: routes frustrated/corrective messages toward
//! compliance instructions.

use crate::patterns::clip;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Strong violation words that always signal.
static VIOLATION_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Strong user frustration/correction indicators
        "unacceptable", "wrong", "incorrect", "mistake",
        // Frustration indicators (less common in technical discussions)
        "frustrated", "frustrating", "annoying", "annoyed", "disappointed",
        // Explicit compliance/quality concerns
        "violation", "violate", "breach",
        // Quality concerns (clear intent)
        "sloppy", "careless", "shortcuts",
    ]
    .into_iter()
    .collect()
});

/// Words that only count as violations when emphasized (caps, exclamation,
/// or sentence start).
const EMPHASIS_VIOLATION_WORDS: &[&str] = &["no", "stop", "bad"];

/// Categories boosted when violations are detected.
pub const VIOLATION_BOOST_CATEGORIES: &[&str] = &["trust_execution", "safety_prevention"];

/// Boost per detected signal.
pub const VIOLATION_CATEGORY_BOOST: i64 = 20;

struct EmphasisRule {
    word: &'static str,
    caps: Regex,
    exclaimed: Regex,
    sentence_start: Regex,
}

static EMPHASIS_RULES: LazyLock<Vec<EmphasisRule>> = LazyLock::new(|| {
    EMPHASIS_VIOLATION_WORDS
        .iter()
        .copied()
        .map(|word| EmphasisRule {
            word,
            caps: Regex::new(&format!(r"\b{}\b", word.to_uppercase())).expect("invalid regex"),
            exclaimed: Regex::new(&format!(r"\b{word}\s*!")).expect("invalid regex"),
            sentence_start: Regex::new(&format!(r"(?:^|[.!?]\s*){word}[,\s]"))
                .expect("invalid regex"),
        })
        .collect()
});

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("invalid regex"));

/// Violation detection outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViolationInfo {
    pub detected: bool,
    pub signals: Vec<String>,
    /// `VIOLATION_CATEGORY_BOOST` × signal count.
    pub boost_amount: i64,
}

/// Detect violation signals in a message.
///
/// Signals: strong violation words, emphasized negations (CAPS / `!` /
/// sentence-start), exclamation density ≥ 3, and ≥ 2 all-caps words.
pub fn detect_violations(message: &str) -> ViolationInfo {
    let mut signals = Vec::new();
    let message_lower = message.to_lowercase();

    // Check 1: strong violation words (always trigger)
    let mut matched: Vec<&str> = WORD_RE
        .find_iter(&message_lower)
        .map(|m| m.as_str())
        .filter(|word| VIOLATION_WORDS.contains(word))
        .collect();
    matched.sort_unstable();
    matched.dedup();
    if !matched.is_empty() {
        signals.push(format!("violation_words:{}", matched.join(",")));
    }

    // Check 2: emphasis-only words need caps, exclamation, or sentence start
    for rule in EMPHASIS_RULES.iter() {
        if rule.caps.is_match(message) {
            signals.push(format!("emphasized_{}", rule.word.to_uppercase()));
        } else if rule.exclaimed.is_match(&message_lower) {
            signals.push(format!("exclaimed_{}", rule.word));
        } else if rule.sentence_start.is_match(&message_lower) {
            signals.push(format!("sentence_start_{}", rule.word));
        }
    }

    // Check 3: high exclamation density indicates strong emotion
    let exclaim_count = message.matches('!').count();
    if exclaim_count >= 3 {
        signals.push(format!("exclamation_density:{exclaim_count}"));
    }

    // Check 4: two or more ALL CAPS words
    let caps_words: Vec<&str> = message
        .split_whitespace()
        .filter(|w| w.len() > 2 && w.chars().all(|c| c.is_ascii_uppercase()))
        .collect();
    if caps_words.len() >= 2 {
        let shown: Vec<&str> = caps_words.iter().take(3).map(|w| clip(w, 20)).collect();
        signals.push(format!("caps_emphasis:{}", shown.join(",")));
    }

    let boost_amount = VIOLATION_CATEGORY_BOOST * signals.len() as i64;
    ViolationInfo {
        detected: !signals.is_empty(),
        signals,
        boost_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_violation_words() {
        let info = detect_violations("this is wrong and unacceptable");
        assert!(info.detected);
        assert_eq!(info.signals, vec!["violation_words:unacceptable,wrong"]);
        assert_eq!(info.boost_amount, 20);
    }

    #[test]
    fn test_emphasized_negation() {
        let info = detect_violations("NO STOP that immediately");
        assert!(info.detected);
        assert!(info.signals.contains(&"emphasized_NO".to_string()));
        assert!(info.signals.contains(&"emphasized_STOP".to_string()));
    }

    #[test]
    fn test_exclaimed_word() {
        let info = detect_violations("stop! that is the old schema");
        assert!(info.signals.contains(&"exclaimed_stop".to_string()));
    }

    #[test]
    fn test_sentence_start_negation() {
        let info = detect_violations("No, that file belongs elsewhere");
        assert!(info.signals.contains(&"sentence_start_no".to_string()));
    }

    #[test]
    fn test_exclamation_density() {
        let info = detect_violations("fix it!!! now");
        assert!(info
            .signals
            .iter()
            .any(|s| s.starts_with("exclamation_density:")));
    }

    #[test]
    fn test_caps_emphasis() {
        let info = detect_violations("DELETE the WHOLE thing");
        assert!(info.signals.iter().any(|s| s.starts_with("caps_emphasis:")));
    }

    #[test]
    fn test_plain_negation_not_a_signal() {
        // Unemphasized "no" inside a sentence should not trigger.
        let info = detect_violations("there is currently no cache layer here");
        assert!(!info.detected);
        assert_eq!(info.boost_amount, 0);
    }

    #[test]
    fn test_boost_scales_with_signal_count() {
        // violation words + emphasized NO + exclamation density = 3 signals
        let info = detect_violations("NO! this is WRONG and sloppy!!!");
        assert_eq!(info.signals.len(), 3);
        assert_eq!(info.boost_amount, 60);
    }
}
