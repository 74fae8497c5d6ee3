//! Approval suppression and commencement override.
//!
//! Simple approval messages ("yes", "ok", "thanks!") are conversational
//! continuations, not queries; routing on them wastes context. Commencement
//! phrases ("yes, let's continue") signal work intent and override
//! suppression.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Exact-match approval phrases (case-folded, trailing punctuation stripped).
static APPROVAL_PHRASES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "yes", "ok", "okay", "sure", "go ahead", "please continue", "continue",
        "sounds good", "perfect", "great", "excellent", "good", "fine", "nice",
        "thanks", "thank you", "ty", "approved", "confirmed", "correct",
        "yes please", "yes, please", "please do", "yes, please do", "go for it",
        "do it", "proceed", "that works", "that's fine", "that's good",
        "looks good", "lgtm", "ship it", "merge it", "all good", "no problem",
        "no worries", "np", "yep", "yup", "yeah", "uh huh", "mm hmm",
        "absolutely", "definitely", "certainly", "of course", "right",
        "exactly", "precisely", "agreed", "understood", "got it", "will do",
    ]
    .into_iter()
    .collect()
});

/// Single words that suggest approval when the message is short.
static APPROVAL_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "yes", "ok", "okay", "sure", "good", "great", "fine", "nice", "perfect",
        "excellent", "thanks", "approved", "continue", "proceed", "agreed",
        "correct", "right", "yep", "yeah",
    ]
    .into_iter()
    .collect()
});

/// Conservative commencement phrase table (exact/prefix, not regex). These
/// indicate continuation intent and must NOT suppress routing. The table
/// grows as new legitimate commencement phrases are discovered.
const COMMENCEMENT_PHRASES: &[&str] = &[
    // Core continuation phrases - high confidence
    "let's continue",
    "let's proceed",
    "let's resume",
    "let's go ahead",
    "let's get started",
    "let's begin",
    "let's start",
    // Please variants
    "please continue",
    "please proceed",
    "please resume",
    "please go ahead",
    // Yes-prefixed continuations
    "yes, let's continue",
    "yes, let's proceed",
    "yes, let's resume",
    "yes, let's begin",
    "yes, let's start",
    "yes, please continue",
    "yes, please proceed",
    // Go ahead variants
    "go ahead",
    "go ahead and continue",
    "go ahead and proceed",
    // Continue/proceed with
    "continue with",
    "proceed with",
];

/// Outcome of the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalCheck {
    /// Whether routing should be suppressed entirely.
    pub suppress: bool,
    /// Stable reason tag for the routing analysis.
    pub reason: &'static str,
    /// A commencement phrase was present (overrides suppression).
    pub commencement: bool,
}

impl ApprovalCheck {
    fn suppress(reason: &'static str) -> Self {
        Self {
            suppress: true,
            reason,
            commencement: false,
        }
    }
}

/// Evaluate the suppression gate for a message.
///
/// Order matters: commencement phrases override every suppression check
/// below them.
pub fn check_approval(message: &str) -> ApprovalCheck {
    let clean = message.trim().to_lowercase();
    let normalized = clean.trim_end_matches(['.', '!', '?', ',']);

    // Commencement phrases override approval suppression: a prefix hit or a
    // space-preceded substring both count ("ok, go ahead and continue").
    for phrase in COMMENCEMENT_PHRASES {
        if clean.starts_with(phrase) || clean.contains(&format!(" {phrase}")) {
            return ApprovalCheck {
                suppress: false,
                reason: "commencement_phrase_detected",
                commencement: true,
            };
        }
    }

    if APPROVAL_PHRASES.contains(normalized) {
        return ApprovalCheck::suppress("exact_approval_match");
    }

    // An empty message is not an approval; it routes normally (and still
    // collects the foundational set).
    let words: Vec<&str> = clean.split_whitespace().collect();
    if words.is_empty() {
        return ApprovalCheck {
            suppress: false,
            reason: "not_approval",
            commencement: false,
        };
    }

    let is_approval_word = |word: &&str| APPROVAL_WORDS.contains(word.trim_end_matches(['.', ',', '!', '?']));

    if words.len() <= 3 && words.iter().any(is_approval_word) {
        return ApprovalCheck::suppress("short_approval_message");
    }

    if words.len() <= 5 {
        let approval_count = words.iter().filter(|w| is_approval_word(*w)).count();
        if approval_count * 2 >= words.len() {
            return ApprovalCheck::suppress("approval_dominated_message");
        }
    }

    ApprovalCheck {
        suppress: false,
        reason: "not_approval",
        commencement: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_approval_match() {
        let check = check_approval("Thanks!");
        assert!(check.suppress);
        assert_eq!(check.reason, "exact_approval_match");
    }

    #[test]
    fn test_short_approval_message() {
        let check = check_approval("great work there");
        assert!(check.suppress);
        assert_eq!(check.reason, "short_approval_message");
    }

    #[test]
    fn test_approval_dominated_message() {
        // Four of five words are approval words.
        let check = check_approval("yes ok good sounds right");
        assert!(check.suppress);
        assert_eq!(check.reason, "approval_dominated_message");
    }

    #[test]
    fn test_empty_message_not_suppressed() {
        let check = check_approval("");
        assert!(!check.suppress);
        assert_eq!(check.reason, "not_approval");
    }

    #[test]
    fn test_commencement_overrides_suppression() {
        let check = check_approval("Yes, let's continue");
        assert!(!check.suppress);
        assert!(check.commencement);
        assert_eq!(check.reason, "commencement_phrase_detected");
    }

    #[test]
    fn test_commencement_as_inner_phrase() {
        let check = check_approval("ok then, go ahead and proceed with the migration");
        assert!(!check.suppress);
        assert!(check.commencement);
    }

    #[test]
    fn test_real_query_not_suppressed() {
        let check = check_approval("How do I create a new Epic?");
        assert!(!check.suppress);
        assert!(!check.commencement);
        assert_eq!(check.reason, "not_approval");
    }

    #[test]
    fn test_long_message_with_approval_words_not_suppressed() {
        let check =
            check_approval("yes I saw that but the deploy pipeline is still failing on main");
        assert!(!check.suppress);
    }
}
