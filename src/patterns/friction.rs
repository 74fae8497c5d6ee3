//! Friction detection: correction, retry, and rejection signals.
//!
//! These patterns are more specific than the "corrective" semantic flag;
//! they capture the user actively pushing back on prior work.

use crate::patterns::clip;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Boost applied once per instruction when friction is detected.
pub const FRICTION_BOOST_AMOUNT: i64 = 20;

/// Categories boosted on friction.
pub const FRICTION_BOOST_CATEGORIES: &[&str] = &[
    "trust_execution",
    "learning",
    "safety_prevention",
    "development_standards",
];

/// Priority order: rejection > retry > correction. The first matching type
/// wins; later types still contribute signals.
const FRICTION_TYPES: &[&str] = &["rejection", "retry", "correction"];

fn compile(patterns: &[&str]) -> Regex {
    Regex::new(&format!("(?i){}", patterns.join("|"))).expect("invalid regex")
}

static REJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&[
        // Strong rejection markers
        r"^no!+",
        r"\bno!{2,}",
        r"\bunacceptable\b",
        r"completely\s+unacceptable",
        r"this\s+is\s+completely",
        r"(lost|losing)\s+confidence",
        // Failure declaration
        r"consider\s+this\s+a\s+failure",
        r"this\s+is\s+a\s+failure",
        r"this\s+has\s+failed",
        // Reset/revert commands
        r"\brevert\b",
        r"start\s+(again|over)",
        r"delete\s+all",
        r"fully\s+delete",
        r"undo\s+(everything|all)",
    ])
});

static RETRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&[
        // Context reset indicators
        r"since\s+i'?ve?\s+(exited|re-?entered)",
        r"cleared\s+the\s+context",
        r"context\s+window\s+(reset|cleared)",
        r"let'?s\s+try\s+again",
        r"let'?s\s+retry",
    ])
});

static CORRECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&[
        // Explicit correction phrases
        r"not\s+good\s+enough",
        r"cutting\s+corners",
        r"against\s+our\s+(goal|broader)",
        r"please\s+remember",
        r"we'?ve\s+been\s+over\s+this",
        r"you\s+(should|need\s+to)\s+undo",
        r"you'?re\s+again",
        r"you\s+had\s+put.*wrong",
        r"that'?s?\s+not\s+(right|correct|what)",
        r"it\s+was\s+meant\s+to\s+be",
        r"you'?re\s+overcomplicating",
        r"don'?t\s+overcomplicate",
        r"i'?m\s+not\s+sure\s+(that\s+)?you\s+did",
        r"you\s+did\s+it\s+(in\s+)?reverse",
        r"you\s+did\s+it\s+wrong",
        r"we\s+already\s+(broke|did|have|completed)",
        // Priority/behavior correction
        r"is\s+not\s+the\s+priority",
        r"focusing\s+on.*is\s+not",
        r"don'?t\s+focus\s+on",
    ])
});

fn regex_for(friction_type: &str) -> &'static Regex {
    match friction_type {
        "rejection" => &REJECTION_RE,
        "retry" => &RETRY_RE,
        _ => &CORRECTION_RE,
    }
}

/// Friction detection outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrictionInfo {
    pub detected: bool,
    /// Highest-priority matched type (rejection/retry/correction).
    pub friction_type: Option<&'static str>,
    pub signals: Vec<String>,
    /// Boosts per category, populated only when a type matched.
    pub category_boosts: BTreeMap<String, i64>,
}

/// Detect friction in a message.
pub fn detect_friction(message: &str) -> FrictionInfo {
    let mut signals = Vec::new();
    let mut friction_type = None;

    for ftype in FRICTION_TYPES {
        if let Some(m) = regex_for(ftype).find(message) {
            signals.push(format!("{ftype}:{}", clip(m.as_str(), 20)));
            if friction_type.is_none() {
                friction_type = Some(*ftype);
            }
        }
    }

    let mut category_boosts = BTreeMap::new();
    if friction_type.is_some() {
        for category in FRICTION_BOOST_CATEGORIES {
            category_boosts.insert((*category).to_string(), FRICTION_BOOST_AMOUNT);
        }
    }

    FrictionInfo {
        detected: !signals.is_empty(),
        friction_type,
        signals,
        category_boosts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction() {
        let info = detect_friction("that's not right, the handler goes in events");
        assert!(info.detected);
        assert_eq!(info.friction_type, Some("correction"));
    }

    #[test]
    fn test_retry() {
        let info = detect_friction("since I've exited and cleared the context, let's try again");
        assert_eq!(info.friction_type, Some("retry"));
    }

    #[test]
    fn test_rejection_priority_over_correction() {
        // "unacceptable" (rejection) + "not good enough" (correction):
        // rejection wins the type, both contribute signals.
        let info = detect_friction("unacceptable, this is not good enough");
        assert_eq!(info.friction_type, Some("rejection"));
        assert_eq!(info.signals.len(), 2);
    }

    #[test]
    fn test_category_boosts_populated() {
        let info = detect_friction("revert everything");
        assert_eq!(info.category_boosts.len(), 4);
        assert_eq!(info.category_boosts.get("learning"), Some(&20));
    }

    #[test]
    fn test_no_friction() {
        let info = detect_friction("add a unit test for the parser");
        assert!(!info.detected);
        assert!(info.friction_type.is_none());
        assert!(info.category_boosts.is_empty());
    }
}
