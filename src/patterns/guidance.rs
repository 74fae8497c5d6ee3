//! User-guidance trigger detection.
//!
//! Detects when a user expresses a behavioural rule or preference that
//! should be captured before any other work happens.

use crate::patterns::clip;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static EXPLICIT_GUIDANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let patterns = [
        // Direct rule declarations
        r"always\s+(?:use|include|add|do|run|check)",
        r"never\s+(?:use|include|add|do|run|commit|push)",
        r"don'?t\s+(?:ever|use|include|add|do|run|commit)",
        r"from\s+now\s+on\s+(?:always|never|please|I\s+want)",
        r"going\s+forward\s+(?:always|never|please)",
        r"(?:as\s+a\s+)?rule,?\s+(?:always|never|I\s+want|we\s+should)",
        r"make\s+sure\s+(?:to\s+)?always",
        r"remember\s+to\s+always",
    ];
    Regex::new(&format!("(?i){}", patterns.join("|"))).expect("invalid regex")
});

static IMPLICIT_GUIDANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let patterns = [
        // Preference expressions
        r"I\s+(?:prefer|like|want|need)\s+(?:to\s+)?(?:use|have|see)",
        r"I'?d\s+(?:prefer|like|rather)\s+(?:if\s+)?(?:you|we|it)",
        r"(?:can|could)\s+you\s+(?:always|please\s+always)",
        // Style/format preferences
        r"(?:use|format|write|style)\s+(?:it\s+)?(?:like|as|this\s+way)",
        r"(?:the|my)\s+preferred\s+(?:way|style|format|approach)",
        r"(?:I|we)\s+usually\s+(?:do|use|write|format)",
        // Correction signals
        r"(?:no|not)\s+like\s+that",
        r"that'?s\s+not\s+(?:what|how)\s+I\s+(?:meant|wanted)",
        r"(?:actually|instead),?\s+(?:I\s+)?(?:prefer|want|need)",
        r"(?:please\s+)?(?:don'?t|do\s+not)\s+do\s+(?:it\s+)?that\s+(?:way|again)",
    ];
    Regex::new(&format!("(?i){}", patterns.join("|"))).expect("invalid regex")
});

/// Guidance taxonomy visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidanceKind {
    Explicit,
    Implicit,
}

impl GuidanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

/// A detected guidance trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidanceMatch {
    pub kind: GuidanceKind,
    /// The trigger snippet that fired.
    pub matched: String,
}

/// Detect guidance in a message. Explicit triggers take priority over
/// implicit ones.
pub fn detect_guidance(message: &str) -> Option<GuidanceMatch> {
    if let Some(m) = EXPLICIT_GUIDANCE_RE.find(message) {
        return Some(GuidanceMatch {
            kind: GuidanceKind::Explicit,
            matched: clip(m.as_str(), 60).to_string(),
        });
    }
    if let Some(m) = IMPLICIT_GUIDANCE_RE.find(message) {
        return Some(GuidanceMatch {
            kind: GuidanceKind::Implicit,
            matched: clip(m.as_str(), 60).to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_rule() {
        let m = detect_guidance("always run the linter before committing").unwrap();
        assert_eq!(m.kind, GuidanceKind::Explicit);
    }

    #[test]
    fn test_explicit_from_now_on() {
        let m = detect_guidance("from now on always squash merge").unwrap();
        assert_eq!(m.kind, GuidanceKind::Explicit);
    }

    #[test]
    fn test_implicit_preference() {
        let m = detect_guidance("I prefer to use tabs in this repo").unwrap();
        assert_eq!(m.kind, GuidanceKind::Implicit);
    }

    #[test]
    fn test_explicit_wins_over_implicit() {
        let m = detect_guidance("I prefer to use spaces, and never commit directly to main")
            .unwrap();
        assert_eq!(m.kind, GuidanceKind::Explicit);
    }

    #[test]
    fn test_no_guidance() {
        assert!(detect_guidance("what does the scheduler do?").is_none());
    }
}
