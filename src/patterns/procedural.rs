//! Procedural instruction detection.
//!
//! Procedural instructions must be read from disk before acting; executing
//! them from memory is the failure mode this detector guards against.

use crate::instructions::Instruction;
use regex::Regex;
use std::sync::LazyLock;

/// Minimum relevance score before a routed procedural instruction warrants a
/// warning. Foundational instructions always qualify.
pub const PROCEDURAL_WARNING_THRESHOLD: i64 = 50;

/// Content shapes that indicate procedural instructions.
static PROCEDURAL_CONTENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"compliance\s*gate",     // COMPLIANCE GATE sections
        r"step\s*\d+[:\s]",       // Step 1:, Step 2:
        r"phase\s*\d+[:\s]",      // Phase 1:, Phase 2:
        r"\[\s*\]\s+.*(?:\n.*)*", // Checklist items
        r"mandatory.*steps?",
        r"must.*read.*before",
        r"12-step|13-step|6-step",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("invalid regex"))
    .collect()
});

/// Description keywords that indicate procedural content.
const PROCEDURAL_KEYWORDS: &[&str] = &[
    "checklist",
    "step-by-step",
    "workflow",
    "process",
    "procedure",
    "systematic",
    "mandatory",
    "compliance",
    "12-step",
    "13-step",
    "verification",
    "validation checklist",
    "approval gate",
];

/// Extracts a referenced document from e.g. ``Read `docs/x_checklist.md` ``.
static READ_DOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[Rr]ead\s+[`"']?([^`"']+\.md)[`"']?"#).expect("invalid regex"));

/// Procedural detection outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProceduralInfo {
    pub is_procedural: bool,
    /// How it was detected (metadata_flag, compliance_gate, content_pattern,
    /// keyword:<kw>).
    pub detection_method: Option<String>,
    /// Document that must be read first, when the body names one.
    pub referenced_doc: Option<String>,
}

/// Detect whether an instruction is procedural.
pub fn detect_procedural(instruction: &Instruction) -> ProceduralInfo {
    // Method 1: explicit frontmatter flag
    if instruction.procedural {
        return ProceduralInfo {
            is_procedural: true,
            detection_method: Some("metadata_flag".to_string()),
            referenced_doc: None,
        };
    }

    // Method 2: compliance gate in body (strongest content signal); try to
    // pull the referenced checklist document out too.
    let body_lower = instruction.body.to_lowercase();
    if body_lower.contains("compliance gate") || body_lower.contains("compliance_gate") {
        let referenced_doc = READ_DOC_RE
            .captures(&instruction.body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        return ProceduralInfo {
            is_procedural: true,
            detection_method: Some("compliance_gate".to_string()),
            referenced_doc,
        };
    }

    // Method 3: content pattern match
    if PROCEDURAL_CONTENT_PATTERNS
        .iter()
        .any(|p| p.is_match(&instruction.body))
    {
        return ProceduralInfo {
            is_procedural: true,
            detection_method: Some("content_pattern".to_string()),
            referenced_doc: None,
        };
    }

    // Method 4: keywords in description
    let description_lower = instruction.description.to_lowercase();
    for keyword in PROCEDURAL_KEYWORDS {
        if description_lower.contains(keyword) {
            return ProceduralInfo {
                is_procedural: true,
                detection_method: Some(format!("keyword:{keyword}")),
                referenced_doc: None,
            };
        }
    }

    ProceduralInfo::default()
}
