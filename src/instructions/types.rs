//! Instruction record and routing metadata types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Routing metadata carried in instruction frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingMeta {
    #[serde(rename = "applyTo", alias = "apply_to")]
    pub apply_to: ApplyTo,
    pub triggers: Triggers,
    pub contextual: Contextual,
}

impl RoutingMeta {
    /// True when no routing hints are present.
    pub fn is_empty(&self) -> bool {
        self.apply_to.globs.is_empty()
            && self.triggers.keywords.is_empty()
            && self.triggers.nlp.is_empty()
            && self.contextual.files.is_empty()
            && self.contextual.branches.is_empty()
    }
}

/// Glob patterns an instruction applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyTo {
    pub globs: Vec<String>,
}

/// Keyword and NLP trigger hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Triggers {
    pub keywords: Vec<String>,
    /// Free-form trigger phrase; matched by keyword overlap.
    pub nlp: String,
}

/// Contextual file/branch patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contextual {
    pub files: Vec<String>,
    pub branches: Vec<String>,
}

/// A single loaded instruction file.
///
/// Field values are fully normalized at parse time: the directory-derived
/// category sits at index 0 of `categories`, `patterns` has been folded into
/// `tags`, `domains` into `categories`, and top-level `applies_to` into
/// `routing.applyTo.globs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub file_path: PathBuf,
    pub id: String,
    pub version: String,
    pub schema: String,
    pub description: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub routing: RoutingMeta,
    /// Markdown body with frontmatter stripped.
    pub body: String,
    /// Always prepended to routing results regardless of score.
    pub foundational: bool,
    /// Requires reading the file before acting on it.
    pub procedural: bool,
    /// Loaded from the bundled core tree; cannot be shadowed by user files.
    pub protected: bool,
    /// Opaque frontmatter keys preserved verbatim; never influences scoring.
    pub metadata: BTreeMap<String, serde_yaml::Value>,
}

impl Instruction {
    /// The file name (e.g. `issue_closure.instructions.md`), used by
    /// outcome-boost matching against preventive-instruction lists.
    pub fn file_name(&self) -> &str {
        self.file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Normalize to `category/name` form with any `.instructions` suffix
    /// stripped, the format used by lookback records and bundles.
    pub fn normalized_id(&self) -> String {
        let base = self
            .id
            .strip_suffix(".instructions")
            .unwrap_or(self.id.as_str());
        match self.categories.first() {
            Some(category) if !base.contains('/') => format!("{category}/{base}"),
            _ => base.to_string(),
        }
    }
}

/// Raw frontmatter shape before normalization. Unknown keys collect into
/// `extra` and survive in `Instruction::metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Frontmatter {
    pub id: Option<String>,
    pub version: Option<String>,
    pub schema: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub domains: Vec<String>,
    pub patterns: Vec<String>,
    pub applies_to: Vec<String>,
    pub routing: RoutingMeta,
    pub foundational: bool,
    pub procedural: bool,
    pub metadata: BTreeMap<String, serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_id_strips_suffix_and_prefixes_category() {
        let mut inst = sample();
        inst.id = "trust_based_task_execution.instructions".to_string();
        inst.categories = vec!["trust_execution".to_string()];
        assert_eq!(
            inst.normalized_id(),
            "trust_execution/trust_based_task_execution"
        );
    }

    #[test]
    fn test_normalized_id_keeps_explicit_path_form() {
        let mut inst = sample();
        inst.id = "github/api_fix".to_string();
        inst.categories = vec!["github".to_string()];
        assert_eq!(inst.normalized_id(), "github/api_fix");
    }

    #[test]
    fn test_normalized_id_without_category() {
        let mut inst = sample();
        inst.id = "docker_compose_patterns".to_string();
        inst.categories = vec![];
        assert_eq!(inst.normalized_id(), "docker_compose_patterns");
    }

    fn sample() -> Instruction {
        Instruction {
            file_path: PathBuf::from("x.instructions.md"),
            id: "x".to_string(),
            version: "1.0.0".to_string(),
            schema: "pongogo-instruction-v1".to_string(),
            description: String::new(),
            tags: vec![],
            categories: vec![],
            routing: RoutingMeta::default(),
            body: String::new(),
            foundational: false,
            procedural: false,
            protected: false,
            metadata: BTreeMap::new(),
        }
    }
}
