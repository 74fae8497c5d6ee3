//! Routing request/response shapes shared by all engine versions.

use crate::instructions::Instruction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Contextual signals accompanying a routing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteContext {
    /// File paths in the caller's working context.
    pub files: Vec<String>,
    /// Directory paths in the caller's working context.
    pub directories: Vec<String>,
    /// Current git branch.
    pub branch: String,
    /// Programming language hint.
    pub language: String,
    /// Session identifier for event correlation.
    pub session_id: Option<String>,
    /// Explicit previous routing ids; wins over the event-log lookback.
    pub previous_routing: Option<Vec<String>>,
    /// Caller opts into the friction-risk watch attachment.
    pub friction_monitoring: bool,
}

/// One instruction in a routing result, with its score and the per-signal
/// breakdown that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredInstruction {
    #[serde(flatten)]
    pub instruction: Instruction,
    pub routing_score: i64,
    pub score_breakdown: Map<String, Value>,
}

/// Blocking directive: the caller must invoke the named tool before other
/// work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceAction {
    /// Tool to invoke (e.g. `log_user_guidance`).
    pub action: String,
    pub directive: String,
    pub parameters: GuidanceParameters,
    pub rationale: String,
}

/// Parameters the guidance-capture tool should receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceParameters {
    /// The full user message carrying the guidance.
    pub content: String,
    /// `explicit` or `implicit`.
    pub guidance_type: String,
    /// The trigger snippet that fired.
    pub context: String,
}

/// Advisory: procedural instructions were routed and must be read from disk
/// before acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralWarning {
    pub warning: String,
    pub instructions: Vec<ProceduralItem>,
    pub count: usize,
    pub enforcement: String,
}

/// One procedural instruction flagged in a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralItem {
    pub id: String,
    pub score: i64,
    pub detection_method: String,
    pub referenced_doc: Option<String>,
}

/// Friction-risk monitoring attachment, emitted when the caller enables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionRiskWatch {
    pub enabled: bool,
    pub guidance_type: String,
    pub echo_detected: bool,
    /// none / elevated / high, derived from violation signal density.
    pub frustration_level: String,
}

/// A discovery auto-promoted during routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedDiscovery {
    pub discovery_id: i64,
    pub source_file: String,
    pub section_title: Option<String>,
    pub instruction_file: String,
    pub message: String,
}

/// The result of one routing invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    pub instructions: Vec<ScoredInstruction>,
    pub count: usize,
    pub routing_analysis: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedural_warning: Option<ProceduralWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_action: Option<GuidanceAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friction_risk_watch: Option<FrictionRiskWatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_discoveries: Option<Vec<PromotedDiscovery>>,
}

impl RoutingResult {
    /// An empty result with the given analysis map.
    pub fn empty(routing_analysis: Map<String, Value>) -> Self {
        Self {
            instructions: Vec::new(),
            count: 0,
            routing_analysis,
            procedural_warning: None,
            guidance_action: None,
            friction_risk_watch: None,
            promoted_discoveries: None,
        }
    }

    /// An empty result whose analysis carries only an error string.
    pub fn error(message: impl Into<String>) -> Self {
        let mut analysis = Map::new();
        analysis.insert("error".to_string(), Value::String(message.into()));
        Self::empty(analysis)
    }

    /// Routed instruction ids, in result order.
    pub fn instruction_ids(&self) -> Vec<String> {
        self.instructions
            .iter()
            .map(|s| s.instruction.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_context_from_json() {
        let context: RouteContext = serde_json::from_value(serde_json::json!({
            "files": ["src/github/api.py"],
            "language": "python"
        }))
        .unwrap();
        assert_eq!(context.files, vec!["src/github/api.py"]);
        assert_eq!(context.language, "python");
        assert!(context.branch.is_empty());
        assert!(!context.friction_monitoring);
    }

    #[test]
    fn test_error_result_shape() {
        let result = RoutingResult::error("boom");
        assert_eq!(result.count, 0);
        assert_eq!(
            result.routing_analysis.get("error").unwrap().as_str(),
            Some("boom")
        );
    }
}
