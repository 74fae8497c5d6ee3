//! Frozen baseline routing engine (`durian-00`).
//!
//! The original rule-based implementation: keyword, category, tag, glob,
//! and NLP-trigger scoring with no detection passes, no suppression, and no
//! foundational overlay. Kept as the comparison baseline; it declares no
//! configurable features.

use crate::engine::{
    extract_intent, extract_keywords, register_engine, EngineContext, FeatureSpec, RouteContext,
    RoutingEngine, RoutingResult, ScoredInstruction,
};
use crate::instructions::{Instruction, InstructionStore};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::error;

/// Frozen version identifier - DO NOT CHANGE.
pub const DURIAN_VERSION: &str = "durian-00";

pub(crate) fn register() {
    register_engine(
        DURIAN_VERSION,
        |ctx| Box::new(Durian00Router::new(ctx)),
        Vec::new,
    );
}

/// Baseline router.
pub struct Durian00Router {
    store: Arc<InstructionStore>,
    features: BTreeMap<String, bool>,
}

impl Durian00Router {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            store: ctx.store,
            features: ctx.features,
        }
    }

    fn route_inner(
        &self,
        message: &str,
        context: Option<&RouteContext>,
        limit: usize,
    ) -> RoutingResult {
        let keywords = extract_keywords(message);
        let intent = extract_intent(message);

        let empty_context = RouteContext::default();
        let context = context.unwrap_or(&empty_context);

        let mut scored: Vec<ScoredInstruction> = Vec::new();
        let mut scoring_breakdown = Vec::new();

        for instruction in self.store.iter() {
            let (score, breakdown) = score_instruction(instruction, &keywords, context);
            if score > 0 {
                scoring_breakdown.push(json!({
                    "instruction_id": instruction.id,
                    "score": score,
                    "breakdown": Value::Object(breakdown.clone()),
                }));
                scored.push(ScoredInstruction {
                    instruction: instruction.clone(),
                    routing_score: score,
                    score_breakdown: breakdown,
                });
            }
        }

        scored.sort_by(|a, b| b.routing_score.cmp(&a.routing_score));
        scored.truncate(limit);

        let mut analysis = Map::new();
        analysis.insert("keywords_extracted".to_string(), json!(keywords));
        analysis.insert("intent_detected".to_string(), json!(intent));
        analysis.insert(
            "context_used".to_string(),
            serde_json::to_value(context).unwrap_or(Value::Null),
        );
        analysis.insert("scoring_breakdown".to_string(), Value::Array(scoring_breakdown));

        RoutingResult {
            count: scored.len(),
            instructions: scored,
            routing_analysis: analysis,
            procedural_warning: None,
            guidance_action: None,
            friction_risk_watch: None,
            promoted_discoveries: None,
        }
    }
}

impl RoutingEngine for Durian00Router {
    fn version(&self) -> &'static str {
        DURIAN_VERSION
    }

    fn description(&self) -> &'static str {
        "Baseline rule-based routing with keyword matching, taxonomy, and glob patterns"
    }

    fn features(&self) -> &BTreeMap<String, bool> {
        &self.features
    }

    fn route(&self, message: &str, context: Option<&RouteContext>, limit: usize) -> RoutingResult {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.route_inner(message, context, limit)
        }));
        match outcome {
            Ok(result) => result,
            Err(_) => {
                error!("Internal error routing message");
                RoutingResult::error("internal routing error")
            }
        }
    }
}

fn score_instruction(
    instruction: &Instruction,
    keywords: &[String],
    context: &RouteContext,
) -> (i64, Map<String, Value>) {
    let mut score = 0;
    let mut breakdown = Map::new();

    let id_lower = instruction.id.to_lowercase();
    let description_lower = instruction.description.to_lowercase();
    let mut keyword_matches = Vec::new();
    for keyword in keywords {
        if id_lower.contains(keyword.as_str()) {
            score += 10;
            keyword_matches.push(format!("id:{keyword}"));
        }
        if description_lower.contains(keyword.as_str()) {
            score += 8;
            keyword_matches.push(format!("description:{keyword}"));
        }
        for tag in &instruction.tags {
            if tag.to_lowercase().contains(keyword.as_str()) {
                score += 5;
                keyword_matches.push(format!("tag:{tag}"));
            }
        }
        for meta_keyword in &instruction.routing.triggers.keywords {
            if meta_keyword.to_lowercase().contains(keyword.as_str()) {
                score += 10;
                keyword_matches.push(format!("metadata_keyword:{meta_keyword}"));
            }
        }
    }
    if !keyword_matches.is_empty() {
        breakdown.insert("keyword_matches".to_string(), json!(keyword_matches));
    }

    for category in &instruction.categories {
        let category_lower = category.to_lowercase();
        if keywords.iter().any(|kw| category_lower.contains(kw.as_str())) {
            score += 5;
        }
    }

    if !instruction.routing.triggers.nlp.is_empty() {
        let nlp_keywords: HashSet<String> =
            extract_keywords(&instruction.routing.triggers.nlp).into_iter().collect();
        let overlap = keywords.iter().filter(|kw| nlp_keywords.contains(kw.as_str())).count();
        if overlap > 0 {
            score += 8 * overlap as i64;
        }
    }

    let mut glob_matches = Vec::new();
    for file in &context.files {
        for pattern in &instruction.routing.apply_to.globs {
            let matched = glob::Pattern::new(pattern)
                .map(|p| p.matches(file))
                .unwrap_or(false);
            if matched {
                score += 7;
                glob_matches.push(format!("{file} matches {pattern}"));
            }
        }
    }
    if !glob_matches.is_empty() {
        breakdown.insert("glob_matches".to_string(), json!(glob_matches));
    }

    for tag in &instruction.tags {
        let tag_lower = tag.to_lowercase();
        if keywords.iter().any(|kw| tag_lower.contains(kw.as_str())) {
            score += 3;
        }
    }

    breakdown.insert("total_score".to_string(), Value::from(score));
    (score, breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store() -> (TempDir, Arc<InstructionStore>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("github").join("api_fix.instructions.md");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            "---\nid: github/api_fix\ndescription: Fix GitHub API integrations\ntags: [github, api]\nfoundational: true\n---\nBody.\n",
        )
        .unwrap();

        let mut store = InstructionStore::new(dir.path(), None);
        store.load().unwrap();
        (dir, Arc::new(store))
    }

    fn engine(store: Arc<InstructionStore>) -> Durian00Router {
        Durian00Router::new(EngineContext {
            store,
            db: None,
            features: BTreeMap::new(),
        })
    }

    #[test]
    fn test_keyword_routing() {
        let (_dir, store) = store();
        let result = engine(store).route("fix the github api", None, 5);
        assert_eq!(result.count, 1);
        assert_eq!(result.instructions[0].instruction.id, "github/api_fix");
    }

    #[test]
    fn test_no_suppression_in_baseline() {
        let (_dir, store) = store();
        let result = engine(store).route("Thanks!", None, 5);
        // Baseline routes every message; an approval just scores nothing.
        assert!(result.routing_analysis.get("suppressed").is_none());
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_no_foundational_overlay() {
        let (_dir, store) = store();
        let result = engine(store).route("unrelated query text", None, 5);
        // foundational: true has no effect in the baseline.
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_limit_applies() {
        let (_dir, store) = store();
        let result = engine(store).route("fix the github api", None, 0);
        assert_eq!(result.count, 0);
    }
}
