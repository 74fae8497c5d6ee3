//! Frozen stable routing engine (`durian-0.5`).
//!
//! Preserved snapshot for A/B comparison and rollback. Includes violation
//! detection, approval suppression, foundational overlay, commencement
//! lookback, instruction bundles, and semantic flags — but none of the
//! later passes (procedural warning, friction, mistake, guidance).
//!
//! Frozen: no new features land here.

use crate::db::{events, Database};
use crate::engine::{
    extract_intent, extract_keywords, register_engine, EngineContext, FeatureSpec, RouteContext,
    RoutingEngine, RoutingResult, ScoredInstruction,
};
use crate::instructions::{Instruction, InstructionStore};
use crate::patterns::{
    bundle_partners, check_approval, detect_semantic_flags, detect_violations, SemanticFlags,
    ViolationInfo, VIOLATION_BOOST_CATEGORIES,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

/// Frozen version identifier - DO NOT CHANGE.
pub const DURIAN_VERSION: &str = "durian-0.5";

const FOUNDATIONAL_SCORE: i64 = 1000;
const COMMENCEMENT_LOOKBACK_BOOST: i64 = 15;

pub(crate) fn register() {
    register_engine(
        DURIAN_VERSION,
        |ctx| Box::new(Durian05Router::new(ctx)),
        available_features,
    );
}

fn available_features() -> Vec<FeatureSpec> {
    vec![
        FeatureSpec::new(
            "violation_detection",
            "Boost compliance routing on frustrated/corrective messages",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "approval_suppression",
            "Suppress routing for simple approval messages",
            true,
            "routing",
        ),
        FeatureSpec::new(
            "foundational",
            "Always-include foundational instructions (marked foundational: true)",
            true,
            "routing",
        ),
        FeatureSpec::new(
            "commencement_lookback",
            "Boost previous routing results on commencement messages",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "instruction_bundles",
            "Boost co-occurring instruction pairs",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "semantic_flags",
            "Boost categories based on message semantic flags",
            true,
            "scoring",
        ),
    ]
}

/// Frozen stable router.
pub struct Durian05Router {
    store: Arc<InstructionStore>,
    db: Option<Database>,
    features: BTreeMap<String, bool>,
}

impl Durian05Router {
    pub fn new(ctx: EngineContext) -> Self {
        info!("Durian05Router initialized (version: {DURIAN_VERSION})");
        Self {
            store: ctx.store,
            db: ctx.db,
            features: ctx.features,
        }
    }

    fn enabled(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(true)
    }

    fn route_inner(
        &self,
        message: &str,
        context: Option<&RouteContext>,
        limit: usize,
    ) -> RoutingResult {
        let mut commencement_detected = false;
        if self.enabled("approval_suppression") {
            let check = check_approval(message);
            if check.suppress {
                let mut analysis = Map::new();
                analysis.insert("suppressed".to_string(), Value::Bool(true));
                analysis.insert("reason".to_string(), Value::String(check.reason.to_string()));
                analysis.insert(
                    "message_preview".to_string(),
                    Value::String(message.chars().take(50).collect()),
                );
                return RoutingResult::empty(analysis);
            }
            commencement_detected = check.commencement;
        }

        let keywords = extract_keywords(message);
        let intent = extract_intent(message);

        let violation_info = if self.enabled("violation_detection") {
            detect_violations(message)
        } else {
            ViolationInfo::default()
        };
        let semantic_info = if self.enabled("semantic_flags") {
            detect_semantic_flags(message)
        } else {
            SemanticFlags::default()
        };

        let empty_context = RouteContext::default();
        let context = context.unwrap_or(&empty_context);

        let mut previous_routing_ids: HashSet<String> = HashSet::new();
        if commencement_detected && self.enabled("commencement_lookback") {
            let previous = context
                .previous_routing
                .clone()
                .or_else(|| self.db.as_ref().and_then(events::previous_routing));
            if let Some(ids) = previous {
                previous_routing_ids = ids.into_iter().collect();
            }
        }

        let mut scored: Vec<ScoredInstruction> = Vec::new();
        let mut scoring_breakdown = Vec::new();

        for instruction in self.store.iter() {
            let (mut score, mut breakdown) = score_instruction(
                instruction,
                &keywords,
                context,
                &violation_info,
                &semantic_info,
            );

            if !previous_routing_ids.is_empty()
                && previous_routing_ids.contains(&instruction.normalized_id())
            {
                score += COMMENCEMENT_LOOKBACK_BOOST;
                breakdown.insert(
                    "commencement_lookback".to_string(),
                    Value::from(COMMENCEMENT_LOOKBACK_BOOST),
                );
            }

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

        if self.enabled("instruction_bundles") {
            apply_bundle_boost(&mut scored);
        }

        scored.sort_by(|a, b| b.routing_score.cmp(&a.routing_score));

        let mut analysis = Map::new();
        analysis.insert("keywords_extracted".to_string(), json!(keywords));
        analysis.insert("intent_detected".to_string(), json!(intent));
        analysis.insert(
            "context_used".to_string(),
            serde_json::to_value(context).unwrap_or(Value::Null),
        );
        analysis.insert("features".to_string(), json!(self.features));
        analysis.insert(
            "commencement_override".to_string(),
            Value::Bool(commencement_detected),
        );
        analysis.insert("scoring_breakdown".to_string(), Value::Array(scoring_breakdown));

        let combined = if self.enabled("foundational") {
            let foundational: Vec<ScoredInstruction> = self
                .store
                .foundational()
                .into_iter()
                .map(|instruction| {
                    let mut breakdown = Map::new();
                    breakdown.insert("foundational".to_string(), Value::Bool(true));
                    ScoredInstruction {
                        instruction: instruction.clone(),
                        routing_score: FOUNDATIONAL_SCORE,
                        score_breakdown: breakdown,
                    }
                })
                .collect();
            let foundational_ids: HashSet<String> = foundational
                .iter()
                .map(|s| s.instruction.id.clone())
                .collect();

            let query_specific: Vec<ScoredInstruction> = scored
                .into_iter()
                .take(limit)
                .filter(|s| !foundational_ids.contains(&s.instruction.id))
                .collect();

            analysis.insert("foundational_count".to_string(), json!(foundational.len()));
            foundational.into_iter().chain(query_specific).collect()
        } else {
            scored.truncate(limit);
            analysis.insert("foundational_count".to_string(), json!(0));
            scored
        };

        RoutingResult {
            count: combined.len(),
            instructions: combined,
            routing_analysis: analysis,
            procedural_warning: None,
            guidance_action: None,
            friction_risk_watch: None,
            promoted_discoveries: None,
        }
    }
}

impl RoutingEngine for Durian05Router {
    fn version(&self) -> &'static str {
        DURIAN_VERSION
    }

    fn description(&self) -> &'static str {
        "Frozen stable rule-based routing (pre-procedural-warning snapshot)"
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
    violation: &ViolationInfo,
    semantic: &SemanticFlags,
) -> (i64, Map<String, Value>) {
    let mut score = 0;
    let mut breakdown = Map::new();

    if violation.detected
        && instruction
            .categories
            .iter()
            .any(|c| VIOLATION_BOOST_CATEGORIES.contains(&c.as_str()))
    {
        score += violation.boost_amount;
        breakdown.insert(
            "violation_boost".to_string(),
            json!({"boost": violation.boost_amount, "signals": violation.signals}),
        );
    }

    if semantic.detected {
        for category in &instruction.categories {
            if let Some(boost) = semantic.category_boosts.get(category) {
                score += boost;
            }
        }
    }

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

fn apply_bundle_boost(scored: &mut [ScoredInstruction]) {
    let present: HashSet<String> = scored
        .iter()
        .flat_map(|s| [s.instruction.id.clone(), s.instruction.normalized_id()])
        .collect();

    let mut boosts: Vec<(usize, i64, f64, String)> = Vec::new();
    for s in scored.iter() {
        for id_form in [s.instruction.id.clone(), s.instruction.normalized_id()] {
            let Some(partners) = bundle_partners(&id_form) else {
                continue;
            };
            for partner in partners {
                if !present.contains(partner.id) {
                    continue;
                }
                if let Some(idx) = scored.iter().position(|p| {
                    p.instruction.id == partner.id || p.instruction.normalized_id() == partner.id
                }) {
                    boosts.push((idx, partner.boost, partner.co_occurrence_rate, id_form.clone()));
                }
            }
            break;
        }
    }

    for (idx, boost, rate, from) in boosts {
        let partner = &mut scored[idx];
        partner.routing_score += boost;
        partner.score_breakdown.insert(
            "bundle_boost".to_string(),
            json!({"from": from, "boost": boost, "co_occurrence_rate": rate}),
        );
    }
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
            "---\nid: github/api_fix\ndescription: Fix GitHub API integrations\ntags: [github]\n---\nBody.\n",
        )
        .unwrap();

        let mut store = InstructionStore::new(dir.path(), None);
        store.load().unwrap();
        (dir, Arc::new(store))
    }

    fn engine(store: Arc<InstructionStore>) -> Durian05Router {
        let features = available_features()
            .into_iter()
            .map(|f| (f.name.to_string(), f.default))
            .collect();
        Durian05Router::new(EngineContext {
            store,
            db: None,
            features,
        })
    }

    #[test]
    fn test_version_frozen() {
        let (_dir, store) = store();
        assert_eq!(engine(store).version(), "durian-0.5");
    }

    #[test]
    fn test_suppression_still_active() {
        let (_dir, store) = store();
        let result = engine(store).route("Thanks!", None, 5);
        assert_eq!(result.count, 0);
        assert_eq!(
            result.routing_analysis.get("suppressed"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_no_later_pass_directives() {
        let (_dir, store) = store();
        // Procedural/friction/guidance passes do not exist in this snapshot.
        let result = engine(store).route(
            "always run the checklist workflow before you proceed, that's not right",
            None,
            5,
        );
        assert!(result.procedural_warning.is_none());
        assert!(result.guidance_action.is_none());
        assert!(result.friction_risk_watch.is_none());
    }

    #[test]
    fn test_keyword_routing() {
        let (_dir, store) = store();
        let result = engine(store).route("fix the github api", None, 5);
        assert_eq!(result.instructions[0].instruction.id, "github/api_fix");
    }
}
