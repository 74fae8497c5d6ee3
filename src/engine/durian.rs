//! The canonical routing engine (`durian-0.6.2`).
//!
//! Scoring components:
//! - Keywords: +10 in id, +8 in description, +5 in tags, +10 in routing
//!   metadata keywords
//! - Categories: +5 per keyword/category match
//! - NLP triggers: +8 per overlap word
//! - Globs: +7 per (file, pattern) hit
//! - Contextual file/branch patterns: +5 per match
//! - Tags: +3 per tag containing a keyword
//!
//! plus the detection-pass boosts (violation, semantic flags, friction,
//! mistake outcome, commencement lookback, bundles), the foundational
//! overlay, procedural warnings, and guidance capture.

use crate::db::{events, triggers, Database, TriggerType};
use crate::engine::{
    extract_intent, extract_keywords, register_engine, EngineContext, FeatureSpec,
    FrictionRiskWatch, GuidanceAction, GuidanceParameters, ProceduralItem, ProceduralWarning,
    RouteContext, RoutingEngine, RoutingResult, ScoredInstruction,
};
use crate::instructions::{Instruction, InstructionStore};
use crate::patterns::{
    bundle_partners, check_approval, detect_friction, detect_guidance, detect_mistake,
    detect_procedural, detect_semantic_flags, detect_violations, FrictionInfo, GuidanceKind,
    MistakeInfo, SemanticFlags, ViolationInfo, FRICTION_BOOST_AMOUNT, FRICTION_BOOST_CATEGORIES,
    OUTCOME_BOOST_AMOUNT, PROCEDURAL_WARNING_THRESHOLD, VIOLATION_BOOST_CATEGORIES,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Single source of truth for this engine's version.
pub const DURIAN_VERSION: &str = "durian-0.6.2";

/// Synthetic score ensuring foundational instructions sort first.
const FOUNDATIONAL_SCORE: i64 = 1000;

/// Boost for instructions routed in the previous event when commencement is
/// detected.
const COMMENCEMENT_LOOKBACK_BOOST: i64 = 15;

/// Register this engine version with the process-wide registry.
pub(crate) fn register() {
    register_engine(
        DURIAN_VERSION,
        |ctx| Box::new(DurianRouter::new(ctx)),
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
            "Boost categories based on message semantic flags (corrective, directive, ...)",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "procedural_warning",
            "Warn when procedural instructions are routed (read before executing)",
            true,
            "compliance",
        ),
        FeatureSpec::new(
            "iteration_aware",
            "Detect friction (correction/retry/rejection)",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "friction_boost",
            "Boost trust/learning/safety categories when friction detected",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "outcome_aware",
            "Detect mistake types (incomplete_implementation, premature_action, ...)",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "outcome_boost",
            "Boost specific preventive instructions when a mistake type is detected",
            true,
            "scoring",
        ),
        FeatureSpec::new(
            "guidance_detection",
            "Detect user guidance and attach a blocking capture directive",
            true,
            "compliance",
        ),
    ]
}

/// Rule-based router with all detection passes.
pub struct DurianRouter {
    store: Arc<InstructionStore>,
    db: Option<Database>,
    features: BTreeMap<String, bool>,
}

impl DurianRouter {
    pub fn new(ctx: EngineContext) -> Self {
        let feature_str: Vec<String> = ctx
            .features
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        info!(
            "DurianRouter initialized (version: {DURIAN_VERSION}, features: {})",
            feature_str.join(", ")
        );
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
        // Early exit for simple approval messages; commencement phrases
        // override suppression (work intent detected).
        let mut commencement_detected = false;
        if self.enabled("approval_suppression") {
            let check = check_approval(message);
            if check.suppress {
                let mut analysis = Map::new();
                analysis.insert("suppressed".to_string(), Value::Bool(true));
                analysis.insert("reason".to_string(), Value::String(check.reason.to_string()));
                analysis.insert("commencement_detected".to_string(), Value::Bool(false));
                analysis.insert(
                    "message_preview".to_string(),
                    Value::String(preview(message, 50)),
                );
                return RoutingResult::empty(analysis);
            }
            if check.commencement {
                info!("Commencement pattern overrode approval suppression: {}", preview(message, 50));
                commencement_detected = true;
            }
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
        let friction_info = if self.enabled("iteration_aware") {
            detect_friction(message)
        } else {
            FrictionInfo::default()
        };
        let mistake_info = if self.enabled("outcome_aware") {
            detect_mistake(message)
        } else {
            MistakeInfo::default()
        };
        let guidance_match = if self.enabled("guidance_detection") {
            detect_guidance(message)
        } else {
            None
        };

        let empty_context = RouteContext::default();
        let context = context.unwrap_or(&empty_context);

        // Commencement look-back for context continuity.
        let mut previous_routing_ids: HashSet<String> = HashSet::new();
        let mut lookback_info: Option<Value> = None;
        if commencement_detected {
            if self.enabled("commencement_lookback") {
                let previous = context
                    .previous_routing
                    .clone()
                    .or_else(|| self.db.as_ref().and_then(events::previous_routing));
                match previous {
                    Some(ids) if !ids.is_empty() => {
                        info!(
                            "Boosting {} instructions from previous routing",
                            ids.len()
                        );
                        previous_routing_ids = ids.into_iter().collect();
                        lookback_info = Some(json!({
                            "enabled": true,
                            "found": true,
                            "instruction_count": previous_routing_ids.len(),
                            "boost_amount": COMMENCEMENT_LOOKBACK_BOOST,
                        }));
                    }
                    _ => lookback_info = Some(json!({"enabled": true, "found": false})),
                }
            } else {
                lookback_info = Some(json!({"enabled": false, "reason": "feature_disabled"}));
            }
        }

        // Score every loaded instruction.
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
                debug!(
                    "Lookback boost for {} (+{COMMENCEMENT_LOOKBACK_BOOST})",
                    instruction.id
                );
            }

            // Friction boost, once per instruction.
            if friction_info.detected && self.enabled("friction_boost") {
                if let Some(category) = instruction
                    .categories
                    .iter()
                    .find(|c| FRICTION_BOOST_CATEGORIES.contains(&c.as_str()))
                {
                    score += FRICTION_BOOST_AMOUNT;
                    breakdown.insert(
                        "friction_boost".to_string(),
                        json!({
                            "category": category,
                            "boost": FRICTION_BOOST_AMOUNT,
                            "friction_type": friction_info.friction_type,
                        }),
                    );
                }
            }

            // Outcome boost for preventive instructions, once per instruction.
            if mistake_info.detected && self.enabled("outcome_boost") {
                let file_name = instruction.file_name();
                if let Some(preventive) = mistake_info.instruction_boosts.iter().find(|p| {
                    !file_name.is_empty() && (p.contains(file_name) || file_name.contains(*p))
                }) {
                    score += OUTCOME_BOOST_AMOUNT;
                    breakdown.insert(
                        "outcome_boost".to_string(),
                        json!({
                            "instruction": preventive,
                            "boost": OUTCOME_BOOST_AMOUNT,
                            "mistake_type": mistake_info.mistake_type,
                        }),
                    );
                }
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

        // Bundle boost for co-occurring pairs among the retained set.
        let bundle_info = if self.enabled("instruction_bundles") {
            apply_bundle_boost(&mut scored)
        } else {
            None
        };

        // Rank by score descending; ties keep store order (stable sort).
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
            "violation_detection".to_string(),
            if violation_info.detected {
                json!({
                    "detected": true,
                    "signals": violation_info.signals,
                    "boost_amount": violation_info.boost_amount,
                })
            } else {
                Value::Null
            },
        );
        analysis.insert(
            "semantic_flags".to_string(),
            if semantic_info.detected {
                json!({
                    "detected": true,
                    "flags": semantic_info.flags,
                    "category_boosts": semantic_info.category_boosts,
                })
            } else {
                Value::Null
            },
        );
        analysis.insert(
            "friction_detection".to_string(),
            if friction_info.detected {
                json!({
                    "detected": true,
                    "friction_type": friction_info.friction_type,
                    "signals": friction_info.signals,
                })
            } else {
                Value::Null
            },
        );
        analysis.insert(
            "mistake_detection".to_string(),
            if mistake_info.detected {
                json!({
                    "detected": true,
                    "mistake_type": mistake_info.mistake_type,
                    "signals": mistake_info.signals,
                    "instruction_boosts": mistake_info.instruction_boosts,
                })
            } else {
                Value::Null
            },
        );
        analysis.insert(
            "guidance_detection".to_string(),
            match &guidance_match {
                Some(m) => json!({
                    "detected": true,
                    "guidance_type": m.kind.as_str(),
                    "trigger": m.matched,
                }),
                None => Value::Null,
            },
        );
        analysis.insert(
            "commencement_override".to_string(),
            if self.enabled("approval_suppression") {
                Value::Bool(commencement_detected)
            } else {
                Value::Null
            },
        );
        analysis.insert(
            "commencement_lookback".to_string(),
            lookback_info.unwrap_or(Value::Null),
        );
        analysis.insert("scoring_breakdown".to_string(), Value::Array(scoring_breakdown));
        if let Some(info) = bundle_info {
            analysis.insert("bundle_boost".to_string(), info);
        }

        // Foundational overlay: always-included, never counted against limit.
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
            analysis.insert("foundational_ids".to_string(), json!(foundational_ids));
            analysis.insert("query_specific_count".to_string(), json!(query_specific.len()));

            foundational.into_iter().chain(query_specific).collect()
        } else {
            scored.truncate(limit);
            analysis.insert("foundational_count".to_string(), json!(0));
            analysis.insert("foundational_ids".to_string(), Value::Array(Vec::new()));
            analysis.insert("foundational_disabled".to_string(), Value::Bool(true));
            analysis.insert("query_specific_count".to_string(), json!(scored.len()));
            scored
        };

        // Procedural warning over the final list.
        let procedural_warning = if self.enabled("procedural_warning") {
            self.build_procedural_warning(&combined)
        } else {
            None
        };
        if let Some(warning) = &procedural_warning {
            analysis.insert(
                "procedural_warning".to_string(),
                serde_json::to_value(warning).unwrap_or(Value::Null),
            );
        }

        let guidance_action = guidance_match.as_ref().map(|m| build_guidance_action(message, m));
        let friction_risk_watch = if context.friction_monitoring {
            Some(self.build_friction_risk_watch(&guidance_match, &violation_info))
        } else {
            None
        };

        RoutingResult {
            count: combined.len(),
            instructions: combined,
            routing_analysis: analysis,
            procedural_warning,
            guidance_action,
            friction_risk_watch,
            promoted_discoveries: None,
        }
    }

    fn build_procedural_warning(
        &self,
        combined: &[ScoredInstruction],
    ) -> Option<ProceduralWarning> {
        let mut items = Vec::new();
        for scored in combined {
            let Some(instruction) = self.store.get_by_id(&scored.instruction.id) else {
                continue;
            };
            let info = detect_procedural(instruction);
            if !info.is_procedural {
                continue;
            }
            let is_foundational = scored.score_breakdown.contains_key("foundational");
            if scored.routing_score >= PROCEDURAL_WARNING_THRESHOLD || is_foundational {
                items.push(ProceduralItem {
                    id: scored.instruction.id.clone(),
                    score: scored.routing_score,
                    detection_method: info.detection_method.unwrap_or_default(),
                    referenced_doc: info.referenced_doc,
                });
            }
        }

        if items.is_empty() {
            return None;
        }

        let mut lines = vec!["⚠️ PROCEDURAL INSTRUCTION(S) ROUTED - READ BEFORE EXECUTING:".to_string()];
        for item in &items {
            match &item.referenced_doc {
                Some(doc) => lines.push(format!("  • {}: Read `{doc}` first", item.id)),
                None => lines.push(format!(
                    "  • {}: Read instruction file before executing",
                    item.id
                )),
            }
        }

        info!("Procedural warning generated for {} instruction(s)", items.len());
        Some(ProceduralWarning {
            warning: lines.join("\n"),
            count: items.len(),
            instructions: items,
            enforcement: "Read tool call required before action".to_string(),
        })
    }

    fn build_friction_risk_watch(
        &self,
        guidance: &Option<crate::patterns::GuidanceMatch>,
        violation: &ViolationInfo,
    ) -> FrictionRiskWatch {
        let echo_detected = match (guidance, &self.db) {
            (Some(m), Some(db)) => {
                let trigger_type = match m.kind {
                    GuidanceKind::Explicit => TriggerType::GuidanceExplicit,
                    GuidanceKind::Implicit => TriggerType::GuidanceImplicit,
                };
                triggers::trigger_exists(db, trigger_type, &m.matched)
            }
            _ => false,
        };

        FrictionRiskWatch {
            enabled: true,
            guidance_type: guidance
                .as_ref()
                .map(|m| m.kind.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
            echo_detected,
            frustration_level: match violation.signals.len() {
                0 => "none",
                1 | 2 => "elevated",
                _ => "high",
            }
            .to_string(),
        }
    }
}

impl RoutingEngine for DurianRouter {
    fn version(&self) -> &'static str {
        DURIAN_VERSION
    }

    fn description(&self) -> &'static str {
        "Rule-based routing with keyword matching, taxonomy, and context heuristics"
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

/// Score one instruction against the extracted signals. Returns the score
/// and its per-signal breakdown.
fn score_instruction(
    instruction: &Instruction,
    keywords: &[String],
    context: &RouteContext,
    violation: &ViolationInfo,
    semantic: &SemanticFlags,
) -> (i64, Map<String, Value>) {
    let mut score = 0;
    let mut breakdown = Map::new();

    // Violation boost for compliance categories, once per instruction.
    if violation.detected {
        if let Some(category) = instruction
            .categories
            .iter()
            .find(|c| VIOLATION_BOOST_CATEGORIES.contains(&c.as_str()))
        {
            score += violation.boost_amount;
            breakdown.insert(
                "violation_boost".to_string(),
                json!({
                    "category": category,
                    "boost": violation.boost_amount,
                    "signals": violation.signals,
                }),
            );
        }
    }

    // Semantic flag boosts, accumulated per matching category.
    if semantic.detected {
        let mut flag_boosts = Vec::new();
        for category in &instruction.categories {
            if let Some(boost) = semantic.category_boosts.get(category) {
                score += boost;
                flag_boosts.push(json!({
                    "category": category,
                    "boost": boost,
                    "flags": semantic.flags,
                }));
            }
        }
        if !flag_boosts.is_empty() {
            breakdown.insert("semantic_flag_boost".to_string(), Value::Array(flag_boosts));
        }
    }

    // Keyword matching.
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

    // Category matching.
    let category_matches: Vec<&String> = instruction
        .categories
        .iter()
        .filter(|category| {
            let category_lower = category.to_lowercase();
            keywords.iter().any(|kw| category_lower.contains(kw.as_str()))
        })
        .collect();
    score += 5 * category_matches.len() as i64;
    if !category_matches.is_empty() {
        breakdown.insert("category_matches".to_string(), json!(category_matches));
    }

    // NLP trigger matching by keyword overlap.
    if !instruction.routing.triggers.nlp.is_empty() {
        let nlp_keywords: HashSet<String> =
            extract_keywords(&instruction.routing.triggers.nlp).into_iter().collect();
        let overlap: Vec<&String> =
            keywords.iter().filter(|kw| nlp_keywords.contains(kw.as_str())).collect();
        if !overlap.is_empty() {
            score += 8 * overlap.len() as i64;
            breakdown.insert("nlp_trigger_match".to_string(), json!(overlap));
        }
    }

    // Glob/path matching.
    let mut glob_matches = Vec::new();
    for file in &context.files {
        for pattern in &instruction.routing.apply_to.globs {
            if glob_match(file, pattern) {
                score += 7;
                glob_matches.push(format!("{file} matches {pattern}"));
            }
        }
    }
    if !glob_matches.is_empty() {
        breakdown.insert("glob_matches".to_string(), json!(glob_matches));
    }

    // Contextual file/branch matching.
    let mut contextual_matches = Vec::new();
    for file in &context.files {
        for pattern in &instruction.routing.contextual.files {
            if glob_match(file, pattern) {
                score += 5;
                contextual_matches.push(format!("file_context:{file}"));
            }
        }
    }
    for pattern in &instruction.routing.contextual.branches {
        if !context.branch.is_empty() && glob_match(&context.branch, pattern) {
            score += 5;
            contextual_matches.push(format!("branch_context:{}", context.branch));
        }
    }
    if !contextual_matches.is_empty() {
        breakdown.insert("contextual_matches".to_string(), json!(contextual_matches));
    }

    // Tag matching.
    let tag_matches: Vec<&String> = instruction
        .tags
        .iter()
        .filter(|tag| {
            let tag_lower = tag.to_lowercase();
            keywords.iter().any(|kw| tag_lower.contains(kw.as_str()))
        })
        .collect();
    score += 3 * tag_matches.len() as i64;
    if !tag_matches.is_empty() {
        breakdown.insert("tag_matches".to_string(), json!(tag_matches));
    }

    breakdown.insert("total_score".to_string(), Value::from(score));
    (score, breakdown)
}

fn glob_match(path: &str, pattern: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(path))
        .unwrap_or(false)
}

/// Apply bundle boosts among the retained instructions. Returns the analysis
/// record when any boost was applied.
fn apply_bundle_boost(scored: &mut [ScoredInstruction]) -> Option<Value> {
    // All id forms present in the result set.
    let mut present: HashSet<String> = HashSet::new();
    for s in scored.iter() {
        present.insert(s.instruction.id.clone());
        present.insert(s.instruction.normalized_id());
        if let Some(stripped) = s.instruction.id.strip_suffix(".instructions") {
            present.insert(stripped.to_string());
        }
    }

    // Collect (partner index, boost, rate, trigger id) first; mutate after.
    let mut boosts: Vec<(usize, i64, f64, String, String)> = Vec::new();
    for s in scored.iter() {
        let mut ids_to_check = vec![s.instruction.id.clone(), s.instruction.normalized_id()];
        if let Some(stripped) = s.instruction.id.strip_suffix(".instructions") {
            ids_to_check.push(stripped.to_string());
            if let Some(category) = s.instruction.categories.first() {
                ids_to_check.push(format!("{category}/{stripped}"));
            }
        }
        ids_to_check.dedup();

        for id_form in ids_to_check {
            let Some(partners) = bundle_partners(&id_form) else {
                continue;
            };
            for partner in partners {
                if !present.contains(partner.id) {
                    continue;
                }
                if let Some(partner_idx) = scored.iter().position(|p| {
                    p.instruction.id == partner.id || p.instruction.normalized_id() == partner.id
                }) {
                    boosts.push((
                        partner_idx,
                        partner.boost,
                        partner.co_occurrence_rate,
                        id_form.clone(),
                        partner.id.to_string(),
                    ));
                }
            }
            break; // First matching id form wins.
        }
    }

    if boosts.is_empty() {
        return None;
    }

    let mut applied = Vec::new();
    for (idx, boost, rate, from, boosted) in boosts {
        let partner = &mut scored[idx];
        partner.routing_score += boost;
        partner.score_breakdown.insert(
            "bundle_boost".to_string(),
            json!({
                "from": from,
                "boost": boost,
                "co_occurrence_rate": rate,
            }),
        );
        applied.push(json!({
            "trigger": from,
            "boosted": boosted,
            "amount": boost,
        }));
    }

    Some(json!({
        "applied": true,
        "total_boosts": applied.len(),
        "boosts": applied,
    }))
}

fn build_guidance_action(message: &str, m: &crate::patterns::GuidanceMatch) -> GuidanceAction {
    GuidanceAction {
        action: "log_user_guidance".to_string(),
        directive: format!(
            "Call log_user_guidance() to capture this {} guidance before any other work",
            m.kind.as_str()
        ),
        parameters: GuidanceParameters {
            content: message.to_string(),
            guidance_type: m.kind.as_str().to_string(),
            context: m.matched.clone(),
        },
        rationale: "User guidance that is not captured is lost; the user will repeat themselves"
            .to_string(),
    }
}

/// First `max` characters of a message, for log/analysis previews.
fn preview(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, RoutingEventRecord};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_instruction(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Seed fixture mirroring a small knowledge base.
    fn fixture_store() -> (TempDir, Arc<InstructionStore>) {
        let dir = TempDir::new().unwrap();
        write_instruction(
            dir.path(),
            "github/api_fix.instructions.md",
            "---\nid: github/api_fix\ndescription: Fix GitHub API integrations\ntags: [github, api]\nrouting:\n  applyTo:\n    globs: ['**/github/*.py']\n---\nUse the typed client.\n",
        );
        write_instruction(
            dir.path(),
            "trust_execution/development_workflow_essentials.instructions.md",
            "---\nid: trust_execution/development_workflow_essentials\ndescription: Development workflow essentials\ntags: [workflow, development]\n---\nWorkflow body.\n",
        );
        write_instruction(
            dir.path(),
            "trust_execution/trust_based_task_execution.instructions.md",
            "---\nid: trust_execution/trust_based_task_execution\ndescription: Trust based task execution workflow\ntags: [workflow, trust]\n---\nTrust body.\n",
        );
        write_instruction(
            dir.path(),
            "core/base.instructions.md",
            "---\nid: core/base\ndescription: Core baseline context\nfoundational: true\n---\nAlways-on context.\n",
        );
        write_instruction(
            dir.path(),
            "project_management/issue_closure.instructions.md",
            "---\nid: project_management/issue_closure\ndescription: Issue closure checklist\nrouting:\n  triggers:\n    keywords: [closure, checklist, close]\n---\n## COMPLIANCE GATE\nRead `docs/templates/issue_closure_checklist.md` before closing.\n",
        );

        let mut store = InstructionStore::new(dir.path(), None);
        store.load().unwrap();
        (dir, Arc::new(store))
    }

    fn engine(store: Arc<InstructionStore>, db: Option<Database>) -> DurianRouter {
        let features = available_features()
            .into_iter()
            .map(|f| (f.name.to_string(), f.default))
            .collect();
        DurianRouter::new(EngineContext {
            store,
            db,
            features,
        })
    }

    fn engine_without(store: Arc<InstructionStore>, disabled: &[&str]) -> DurianRouter {
        let mut features: BTreeMap<String, bool> = available_features()
            .into_iter()
            .map(|f| (f.name.to_string(), f.default))
            .collect();
        for name in disabled {
            features.insert(name.to_string(), false);
        }
        DurianRouter::new(EngineContext {
            store,
            db: None,
            features,
        })
    }

    #[test]
    fn test_approval_suppression() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("Thanks!", None, 5);

        assert_eq!(result.count, 0);
        assert_eq!(
            result.routing_analysis.get("suppressed"),
            Some(&Value::Bool(true))
        );
        let reason = result.routing_analysis.get("reason").unwrap().as_str().unwrap();
        assert!(reason.contains("approval"));
    }

    #[test]
    fn test_commencement_override() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("Yes, let's continue", None, 5);

        assert_ne!(
            result.routing_analysis.get("suppressed"),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            result.routing_analysis.get("commencement_override"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_glob_context_routing() {
        let (_dir, store) = fixture_store();
        let context = RouteContext {
            files: vec!["src/github/api.py".to_string()],
            language: "python".to_string(),
            ..Default::default()
        };
        let result = engine(store, None).route("fix this bug", Some(&context), 5);

        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "github/api_fix")
            .expect("glob-matched instruction routed");
        let glob_matches = hit.score_breakdown.get("glob_matches").unwrap();
        assert!(!glob_matches.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_bundle_boost() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("development workflow for task execution", None, 5);

        for id in [
            "trust_execution/development_workflow_essentials",
            "trust_execution/trust_based_task_execution",
        ] {
            let hit = result
                .instructions
                .iter()
                .find(|s| s.instruction.id == id)
                .unwrap_or_else(|| panic!("{id} routed"));
            let boost = hit
                .score_breakdown
                .get("bundle_boost")
                .unwrap_or_else(|| panic!("{id} has bundle_boost"));
            assert_eq!(boost.get("boost").unwrap().as_i64(), Some(12));
        }
    }

    #[test]
    fn test_foundational_overlay() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("fix the github api bug", None, 5);

        assert_eq!(result.instructions[0].instruction.id, "core/base");
        assert_eq!(result.instructions[0].routing_score, FOUNDATIONAL_SCORE);
        assert_eq!(
            result.routing_analysis.get("foundational_count").unwrap(),
            &json!(1)
        );
    }

    #[test]
    fn test_limit_bound() {
        let (_dir, store) = fixture_store();
        let foundational_count = store.foundational().len();
        let result = engine(store, None).route(
            "workflow github api task execution closure checklist",
            None,
            2,
        );
        assert!(result.instructions.len() <= 2 + foundational_count);
        assert_eq!(result.count, result.instructions.len());
    }

    #[test]
    fn test_empty_message_returns_only_foundational() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("", None, 5);
        assert_eq!(
            result.routing_analysis.get("query_specific_count").unwrap(),
            &json!(0)
        );
        assert!(result
            .instructions
            .iter()
            .all(|s| s.score_breakdown.contains_key("foundational")));
    }

    #[test]
    fn test_determinism() {
        let (_dir, store) = fixture_store();
        let engine = engine(store, None);
        let context = RouteContext {
            files: vec!["src/github/api.py".to_string()],
            ..Default::default()
        };

        let a = engine.route("fix the github workflow", Some(&context), 5);
        let b = engine.route("fix the github workflow", Some(&context), 5);
        assert_eq!(a.instruction_ids(), b.instruction_ids());
        let scores_a: Vec<i64> = a.instructions.iter().map(|s| s.routing_score).collect();
        let scores_b: Vec<i64> = b.instructions.iter().map(|s| s.routing_score).collect();
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn test_violation_boost_targets_compliance_categories() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("WRONG! this is UNACCEPTABLE!!!", None, 5);

        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "trust_execution/trust_based_task_execution")
            .expect("trust_execution instruction boosted");
        assert!(hit.score_breakdown.contains_key("violation_boost"));
    }

    #[test]
    fn test_friction_boost_applies_once() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route("that's not right, revert the workflow", None, 5);

        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "trust_execution/development_workflow_essentials")
            .unwrap();
        let friction = hit.score_breakdown.get("friction_boost").unwrap();
        assert_eq!(friction.get("boost").unwrap().as_i64(), Some(20));
        assert_eq!(
            friction.get("friction_type").unwrap().as_str(),
            Some("rejection")
        );
    }

    #[test]
    fn test_outcome_boost_matches_preventive_filename() {
        let (_dir, store) = fixture_store();
        // "before you proceed" -> premature_action -> issue_closure boost.
        let result = engine(store, None).route(
            "did you verify the closure checklist before you proceed?",
            None,
            5,
        );

        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "project_management/issue_closure")
            .unwrap();
        assert!(hit.score_breakdown.contains_key("outcome_boost"));
    }

    #[test]
    fn test_procedural_warning_for_high_scoring_instruction() {
        let (_dir, store) = fixture_store();
        // Keyword-heavy query drives issue_closure past the threshold.
        let result = engine(store, None).route(
            "close the issue with the closure checklist and verify the checklist again",
            None,
            5,
        );

        let warning = result.procedural_warning.expect("procedural warning emitted");
        assert!(warning.warning.contains("READ BEFORE EXECUTING"));
        let item = warning
            .instructions
            .iter()
            .find(|i| i.id == "project_management/issue_closure")
            .unwrap();
        assert_eq!(
            item.referenced_doc.as_deref(),
            Some("docs/templates/issue_closure_checklist.md")
        );
    }

    #[test]
    fn test_guidance_action_attached() {
        let (_dir, store) = fixture_store();
        let result = engine(store, None).route(
            "always run the github workflow checks before merging",
            None,
            5,
        );

        let action = result.guidance_action.expect("guidance action emitted");
        assert_eq!(action.action, "log_user_guidance");
        assert_eq!(action.parameters.guidance_type, "explicit");
    }

    #[test]
    fn test_friction_risk_watch_only_when_enabled_by_caller() {
        let (_dir, store) = fixture_store();
        let engine = engine(store, None);

        let without = engine.route("I prefer to use squash merges", None, 5);
        assert!(without.friction_risk_watch.is_none());

        let context = RouteContext {
            friction_monitoring: true,
            ..Default::default()
        };
        let with = engine.route("I prefer to use squash merges", Some(&context), 5);
        let watch = with.friction_risk_watch.unwrap();
        assert!(watch.enabled);
        assert_eq!(watch.guidance_type, "implicit");
        assert_eq!(watch.frustration_level, "none");
    }

    #[test]
    fn test_commencement_lookback_boost_from_context() {
        let (_dir, store) = fixture_store();
        let engine = engine(store, None);
        let context = RouteContext {
            previous_routing: Some(vec![
                "trust_execution/development_workflow_essentials".to_string(),
            ]),
            ..Default::default()
        };

        let result = engine.route("yes, let's continue with the workflow", Some(&context), 5);
        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "trust_execution/development_workflow_essentials")
            .unwrap();
        assert_eq!(
            hit.score_breakdown.get("commencement_lookback").unwrap(),
            &json!(15)
        );
    }

    #[test]
    fn test_commencement_lookback_from_event_log() {
        let (_dir, store) = fixture_store();
        let (_db_dir, db) = test_db();

        // Two prior non-empty events; lookback reads the one at offset 1.
        let record = RoutingEventRecord::new(
            "earlier work",
            vec!["trust_execution/trust_based_task_execution".to_string()],
            DURIAN_VERSION,
        );
        assert!(crate::db::events::store_routing_event(&db, &record));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let record = RoutingEventRecord::new(
            "latest work",
            vec!["github/api_fix".to_string()],
            DURIAN_VERSION,
        );
        assert!(crate::db::events::store_routing_event(&db, &record));

        let engine = engine(store, Some(db));
        let result = engine.route("yes, let's continue", None, 5);
        let lookback = result.routing_analysis.get("commencement_lookback").unwrap();
        assert_eq!(lookback.get("found").unwrap(), &Value::Bool(true));

        let hit = result
            .instructions
            .iter()
            .find(|s| s.instruction.id == "trust_execution/trust_based_task_execution")
            .expect("previous routing boosted into results");
        assert!(hit.score_breakdown.contains_key("commencement_lookback"));
    }

    #[test]
    fn test_disabled_features_skip_passes() {
        let (_dir, store) = fixture_store();
        let engine = engine_without(
            store,
            &["approval_suppression", "foundational", "violation_detection"],
        );

        // Suppression disabled: approvals route normally.
        let result = engine.route("Thanks!", None, 5);
        assert_ne!(
            result.routing_analysis.get("suppressed"),
            Some(&Value::Bool(true))
        );
        // Foundational disabled: no overlay.
        assert_eq!(
            result.routing_analysis.get("foundational_disabled"),
            Some(&Value::Bool(true))
        );
        // Violation pass disabled: analysis records null.
        let violations = engine.route("WRONG! UNACCEPTABLE!", None, 5);
        assert_eq!(
            violations.routing_analysis.get("violation_detection"),
            Some(&Value::Null)
        );
    }
}
