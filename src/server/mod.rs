//! Server core: shared routing state and the tool implementations behind
//! the stdio transport.
//!
//! Every operation returns a structured JSON value; no error propagates past
//! this boundary.

pub mod rpc;
pub mod tools;

pub use tools::{tool_definitions, ToolDef};

use crate::db::{events, Database, RoutingEventRecord};
use crate::discovery::DiscoveryEngine;
use crate::engine::{extract_keywords, RouteContext};
use crate::error::{Error, Result};
use crate::reload::{ReloadController, SharedSnapshot};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// The knowledge server: tool surface over the shared store/engine snapshot.
pub struct KnowledgeServer {
    snapshot: SharedSnapshot,
    controller: Arc<ReloadController>,
    db: Option<Database>,
    discovery: Option<DiscoveryEngine>,
    limit_default: usize,
}

impl KnowledgeServer {
    pub fn new(
        snapshot: SharedSnapshot,
        controller: Arc<ReloadController>,
        db: Option<Database>,
        discovery: Option<DiscoveryEngine>,
        limit_default: usize,
    ) -> Self {
        Self {
            snapshot,
            controller,
            db,
            discovery,
            limit_default,
        }
    }

    /// Get instruction files by topic and/or category.
    pub fn get_instructions(
        &self,
        topic: Option<&str>,
        category: Option<&str>,
        exact_match: bool,
    ) -> Value {
        info!("get_instructions called: topic={topic:?}, category={category:?}, exact_match={exact_match}");
        let snapshot = self.snapshot.read().expect("snapshot lock poisoned");
        let store = Arc::clone(&snapshot.store);
        drop(snapshot);

        match (topic, category) {
            (Some(topic), Some(category)) if exact_match => match store.get(category, topic) {
                Some(instruction) => json!({
                    "instructions": [instruction],
                    "count": 1,
                    "query": {"topic": topic, "category": category, "exact_match": true},
                }),
                None => json!({
                    "instructions": [],
                    "count": 0,
                    "query": {"topic": topic, "category": category, "exact_match": true},
                    "error": format!("Instruction not found: {category}/{topic}"),
                }),
            },
            (topic, Some(category)) => {
                let mut instructions = store.by_category(category);
                if let Some(topic) = topic {
                    let topic_lower = topic.to_lowercase();
                    instructions.retain(|inst| {
                        inst.id.to_lowercase().contains(&topic_lower)
                            || inst.body.to_lowercase().contains(&topic_lower)
                    });
                }
                json!({
                    "instructions": instructions,
                    "count": instructions.len(),
                    "query": {"topic": topic, "category": category, "exact_match": false},
                })
            }
            (Some(topic), None) => {
                let results = store.search(topic, 10);
                json!({
                    "instructions": results,
                    "count": results.len(),
                    "query": {"topic": topic, "exact_match": false},
                })
            }
            (None, None) => {
                let all: Vec<_> = store.iter().collect();
                json!({
                    "instructions": all,
                    "count": all.len(),
                    "query": {"all": true},
                })
            }
        }
    }

    /// Full-text search across the corpus.
    pub fn search_instructions(&self, query: &str, limit: usize) -> Value {
        info!("search_instructions called: query={query}, limit={limit}");
        let snapshot = self.snapshot.read().expect("snapshot lock poisoned");
        let store = Arc::clone(&snapshot.store);
        drop(snapshot);

        let results = store.search(query, limit);
        json!({
            "results": results,
            "count": results.len(),
            "query": query,
        })
    }

    /// Route a message through the active engine; capture the event and run
    /// the discovery-promotion check.
    pub fn route_instructions(
        &self,
        message: &str,
        context: Option<Value>,
        limit: Option<usize>,
    ) -> Value {
        let limit = limit.unwrap_or(self.limit_default);
        info!("route_instructions called: message={}, limit={limit}", preview(message));

        let route_context: Option<RouteContext> = match &context {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Ignoring malformed routing context: {e}");
                    None
                }
            },
            None => None,
        };

        let snapshot = self.snapshot.read().expect("snapshot lock poisoned");
        let engine = Arc::clone(&snapshot.engine);
        drop(snapshot);

        let start = Instant::now();
        let result = engine.route(message, route_context.as_ref(), limit);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let routed_ids = result.instruction_ids();
        let scores: BTreeMap<String, i64> = result
            .instructions
            .iter()
            .map(|s| (s.instruction.id.clone(), s.routing_score))
            .collect();
        let keywords: Vec<String> = result
            .routing_analysis
            .get("keywords_extracted")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| extract_keywords(message));

        let mut value = match serde_json::to_value(&result) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        value.insert(
            "routing_engine_version".to_string(),
            Value::String(engine.version().to_string()),
        );

        // Non-blocking event capture: failures are logged and absorbed.
        if let Some(db) = &self.db {
            let mut record = RoutingEventRecord::new(message, routed_ids, engine.version())
                .with_scores(scores)
                .with_latency_ms(latency_ms);
            if let Some(context) = context {
                record = record.with_context(context);
            }
            if let Some(session) = route_context.as_ref().and_then(|c| c.session_id.clone()) {
                record = record.with_session(session);
            }
            events::store_routing_event(db, &record);
        }

        // Auto-promotion check; promoted files become visible after the next
        // reload cycle, routing does not wait for it.
        if let Some(discovery) = &self.discovery {
            let promoted = discovery.check_and_promote(&keywords);
            if !promoted.is_empty() {
                info!("Auto-promoted {} discoveries", promoted.len());
                value.insert(
                    "promoted_discoveries".to_string(),
                    serde_json::to_value(promoted).unwrap_or(Value::Null),
                );
            }
        }

        Value::Object(value)
    }

    /// Manual reindex with spam prevention.
    pub fn reindex_knowledge_base(&self, force: bool) -> Value {
        serde_json::to_value(self.controller.manual_reindex(force))
            .unwrap_or_else(|e| json!({"success": false, "error": e.to_string()}))
    }

    /// Active engine version, description, and corpus size.
    pub fn get_routing_info(&self) -> Value {
        let snapshot = self.snapshot.read().expect("snapshot lock poisoned");
        json!({
            "success": true,
            "engine": snapshot.engine.version(),
            "description": snapshot.engine.description(),
            "instruction_count": snapshot.store.len(),
        })
    }

    /// Resource read: the body of `instruction://pongogo/{category}/{name}`.
    pub fn read_instruction_resource(&self, category: &str, name: &str) -> Result<String> {
        info!("Resource requested: instruction://pongogo/{category}/{name}");
        let snapshot = self.snapshot.read().expect("snapshot lock poisoned");
        snapshot
            .store
            .get(category, name)
            .map(|inst| inst.body.clone())
            .ok_or_else(|| Error::config(format!("Instruction not found: {category}/{name}")))
    }
}

fn preview(message: &str) -> String {
    message.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::register_builtin_engines;
    use crate::instructions::InstructionStore;
    use crate::reload::EngineSnapshot;
    use std::fs;
    use std::path::Path;
    use std::sync::RwLock;
    use tempfile::TempDir;

    fn write_instruction(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn setup(dir: &TempDir, with_db: bool) -> KnowledgeServer {
        register_builtin_engines();
        let kb = dir.path().join(".pongogo").join("instructions");
        write_instruction(
            &kb,
            "github/api_fix.instructions.md",
            "---\nid: github/api_fix\ndescription: Fix GitHub API integrations\ntags: [github, api]\nrouting:\n  applyTo:\n    globs: ['**/github/*.py']\n---\nUse the typed client.\n",
        );
        write_instruction(
            &kb,
            "core/base.instructions.md",
            "---\nid: core/base\ndescription: Core context\nfoundational: true\n---\nAlways on.\n",
        );

        let db = with_db
            .then(|| Database::open(dir.path().join(".pongogo").join("pongogo.db")).unwrap());
        let discovery = db
            .clone()
            .map(|db| DiscoveryEngine::new(dir.path(), db));

        let mut store = InstructionStore::new(&kb, None);
        store.load().unwrap();
        let store = Arc::new(store);
        let engine =
            crate::engine::create_router(Arc::clone(&store), db.clone(), None).unwrap();
        let snapshot = Arc::new(RwLock::new(EngineSnapshot {
            store,
            engine: Arc::from(engine),
        }));
        let controller = Arc::new(ReloadController::new(
            Arc::clone(&snapshot),
            kb,
            None,
            db.clone(),
            Config::default(),
        ));

        KnowledgeServer::new(snapshot, controller, db, discovery, 5)
    }

    #[test]
    fn test_get_instructions_exact() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let result = server.get_instructions(Some("api_fix"), Some("github"), true);
        assert_eq!(result["count"], 1);
        assert_eq!(result["instructions"][0]["id"], "github/api_fix");

        let missing = server.get_instructions(Some("nope"), Some("github"), true);
        assert_eq!(missing["count"], 0);
        assert!(missing["error"].as_str().unwrap().contains("not found"));
    }

    #[test]
    fn test_get_instructions_by_category_and_all() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let by_category = server.get_instructions(None, Some("github"), false);
        assert_eq!(by_category["count"], 1);

        let all = server.get_instructions(None, None, false);
        assert_eq!(all["count"], 2);
        assert_eq!(all["query"]["all"], true);
    }

    #[test]
    fn test_search_instructions() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let result = server.search_instructions("github", 10);
        assert_eq!(result["count"], 1);
        assert_eq!(result["query"], "github");
    }

    #[test]
    fn test_route_appends_engine_version() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let result = server.route_instructions("fix the github api", None, None);
        assert_eq!(
            result["routing_engine_version"].as_str().unwrap(),
            crate::engine::durian::DURIAN_VERSION
        );
        assert!(result["count"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn test_route_event_capture_persists() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, true);

        server.route_instructions("first message about github", None, None);
        server.route_instructions("second message about the api", None, None);
        server.route_instructions("third message fixing github again", None, None);

        let db = server.db.as_ref().unwrap();
        let stats = events::event_stats(db).unwrap();
        assert_eq!(stats.total_count, 3);

        let recent = events::recent_events(db, 1, None).unwrap();
        assert_eq!(recent[0].user_message, "third message fixing github again");
        assert_eq!(
            recent[0].engine_version.as_deref(),
            Some(crate::engine::durian::DURIAN_VERSION)
        );
    }

    #[test]
    fn test_route_promotes_matching_discovery() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, true);

        let db = server.db.as_ref().unwrap();
        crate::db::artifacts::store_artifact_discovery(
            db,
            "CLAUDE.md",
            crate::db::SourceType::ClaudeMd,
            "Deployment requires a staging pass.",
            Some("Deployment Rules"),
            &["deployment".to_string(), "staging".to_string()],
        )
        .unwrap()
        .unwrap();

        let result = server.route_instructions("how does deployment to staging work?", None, None);
        let promoted = result["promoted_discoveries"].as_array().unwrap();
        assert_eq!(promoted.len(), 1);
        assert!(promoted[0]["instruction_file"]
            .as_str()
            .unwrap()
            .contains("_discovered"));
    }

    #[test]
    fn test_malformed_context_is_ignored() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let result = server.route_instructions(
            "fix the github api",
            Some(json!({"files": "not-an-array"})),
            None,
        );
        // Routing still succeeds on the default context.
        assert!(result["count"].as_u64().is_some());
    }

    #[test]
    fn test_read_instruction_resource() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let body = server
            .read_instruction_resource("github", "api_fix")
            .unwrap();
        assert_eq!(body, "Use the typed client.");

        assert!(server.read_instruction_resource("github", "missing").is_err());
    }

    #[test]
    fn test_routing_info() {
        let dir = TempDir::new().unwrap();
        let server = setup(&dir, false);

        let info = server.get_routing_info();
        assert_eq!(info["success"], true);
        assert_eq!(info["instruction_count"], 2);
        assert_eq!(
            info["engine"].as_str().unwrap(),
            crate::engine::durian::DURIAN_VERSION
        );
    }
}
