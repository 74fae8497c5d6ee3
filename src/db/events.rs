//! Routing event capture and retrieval.
//!
//! Capture is fire-and-forget: the caller never gates correctness on it. A
//! failure is logged and absorbed; transient write-lock contention retries
//! with exponential backoff before giving up.

use crate::db::Database;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration for transient database locks.
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Input for one captured routing decision.
#[derive(Debug, Clone, Default)]
pub struct RoutingEventRecord {
    pub user_message: String,
    pub routed_instructions: Vec<String>,
    pub engine_version: String,
    pub routing_scores: Option<BTreeMap<String, i64>>,
    pub context: Option<Value>,
    pub session_id: Option<String>,
    pub routing_latency_ms: Option<f64>,
}

impl RoutingEventRecord {
    pub fn new(
        user_message: impl Into<String>,
        routed_instructions: Vec<String>,
        engine_version: impl Into<String>,
    ) -> Self {
        Self {
            user_message: user_message.into(),
            routed_instructions,
            engine_version: engine_version.into(),
            ..Default::default()
        }
    }

    pub fn with_scores(mut self, scores: BTreeMap<String, i64>) -> Self {
        self.routing_scores = Some(scores);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.routing_latency_ms = Some(latency_ms);
        self
    }
}

/// A persisted routing event.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingEvent {
    pub id: i64,
    pub timestamp: String,
    pub user_message: String,
    pub message_hash: Option<String>,
    pub routed_instructions: Vec<String>,
    pub instruction_count: i64,
    pub engine_version: Option<String>,
    pub session_id: Option<String>,
    pub routing_latency_ms: Option<f64>,
}

/// Statistics over captured events.
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total_count: i64,
    pub first_event: Option<String>,
    pub last_event: Option<String>,
    pub last_24h_count: i64,
    pub engine_distribution: BTreeMap<String, i64>,
}

/// 16-char message hash for deduplication/analysis.
fn message_hash(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Store a routing event. Never propagates an error; returns whether the
/// write succeeded. Retries up to three times on lock contention with
/// exponential backoff starting at 50 ms.
pub fn store_routing_event(db: &Database, record: &RoutingEventRecord) -> bool {
    let timestamp = Utc::now().to_rfc3339();
    let hash = message_hash(&record.user_message);
    let instructions_json = if record.routed_instructions.is_empty() {
        None
    } else {
        serde_json::to_string(&record.routed_instructions).ok()
    };
    let scores_json = record
        .routing_scores
        .as_ref()
        .and_then(|s| serde_json::to_string(s).ok());
    let context_json = record
        .context
        .as_ref()
        .and_then(|c| serde_json::to_string(c).ok());
    let instruction_count = record.routed_instructions.len() as i64;

    let mut last_error = None;
    for attempt in 0..MAX_RETRIES {
        let result = db.with_tx(|conn| {
            conn.execute(
                "INSERT INTO routing_events
                 (timestamp, user_message, message_hash, routed_instructions,
                  instruction_count, routing_scores, engine_version,
                  session_id, context, routing_latency_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    timestamp,
                    record.user_message,
                    hash,
                    instructions_json,
                    instruction_count,
                    scores_json,
                    record.engine_version,
                    record.session_id,
                    context_json,
                    record.routing_latency_ms,
                ],
            )
        });

        match result {
            Ok(_) => {
                debug!("Routing event captured: {instruction_count} instructions");
                return true;
            }
            Err(e) => {
                let message = e.to_string();
                let contended = message.contains("locked") || message.contains("busy");
                if contended && attempt < MAX_RETRIES - 1 {
                    let delay = RETRY_BASE_DELAY_MS << attempt;
                    debug!(
                        "Database locked, retrying in {delay}ms (attempt {}/{MAX_RETRIES})",
                        attempt + 1
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                    last_error = Some(message);
                    continue;
                }
                warn!("Failed to store routing event: {message}");
                return false;
            }
        }
    }

    warn!(
        "Failed to store routing event after {MAX_RETRIES} attempts: {}",
        last_error.unwrap_or_default()
    );
    false
}

/// The routed-id list of the previous non-empty routing event, for
/// commencement look-back. Offset 1 skips the just-captured current event.
pub fn previous_routing(db: &Database) -> Option<Vec<String>> {
    let json: Option<String> = db
        .with_conn(|conn| {
            conn.query_row(
                "SELECT routed_instructions FROM routing_events
                 WHERE instruction_count > 0
                 ORDER BY timestamp DESC
                 LIMIT 1 OFFSET 1",
                [],
                |row| row.get(0),
            )
            .optional()
        })
        .map_err(|e| warn!("Error querying previous routing: {e}"))
        .ok()
        .flatten();

    json.and_then(|j| serde_json::from_str(&j).ok())
}

/// Aggregate event statistics for diagnostics.
pub fn event_stats(db: &Database) -> crate::error::Result<EventStats> {
    db.with_conn(|conn| {
        let total_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM routing_events", [], |row| row.get(0))?;

        let first_event: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM routing_events ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_event: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM routing_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let last_24h_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM routing_events
             WHERE timestamp > datetime('now', '-1 day')",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT engine_version, COUNT(*) FROM routing_events
             GROUP BY engine_version ORDER BY COUNT(*) DESC",
        )?;
        let engine_distribution: BTreeMap<String, i64> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, i64>(1)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(EventStats {
            total_count,
            first_event,
            last_event,
            last_24h_count,
            engine_distribution,
        })
    })
}

/// Most recent events, optionally filtered by session.
pub fn recent_events(
    db: &Database,
    limit: usize,
    session_id: Option<&str>,
) -> crate::error::Result<Vec<RoutingEvent>> {
    db.with_conn(|conn| {
        let sql = match session_id {
            Some(_) => {
                "SELECT id, timestamp, user_message, message_hash, routed_instructions,
                        instruction_count, engine_version, session_id, routing_latency_ms
                 FROM routing_events WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2"
            }
            None => {
                "SELECT id, timestamp, user_message, message_hash, routed_instructions,
                        instruction_count, engine_version, session_id, routing_latency_ms
                 FROM routing_events ORDER BY id DESC LIMIT ?1"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row| {
            let routed_json: Option<String> = row.get(4)?;
            Ok(RoutingEvent {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                user_message: row.get(2)?,
                message_hash: row.get(3)?,
                routed_instructions: routed_json
                    .and_then(|j| serde_json::from_str(&j).ok())
                    .unwrap_or_default(),
                instruction_count: row.get(5)?,
                engine_version: row.get(6)?,
                session_id: row.get(7)?,
                routing_latency_ms: row.get(8)?,
            })
        };

        let events = match session_id {
            Some(session) => stmt
                .query_map(params![session, limit as i64], map_row)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map(params![limit as i64], map_row)?
                .filter_map(|r| r.ok())
                .collect(),
        };

        Ok(events)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn capture(db: &Database, message: &str, routed: &[&str]) {
        let record = RoutingEventRecord::new(
            message,
            routed.iter().map(|s| s.to_string()).collect(),
            "durian-0.6.2",
        );
        assert!(store_routing_event(db, &record));
    }

    #[test]
    fn test_store_and_count() {
        let (_dir, db) = test_db();
        capture(&db, "first", &["a/x"]);
        capture(&db, "second", &["a/x", "b/y"]);
        capture(&db, "third", &[]);

        let stats = event_stats(&db).unwrap();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.last_24h_count, 3);
        assert_eq!(stats.engine_distribution.get("durian-0.6.2"), Some(&3));
    }

    #[test]
    fn test_count_matches_routed_list() {
        let (_dir, db) = test_db();
        capture(&db, "msg", &["a/x", "b/y"]);

        let events = recent_events(&db, 10, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].instruction_count,
            events[0].routed_instructions.len() as i64
        );
        assert_eq!(events[0].user_message, "msg");
        assert_eq!(events[0].message_hash.as_ref().unwrap().len(), 16);
    }

    #[test]
    fn test_previous_routing_skips_latest() {
        let (_dir, db) = test_db();
        capture(&db, "older", &["trust_execution/a"]);
        std::thread::sleep(Duration::from_millis(5));
        capture(&db, "suppressed", &[]);
        std::thread::sleep(Duration::from_millis(5));
        capture(&db, "latest", &["github/b"]);

        // Offset 1 over non-empty events: latest non-empty is "latest",
        // previous is "older".
        let previous = previous_routing(&db).unwrap();
        assert_eq!(previous, vec!["trust_execution/a"]);
    }

    #[test]
    fn test_previous_routing_empty_db() {
        let (_dir, db) = test_db();
        assert!(previous_routing(&db).is_none());
    }

    #[test]
    fn test_recent_events_session_filter() {
        let (_dir, db) = test_db();
        let record = RoutingEventRecord::new("in session", vec!["a/x".to_string()], "durian-0.6.2")
            .with_session("s1");
        assert!(store_routing_event(&db, &record));
        capture(&db, "no session", &["b/y"]);

        let events = recent_events(&db, 10, Some("s1")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_message, "in session");
    }

    #[test]
    fn test_store_survives_missing_tables() {
        // A database file without the schema: capture absorbs the failure.
        let dir = tempfile::tempdir().unwrap();
        let db = Database {
            db_path: dir.path().join("raw.db"),
        };
        let record = RoutingEventRecord::new("m", vec![], "durian-0.6.2");
        assert!(!store_routing_event(&db, &record));
    }
}
