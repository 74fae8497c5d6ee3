//! Observation lifecycle: runtime-sourced knowledge candidates.
//!
//! Observations come from user interactions (explicit/implicit guidance,
//! corrections, patterns). Lifecycle: DISCOVERED → REVIEWING →
//! PROMOTED/REJECTED → (optionally) ARCHIVED. Promotion requires an
//! implementation type and creates a linked `observation_implemented` row.

use crate::db::Database;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Types of runtime observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObservationType {
    GuidanceExplicit,
    GuidanceImplicit,
    Correction,
    Pattern,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuidanceExplicit => "GUIDANCE_EXPLICIT",
            Self::GuidanceImplicit => "GUIDANCE_IMPLICIT",
            Self::Correction => "CORRECTION",
            Self::Pattern => "PATTERN",
        }
    }
}

/// Guidance type taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuidanceType {
    None,
    Explicit,
    ImplicitWish,
    ImplicitPreference,
    ImplicitRule,
    CorrectionSignal,
    StyleSignal,
}

impl GuidanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Explicit => "explicit",
            Self::ImplicitWish => "implicit_wish",
            Self::ImplicitPreference => "implicit_preference",
            Self::ImplicitRule => "implicit_rule",
            Self::CorrectionSignal => "correction_signal",
            Self::StyleSignal => "style_signal",
        }
    }
}

/// Status in the observation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObservationStatus {
    Discovered,
    Reviewing,
    Promoted,
    Rejected,
    Archived,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Reviewing => "REVIEWING",
            Self::Promoted => "PROMOTED",
            Self::Rejected => "REJECTED",
            Self::Archived => "ARCHIVED",
        }
    }
}

/// How an observation was implemented on promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImplementationType {
    /// Added to routing_triggers
    Trigger,
    /// Created an instruction file
    Instruction,
    /// Stored as a project-level rule
    ProjectRule,
}

impl ImplementationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "TRIGGER",
            Self::Instruction => "INSTRUCTION",
            Self::ProjectRule => "PROJECT_RULE",
        }
    }
}

/// Input for a new observation.
#[derive(Debug, Clone)]
pub struct ObservationRecord {
    pub observation_type: ObservationType,
    pub observation_content: String,
    pub event_id: Option<i64>,
    pub observation_target: Option<String>,
    pub guidance_type: Option<GuidanceType>,
    pub should_persist: bool,
    pub persistence_scope: String,
    pub session_id: Option<String>,
    pub context: Option<Value>,
}

impl ObservationRecord {
    pub fn new(observation_type: ObservationType, content: impl Into<String>) -> Self {
        Self {
            observation_type,
            observation_content: content.into(),
            event_id: None,
            observation_target: None,
            guidance_type: None,
            should_persist: true,
            persistence_scope: "project".to_string(),
            session_id: None,
            context: None,
        }
    }

    pub fn with_event(mut self, event_id: i64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_guidance_type(mut self, guidance_type: GuidanceType) -> Self {
        self.guidance_type = Some(guidance_type);
        self
    }
}

/// Promotion target details, keyed by implementation type.
#[derive(Debug, Clone, Default)]
pub struct PromotionTarget {
    pub trigger_id: Option<i64>,
    pub instruction_id: Option<i64>,
    pub rule_content: Option<String>,
    pub rule_scope: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Store a newly discovered observation. Returns the new row id.
pub fn store_observation(db: &Database, record: &ObservationRecord) -> Result<i64> {
    let context_json = record
        .context
        .as_ref()
        .and_then(|c| serde_json::to_string(c).ok());

    db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO observation_discovered
             (event_id, observation_type, observation_content, observation_target,
              guidance_type, should_persist, persistence_scope, status,
              session_id, context, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.event_id,
                record.observation_type.as_str(),
                record.observation_content,
                record.observation_target,
                record.guidance_type.map(|g| g.as_str()),
                record.should_persist,
                record.persistence_scope,
                ObservationStatus::Discovered.as_str(),
                record.session_id,
                context_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Promote an observation to an implementation. Returns the implemented row
/// id, or `None` when the observation does not exist.
pub fn promote_observation(
    db: &Database,
    discovered_id: i64,
    implementation_type: ImplementationType,
    target: &PromotionTarget,
) -> Result<Option<i64>> {
    let exists: Option<i64> = db.with_conn(|conn| {
        conn.query_row(
            "SELECT id FROM observation_discovered WHERE id = ?1",
            params![discovered_id],
            |row| row.get(0),
        )
        .optional()
    })?;
    if exists.is_none() {
        warn!("Observation not found: {discovered_id}");
        return Ok(None);
    }

    let now = Utc::now().to_rfc3339();
    let impl_id = db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO observation_implemented
             (discovered_id, implementation_type, trigger_id, instruction_id,
              rule_content, rule_scope, title, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'ACTIVE', ?9)",
            params![
                discovered_id,
                implementation_type.as_str(),
                target.trigger_id,
                target.instruction_id,
                target.rule_content,
                target.rule_scope,
                target.title,
                target.description,
                now,
            ],
        )?;
        let impl_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE observation_discovered
             SET status = ?1, promoted_to = ?2, promoted_at = ?3
             WHERE id = ?4",
            params![
                ObservationStatus::Promoted.as_str(),
                impl_id,
                now,
                discovered_id,
            ],
        )?;
        Ok(impl_id)
    })?;

    info!(
        "Promoted observation {discovered_id} as {}",
        implementation_type.as_str()
    );
    Ok(Some(impl_id))
}

/// Reject an observation with a reason.
pub fn reject_observation(db: &Database, observation_id: i64, reason: &str) -> Result<bool> {
    let rows = db.with_tx(|conn| {
        conn.execute(
            "UPDATE observation_discovered
             SET status = ?1, rejected_at = ?2, rejection_reason = ?3
             WHERE id = ?4",
            params![
                ObservationStatus::Rejected.as_str(),
                Utc::now().to_rfc3339(),
                reason,
                observation_id,
            ],
        )
    })?;
    Ok(rows > 0)
}

/// A discovered observation row, as surfaced to review tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationRow {
    pub id: i64,
    pub observation_type: String,
    pub observation_content: String,
    pub guidance_type: Option<String>,
    pub status: String,
    pub promoted_to: Option<i64>,
    pub discovered_at: String,
}

/// Observations by status, newest first.
pub fn observations_by_status(
    db: &Database,
    status: ObservationStatus,
    observation_type: Option<ObservationType>,
    limit: usize,
) -> Result<Vec<ObservationRow>> {
    db.with_conn(|conn| {
        const COLUMNS: &str =
            "id, observation_type, observation_content, guidance_type, status, promoted_to, discovered_at";
        let map_row = |row: &rusqlite::Row| {
            Ok(ObservationRow {
                id: row.get(0)?,
                observation_type: row.get(1)?,
                observation_content: row.get(2)?,
                guidance_type: row.get(3)?,
                status: row.get(4)?,
                promoted_to: row.get(5)?,
                discovered_at: row.get(6)?,
            })
        };

        let rows = match observation_type {
            Some(otype) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM observation_discovered
                     WHERE status = ?1 AND observation_type = ?2
                     ORDER BY discovered_at DESC LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(
                        params![status.as_str(), otype.as_str(), limit as i64],
                        map_row,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM observation_discovered
                     WHERE status = ?1
                     ORDER BY discovered_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit as i64], map_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
        };
        Ok(rows)
    })
}

/// Observation counts by status and type.
pub fn observation_stats(db: &Database) -> Result<(BTreeMap<String, i64>, BTreeMap<String, i64>)> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM observation_discovered GROUP BY status")?;
        let by_status: BTreeMap<String, i64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT observation_type, COUNT(*) FROM observation_discovered GROUP BY observation_type",
        )?;
        let by_type: BTreeMap<String, i64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok((by_status, by_type))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_store_and_list() {
        let (_dir, db) = test_db();
        let record = ObservationRecord::new(
            ObservationType::GuidanceExplicit,
            "always run the linter before committing",
        )
        .with_guidance_type(GuidanceType::Explicit);

        let id = store_observation(&db, &record).unwrap();
        assert!(id > 0);

        let rows =
            observations_by_status(&db, ObservationStatus::Discovered, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].guidance_type.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_promote_as_trigger() {
        let (_dir, db) = test_db();
        let id = store_observation(
            &db,
            &ObservationRecord::new(ObservationType::Correction, "never push to main"),
        )
        .unwrap();

        let target = PromotionTarget {
            title: Some("No direct pushes".to_string()),
            ..Default::default()
        };
        let impl_id = promote_observation(&db, id, ImplementationType::Trigger, &target)
            .unwrap()
            .unwrap();

        let promoted =
            observations_by_status(&db, ObservationStatus::Promoted, None, 10).unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].promoted_to, Some(impl_id));
    }

    #[test]
    fn test_promote_missing() {
        let (_dir, db) = test_db();
        let result =
            promote_observation(&db, 42, ImplementationType::Instruction, &Default::default())
                .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_reject() {
        let (_dir, db) = test_db();
        let id = store_observation(
            &db,
            &ObservationRecord::new(ObservationType::Pattern, "noise"),
        )
        .unwrap();

        assert!(reject_observation(&db, id, "not actionable").unwrap());

        let (by_status, by_type) = observation_stats(&db).unwrap();
        assert_eq!(by_status.get("REJECTED"), Some(&1));
        assert_eq!(by_type.get("PATTERN"), Some(&1));
    }

    #[test]
    fn test_type_filter() {
        let (_dir, db) = test_db();
        store_observation(
            &db,
            &ObservationRecord::new(ObservationType::GuidanceImplicit, "I prefer tabs"),
        )
        .unwrap();
        store_observation(
            &db,
            &ObservationRecord::new(ObservationType::Correction, "wrong branch"),
        )
        .unwrap();

        let corrections = observations_by_status(
            &db,
            ObservationStatus::Discovered,
            Some(ObservationType::Correction),
            10,
        )
        .unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].observation_type, "CORRECTION");
    }
}
