//! Routing trigger dictionaries: friction, guidance, and violation patterns.

use crate::db::Database;
use crate::error::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Types of routing triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    /// Patterns indicating friction/mistakes
    Friction,
    /// Explicit user directives
    GuidanceExplicit,
    /// Implicit preferences/wishes
    GuidanceImplicit,
    /// Policy violation patterns
    Violation,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friction => "FRICTION",
            Self::GuidanceExplicit => "GUIDANCE_EXPLICIT",
            Self::GuidanceImplicit => "GUIDANCE_IMPLICIT",
            Self::Violation => "VIOLATION",
        }
    }
}

/// A trigger row to upsert.
#[derive(Debug, Clone, Default)]
pub struct TriggerRecord {
    pub trigger_value: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub source: String,
    pub confidence: String,
    pub enabled: bool,
    pub created_by: Option<String>,
}

impl TriggerRecord {
    pub fn built_in() -> Self {
        Self {
            source: "built_in".to_string(),
            confidence: "HIGH".to_string(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.trigger_value = Some(value.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Insert or update a trigger; `(trigger_type, trigger_key)` is unique.
pub fn upsert_trigger(
    db: &Database,
    trigger_type: TriggerType,
    trigger_key: &str,
    record: &TriggerRecord,
) -> Result<i64> {
    let now = chrono::Utc::now().to_rfc3339();
    db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO routing_triggers
             (trigger_type, trigger_key, trigger_value, category, description,
              source, confidence, enabled, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(trigger_type, trigger_key) DO UPDATE SET
                 trigger_value = excluded.trigger_value,
                 category = excluded.category,
                 description = excluded.description,
                 source = excluded.source,
                 confidence = excluded.confidence,
                 enabled = excluded.enabled,
                 updated_at = excluded.updated_at",
            params![
                trigger_type.as_str(),
                trigger_key,
                record.trigger_value,
                record.category,
                record.description,
                record.source,
                record.confidence,
                record.enabled,
                record.created_by,
                now,
            ],
        )?;
        conn.query_row(
            "SELECT id FROM routing_triggers WHERE trigger_type = ?1 AND trigger_key = ?2",
            params![trigger_type.as_str(), trigger_key],
            |row| row.get(0),
        )
    })
}

/// All triggers of a type as `key -> value`.
pub fn triggers_by_type(
    db: &Database,
    trigger_type: TriggerType,
    enabled_only: bool,
) -> Result<BTreeMap<String, Option<String>>> {
    db.with_conn(|conn| {
        let sql = if enabled_only {
            "SELECT trigger_key, trigger_value FROM routing_triggers
             WHERE trigger_type = ?1 AND enabled = 1"
        } else {
            "SELECT trigger_key, trigger_value FROM routing_triggers
             WHERE trigger_type = ?1"
        };
        let mut stmt = conn.prepare(sql)?;
        let triggers = stmt
            .query_map(params![trigger_type.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(triggers)
    })
}

/// Whether an enabled trigger with this exact key exists (echo detection).
pub fn trigger_exists(db: &Database, trigger_type: TriggerType, trigger_key: &str) -> bool {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT COUNT(*) FROM routing_triggers
             WHERE trigger_type = ?1 AND trigger_key = ?2 AND enabled = 1",
            params![trigger_type.as_str(), trigger_key],
            |row| row.get::<_, i64>(0),
        )
    })
    .map(|count| count > 0)
    .unwrap_or(false)
}

/// Bulk-load a dictionary of triggers. Optionally disables existing rows of
/// the same type and source first.
pub fn bulk_load_triggers(
    db: &Database,
    trigger_type: TriggerType,
    triggers: &BTreeMap<String, Option<String>>,
    source: &str,
    replace_existing: bool,
) -> Result<usize> {
    if replace_existing {
        let now = chrono::Utc::now().to_rfc3339();
        db.with_tx(|conn| {
            conn.execute(
                "UPDATE routing_triggers SET enabled = 0, updated_at = ?1
                 WHERE trigger_type = ?2 AND source = ?3",
                params![now, trigger_type.as_str(), source],
            )
        })?;
    }

    let mut count = 0;
    for (key, value) in triggers {
        let mut record = TriggerRecord::built_in().with_source(source);
        record.trigger_value = value.clone();
        upsert_trigger(db, trigger_type, key, &record)?;
        count += 1;
    }
    Ok(count)
}

/// Trigger counts by type and source.
pub fn trigger_stats(db: &Database) -> Result<BTreeMap<String, (i64, i64)>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT trigger_type, COUNT(*),
                    SUM(CASE WHEN enabled = 1 THEN 1 ELSE 0 END)
             FROM routing_triggers GROUP BY trigger_type",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    (row.get::<_, i64>(1)?, row.get::<_, i64>(2)?),
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(stats)
    })
}
