//! Artifact lifecycle: file-sourced knowledge candidates.
//!
//! Lifecycle: DISCOVERED → REVIEWING → PROMOTED → (optionally) ARCHIVED.
//! Discoveries are deduplicated by SHA-256 content hash; promotion creates a
//! linked `artifact_implemented` row.

use crate::db::Database;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Status in the artifact lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactStatus {
    Discovered,
    Reviewing,
    Promoted,
    Archived,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Reviewing => "REVIEWING",
            Self::Promoted => "PROMOTED",
            Self::Archived => "ARCHIVED",
        }
    }
}

/// Type of source file an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceType {
    ClaudeMd,
    Wiki,
    Docs,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeMd => "CLAUDE_MD",
            Self::Wiki => "WIKI",
            Self::Docs => "DOCS",
            Self::Other => "OTHER",
        }
    }

    /// Instruction category synthesized instructions land in.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ClaudeMd => "project_guidance",
            Self::Wiki => "architecture",
            Self::Docs => "documentation",
            Self::Other => "discovered",
        }
    }
}

/// A discovered artifact row.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRow {
    pub id: i64,
    pub source_file: String,
    pub source_type: String,
    pub section_title: Option<String>,
    pub section_content: String,
    pub content_hash: String,
    pub keywords: Vec<String>,
    pub status: String,
    pub promoted_to: Option<i64>,
    pub discovered_at: String,
}

impl ArtifactRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let keywords_json: Option<String> = row.get(6)?;
        Ok(Self {
            id: row.get(0)?,
            source_file: row.get(1)?,
            source_type: row.get(2)?,
            section_title: row.get(3)?,
            section_content: row.get(4)?,
            content_hash: row.get(5)?,
            keywords: keywords_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
            status: row.get(7)?,
            promoted_to: row.get(8)?,
            discovered_at: row.get(9)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, source_file, source_type, section_title, section_content,
     content_hash, keywords, status, promoted_to, discovered_at";

/// SHA-256 hex digest of a section body.
pub fn content_hash(section_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(section_content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store a newly discovered artifact. Returns the new row id, or `None` when
/// the same content already exists (dedup on content hash).
pub fn store_artifact_discovery(
    db: &Database,
    source_file: &str,
    source_type: SourceType,
    section_content: &str,
    section_title: Option<&str>,
    keywords: &[String],
) -> Result<Option<i64>> {
    let hash = content_hash(section_content);

    let existing: Option<i64> = db.with_conn(|conn| {
        conn.query_row(
            "SELECT id FROM artifact_discovered WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()
    })?;
    if existing.is_some() {
        debug!("Duplicate artifact, skipping: {source_file}");
        return Ok(None);
    }

    let keywords_json = if keywords.is_empty() {
        None
    } else {
        serde_json::to_string(keywords).ok()
    };

    let id = db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO artifact_discovered
             (source_file, source_type, section_title, section_content,
              content_hash, keywords, status, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                source_file,
                source_type.as_str(),
                section_title,
                section_content,
                hash,
                keywords_json,
                ArtifactStatus::Discovered.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    debug!("Stored artifact discovery: {source_file}/{section_title:?}");
    Ok(Some(id))
}

/// Promote a discovered artifact: insert the implemented row and flip the
/// discovery status with a link to it. Returns the implemented row id, or
/// `None` when the discovery does not exist.
pub fn promote_artifact(
    db: &Database,
    discovered_id: i64,
    instruction_file: &str,
    instruction_id: Option<&str>,
    instruction_category: Option<&str>,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<Option<i64>> {
    let discovered = db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM artifact_discovered WHERE id = ?1"),
            params![discovered_id],
            ArtifactRow::from_row,
        )
        .optional()
    })?;

    let Some(discovered) = discovered else {
        warn!("Artifact not found: {discovered_id}");
        return Ok(None);
    };

    let now = Utc::now().to_rfc3339();
    let word_count = discovered.section_content.split_whitespace().count() as i64;

    let impl_id = db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO artifact_implemented
             (discovered_id, instruction_file, instruction_id, instruction_category,
              content_hash, word_count, title, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'ACTIVE', ?9)",
            params![
                discovered_id,
                instruction_file,
                instruction_id,
                instruction_category,
                discovered.content_hash,
                word_count,
                title.or(discovered.section_title.as_deref()),
                description,
                now,
            ],
        )?;
        let impl_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE artifact_discovered
             SET status = ?1, promoted_to = ?2, promoted_at = ?3
             WHERE id = ?4",
            params![ArtifactStatus::Promoted.as_str(), impl_id, now, discovered_id],
        )?;
        Ok(impl_id)
    })?;

    info!("Promoted artifact {discovered_id} -> {instruction_file}");
    Ok(Some(impl_id))
}

/// Fetch one artifact by id.
pub fn get_artifact(db: &Database, artifact_id: i64) -> Result<Option<ArtifactRow>> {
    db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM artifact_discovered WHERE id = ?1"),
            params![artifact_id],
            ArtifactRow::from_row,
        )
        .optional()
    })
}

/// Artifacts by status, newest first.
pub fn artifacts_by_status(
    db: &Database,
    status: ArtifactStatus,
    source_type: Option<SourceType>,
    limit: usize,
) -> Result<Vec<ArtifactRow>> {
    db.with_conn(|conn| {
        let rows = match source_type {
            Some(source) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM artifact_discovered
                     WHERE status = ?1 AND source_type = ?2
                     ORDER BY discovered_at DESC LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(
                        params![status.as_str(), source.as_str(), limit as i64],
                        ArtifactRow::from_row,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM artifact_discovered
                     WHERE status = ?1
                     ORDER BY discovered_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit as i64], ArtifactRow::from_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
        };
        Ok(rows)
    })
}

/// Archive a discovered artifact with a reason.
pub fn archive_artifact(db: &Database, artifact_id: i64, reason: &str) -> Result<bool> {
    let rows = db.with_tx(|conn| {
        conn.execute(
            "UPDATE artifact_discovered
             SET status = ?1, archived_at = ?2, archive_reason = ?3
             WHERE id = ?4",
            params![
                ArtifactStatus::Archived.as_str(),
                Utc::now().to_rfc3339(),
                reason,
                artifact_id,
            ],
        )
    })?;
    Ok(rows > 0)
}

/// Artifact counts by status and (non-archived) source type.
pub fn artifact_stats(db: &Database) -> Result<(BTreeMap<String, i64>, BTreeMap<String, i64>)> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM artifact_discovered GROUP BY status")?;
        let by_status: BTreeMap<String, i64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT source_type, COUNT(*) FROM artifact_discovered
             WHERE status != 'ARCHIVED' GROUP BY source_type",
        )?;
        let by_source: BTreeMap<String, i64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok((by_status, by_source))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn discover(db: &Database, content: &str) -> Option<i64> {
        store_artifact_discovery(
            db,
            "CLAUDE.md",
            SourceType::ClaudeMd,
            content,
            Some("Build rules"),
            &["build".to_string(), "rules".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_store_and_dedup() {
        let (_dir, db) = test_db();

        let first = discover(&db, "Always build before pushing.");
        assert!(first.is_some());

        // Same section body: no new row.
        let duplicate = discover(&db, "Always build before pushing.");
        assert!(duplicate.is_none());

        let rows = artifacts_by_status(&db, ArtifactStatus::Discovered, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].keywords, vec!["build", "rules"]);
    }

    #[test]
    fn test_promote_links_implementation() {
        let (_dir, db) = test_db();
        let id = discover(&db, "Section body.").unwrap();

        let impl_id = promote_artifact(
            &db,
            id,
            ".pongogo/instructions/_discovered/claude_md_build_rules.instructions.md",
            Some("discovered:build_rules"),
            Some("project_guidance"),
            None,
            Some("Auto-discovered from CLAUDE.md"),
        )
        .unwrap()
        .unwrap();

        let promoted = artifacts_by_status(&db, ArtifactStatus::Promoted, None, 10).unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].promoted_to, Some(impl_id));

        // Exactly one implementation row with that id.
        let count = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM artifact_implemented WHERE id = ?1",
                    params![impl_id],
                    |row| row.get::<_, i64>(0),
                )
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_promote_missing_artifact() {
        let (_dir, db) = test_db();
        assert!(promote_artifact(&db, 999, "f", None, None, None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_archive() {
        let (_dir, db) = test_db();
        let id = discover(&db, "To be archived.").unwrap();

        assert!(archive_artifact(&db, id, "superseded").unwrap());
        assert!(!archive_artifact(&db, 999, "missing").unwrap());

        let (by_status, by_source) = artifact_stats(&db).unwrap();
        assert_eq!(by_status.get("ARCHIVED"), Some(&1));
        // Archived artifacts drop out of the source-type counts.
        assert!(by_source.is_empty());
    }

    #[test]
    fn test_source_type_filter() {
        let (_dir, db) = test_db();
        discover(&db, "claude section");
        store_artifact_discovery(&db, "wiki/Arch.md", SourceType::Wiki, "wiki body", None, &[])
            .unwrap();

        let wiki = artifacts_by_status(
            &db,
            ArtifactStatus::Discovered,
            Some(SourceType::Wiki),
            10,
        )
        .unwrap();
        assert_eq!(wiki.len(), 1);
        assert_eq!(wiki[0].source_type, "WIKI");
    }
}
