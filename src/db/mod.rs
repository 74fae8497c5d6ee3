//! Persistence substrate: a single embedded SQLite store.
//!
//! One file holds all entity families: routing events, trigger
//! dictionaries, artifact and observation lifecycles, scan history, and
//! guidance fulfillment. Connections are per-operation (10 s busy timeout,
//! WAL journal, foreign keys on); writes run inside a transaction that
//! commits on success and rolls back on error.

pub mod artifacts;
pub mod events;
pub mod observations;
pub mod schema;
pub mod triggers;

pub use artifacts::{ArtifactRow, ArtifactStatus, SourceType};
pub use events::{EventStats, RoutingEvent, RoutingEventRecord};
pub use observations::{
    GuidanceType, ImplementationType, ObservationStatus, ObservationType,
};
pub use schema::SCHEMA_VERSION;
pub use triggers::TriggerType;

use crate::error::{Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handle on the unified database file.
///
/// Cheap to clone; each operation opens its own connection, so a handle can
/// be shared freely across workers.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

/// Default database location: `<project_root>/.pongogo/pongogo.db`, falling
/// back to `<home>/.pongogo/pongogo.db` when no project root is known.
pub fn default_db_path(project_root: Option<&Path>) -> PathBuf {
    match project_root {
        Some(root) => root.join(".pongogo").join("pongogo.db"),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pongogo")
            .join("pongogo.db"),
    }
}

impl Database {
    /// Open (creating if needed) the database at an explicit path. Ensures
    /// the containing directory exists, applies the full DDL idempotently,
    /// and records the schema version.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self { db_path };
        db.with_tx(|conn| schema::apply_schema(conn))?;
        Ok(db)
    }

    /// Open the database at its default location for a project root.
    pub fn open_default(project_root: Option<&Path>) -> Result<Self> {
        Self::open(default_db_path(project_root))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Run a read-only operation on a fresh connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.connect()?;
        f(&conn).map_err(Error::from)
    }

    /// Run a write operation inside a transaction. Commits on success,
    /// rolls back on any error.
    pub(crate) fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Stored schema version string.
    pub fn schema_version(&self) -> Result<String> {
        self.with_conn(|conn| schema::schema_version(conn))
    }

    /// Per-table row counts and file size, for diagnostics.
    pub fn stats(&self) -> Result<DatabaseStats> {
        const TABLES: &[&str] = &[
            "routing_events",
            "routing_triggers",
            "artifact_discovered",
            "artifact_implemented",
            "observation_discovered",
            "observation_implemented",
        ];

        let mut table_counts = Vec::new();
        for table in TABLES {
            let count = self.with_conn(|conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
            })?;
            table_counts.push((table.to_string(), count));
        }

        Ok(DatabaseStats {
            schema_version: self.schema_version()?,
            database_path: self.db_path.display().to_string(),
            database_size_bytes: std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0),
            table_counts,
        })
    }
}

/// One appended scan-history row.
#[derive(Debug, Clone, Default)]
pub struct ScanRecord {
    pub scan_type: String,
    pub source_type: String,
    pub files_scanned: i64,
    pub sections_found: i64,
    pub new_discoveries: i64,
    pub updated_discoveries: i64,
    pub duration_ms: Option<i64>,
    pub engine_version: Option<String>,
    pub pongogo_version: Option<String>,
}

impl Database {
    /// Append a repository-scan record to `scan_history`.
    pub fn record_scan(&self, record: &ScanRecord) -> Result<i64> {
        self.with_tx(|conn| {
            conn.execute(
                "INSERT INTO scan_history
                 (scan_date, scan_type, source_type, files_scanned, sections_found,
                  new_discoveries, updated_discoveries, duration_ms, engine_version,
                  pongogo_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    chrono::Utc::now().to_rfc3339(),
                    record.scan_type,
                    record.source_type,
                    record.files_scanned,
                    record.sections_found,
                    record.new_discoveries,
                    record.updated_discoveries,
                    record.duration_ms,
                    record.engine_version,
                    record.pongogo_version,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }
}

/// Diagnostic snapshot of the store.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub schema_version: String,
    pub database_path: String,
    pub database_size_bytes: u64,
    pub table_counts: Vec<(String, i64)>,
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("pongogo.db")).unwrap();
    (dir, db)
}
