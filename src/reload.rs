//! Hot-reload controller: debounced watcher, atomic swap, manual reindex.
//!
//! A filesystem observer watches the user knowledge root for
//! `*.instructions.md` changes (create/modify/delete/move only; pure reads
//! are ignored). Qualifying events reset a sliding debounce timer; when it
//! elapses a full reindex runs. The new store and engine are built off-lock
//! and then swapped together, so in-flight requests keep their snapshot
//! until return.

use crate::config::Config;
use crate::db::Database;
use crate::engine::{create_router, RoutingEngine};
use crate::error::{Error, Result};
use crate::instructions::InstructionStore;
use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sliding debounce window for filesystem events.
pub const DEBOUNCE: Duration = Duration::from_secs(3);

/// Minimum interval between manual reindexes (bypass with `force`).
pub const MIN_MANUAL_REINDEX_INTERVAL: Duration = Duration::from_secs(10);

/// The read-shared, writer-exclusive-on-swap routing state.
pub struct EngineSnapshot {
    pub store: Arc<InstructionStore>,
    pub engine: Arc<dyn RoutingEngine>,
}

/// Shared handle to the current snapshot.
pub type SharedSnapshot = Arc<RwLock<EngineSnapshot>>;

/// Result of a reindex request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReindexOutcome {
    Completed {
        success: bool,
        old_count: usize,
        new_count: usize,
        elapsed_ms: f64,
        engine: String,
        timestamp: String,
    },
    Skipped {
        success: bool,
        skipped: bool,
        reason: String,
        wait_seconds: f64,
        hint: String,
    },
    Failed {
        success: bool,
        error: String,
        timestamp: String,
    },
}

/// Rebuilds the store and engine and swaps them atomically.
pub struct ReloadController {
    snapshot: SharedSnapshot,
    knowledge_root: PathBuf,
    core_root: Option<PathBuf>,
    db: Option<Database>,
    config: Config,
    debounce: Duration,
    /// Serializes the swap; the load itself runs unlocked.
    reindex_lock: Mutex<()>,
    last_manual_reindex: Mutex<Option<Instant>>,
}

impl ReloadController {
    pub fn new(
        snapshot: SharedSnapshot,
        knowledge_root: impl Into<PathBuf>,
        core_root: Option<PathBuf>,
        db: Option<Database>,
        config: Config,
    ) -> Self {
        Self {
            snapshot,
            knowledge_root: knowledge_root.into(),
            core_root,
            db,
            config,
            debounce: DEBOUNCE,
            reindex_lock: Mutex::new(()),
            last_manual_reindex: Mutex::new(None),
        }
    }

    /// Override the debounce window (tests).
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Reindex now: build a fresh store and engine, then swap both under the
    /// write lock. Callers mid-request continue on their old snapshot.
    pub fn reindex(&self) -> ReindexOutcome {
        let _guard = self.reindex_lock.lock().expect("reindex lock poisoned");
        let start = Instant::now();
        info!("=== Starting knowledge base reindex ===");

        let mut new_store = InstructionStore::new(&self.knowledge_root, self.core_root.clone());
        let new_count = match new_store.load() {
            Ok(count) => count,
            Err(e) => return self.fail(e),
        };
        let new_store = Arc::new(new_store);

        let new_engine = match create_router(
            Arc::clone(&new_store),
            self.db.clone(),
            Some(&self.config),
        ) {
            Ok(engine) => engine,
            Err(e) => return self.fail(e),
        };
        let engine_version = new_engine.version().to_string();

        let old_count;
        {
            let mut snapshot = self.snapshot.write().expect("snapshot lock poisoned");
            old_count = snapshot.store.len();
            snapshot.store = new_store;
            snapshot.engine = Arc::from(new_engine);
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "=== Reindex complete: {old_count} -> {new_count} instructions \
             (engine: {engine_version}, {elapsed_ms:.1}ms) ==="
        );

        ReindexOutcome::Completed {
            success: true,
            old_count,
            new_count,
            elapsed_ms,
            engine: engine_version,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn fail(&self, e: Error) -> ReindexOutcome {
        error!("Reindex failed: {e}");
        ReindexOutcome::Failed {
            success: false,
            error: e.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Manual reindex with spam prevention: a 10 s floor between calls,
    /// bypassable with `force`. A skip is a structured result, not an error.
    pub fn manual_reindex(&self, force: bool) -> ReindexOutcome {
        info!("Manual reindex requested (force={force})");

        if !force {
            let last = self
                .last_manual_reindex
                .lock()
                .expect("manual reindex lock poisoned");
            if let Some(last) = *last {
                let since = last.elapsed();
                if since < MIN_MANUAL_REINDEX_INTERVAL {
                    let wait = (MIN_MANUAL_REINDEX_INTERVAL - since).as_secs_f64();
                    let wait = (wait * 10.0).round() / 10.0;
                    warn!("Manual reindex skipped (spam prevention): wait {wait:.1}s");
                    return ReindexOutcome::Skipped {
                        success: false,
                        skipped: true,
                        reason: "spam_prevention".to_string(),
                        wait_seconds: wait,
                        hint: format!("Wait {wait:.1}s or use force=true to bypass"),
                    };
                }
            }
        }

        let outcome = self.reindex();
        if matches!(outcome, ReindexOutcome::Completed { .. }) {
            *self
                .last_manual_reindex
                .lock()
                .expect("manual reindex lock poisoned") = Some(Instant::now());
        }
        outcome
    }

    /// Start the filesystem observer and the debounce worker. The returned
    /// handle owns the watcher; dropping it stops observation.
    pub fn spawn_watcher(self: &Arc<Self>) -> Result<WatcherHandle> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if !is_mutation(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if is_instruction_file(&path) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => warn!("File watch error: {e}"),
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        watcher
            .watch(&self.knowledge_root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(e.to_string()))?;
        info!("Watching {} for instruction changes", self.knowledge_root.display());

        let controller = Arc::clone(self);
        let task = tokio::spawn(debounce_loop(controller, rx));

        Ok(WatcherHandle {
            _watcher: watcher,
            task,
        })
    }
}

/// Owns the running observer and its debounce task.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Only create/modify/delete/move count; access (pure read) events never
/// trigger a reload.
fn is_mutation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_instruction_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.ends_with(".instructions.md"))
}

/// Sliding-timer debounce: each qualifying event resets the window; when it
/// elapses one reindex runs and the pending set clears.
async fn debounce_loop(controller: Arc<ReloadController>, mut rx: mpsc::UnboundedReceiver<PathBuf>) {
    let mut pending: HashSet<PathBuf> = HashSet::new();

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(path) => {
                    info!("File changed: {}", path.display());
                    pending.insert(path);
                }
                None => break,
            }
        } else {
            match tokio::time::timeout(controller.debounce, rx.recv()).await {
                Ok(Some(path)) => {
                    pending.insert(path);
                }
                Ok(None) => break,
                Err(_) => {
                    info!(
                        "Debounce period complete - triggering reindex ({} file(s) changed)",
                        pending.len()
                    );
                    pending.clear();
                    let controller = Arc::clone(&controller);
                    let _ = tokio::task::spawn_blocking(move || controller.reindex()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::register_builtin_engines;
    use std::fs;
    use tempfile::TempDir;

    fn write_instruction(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn setup(dir: &TempDir) -> (SharedSnapshot, Arc<ReloadController>) {
        register_builtin_engines();
        let kb = dir.path().join("instructions");
        fs::create_dir_all(&kb).unwrap();
        write_instruction(
            &kb,
            "github/one.instructions.md",
            "---\nid: github/one\n---\nbody\n",
        );

        let mut store = InstructionStore::new(&kb, None);
        store.load().unwrap();
        let store = Arc::new(store);
        let engine = create_router(Arc::clone(&store), None, None).unwrap();
        let snapshot = Arc::new(RwLock::new(EngineSnapshot {
            store,
            engine: Arc::from(engine),
        }));

        let controller = Arc::new(ReloadController::new(
            Arc::clone(&snapshot),
            kb,
            None,
            None,
            Config::default(),
        ));
        (snapshot, controller)
    }

    #[test]
    fn test_reindex_swaps_store_and_engine() {
        let dir = TempDir::new().unwrap();
        let (snapshot, controller) = setup(&dir);
        assert_eq!(snapshot.read().unwrap().store.len(), 1);

        write_instruction(
            &dir.path().join("instructions"),
            "github/two.instructions.md",
            "---\nid: github/two\n---\nbody\n",
        );

        let outcome = controller.reindex();
        match outcome {
            ReindexOutcome::Completed {
                success,
                old_count,
                new_count,
                engine,
                ..
            } => {
                assert!(success);
                assert_eq!(old_count, 1);
                assert_eq!(new_count, 2);
                assert_eq!(engine, snapshot.read().unwrap().engine.version());
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(snapshot.read().unwrap().store.len(), 2);
    }

    #[test]
    fn test_reindex_respects_configured_engine() {
        let dir = TempDir::new().unwrap();
        let (snapshot, _) = setup(&dir);

        let mut config = Config::default();
        config.routing.engine = Some("durian-0.5".to_string());
        let controller = ReloadController::new(
            Arc::clone(&snapshot),
            dir.path().join("instructions"),
            None,
            None,
            config,
        );

        controller.reindex();
        assert_eq!(snapshot.read().unwrap().engine.version(), "durian-0.5");
    }

    #[test]
    fn test_manual_reindex_spam_prevention() {
        let dir = TempDir::new().unwrap();
        let (_snapshot, controller) = setup(&dir);

        assert!(matches!(
            controller.manual_reindex(false),
            ReindexOutcome::Completed { .. }
        ));

        // Second call inside the 10 s window is skipped, not an error.
        match controller.manual_reindex(false) {
            ReindexOutcome::Skipped {
                success,
                skipped,
                reason,
                wait_seconds,
                ..
            } => {
                assert!(!success);
                assert!(skipped);
                assert_eq!(reason, "spam_prevention");
                assert!(wait_seconds > 0.0);
            }
            other => panic!("expected skip, got {other:?}"),
        }

        // Force bypasses the floor.
        assert!(matches!(
            controller.manual_reindex(true),
            ReindexOutcome::Completed { .. }
        ));
    }

    #[test]
    fn test_is_instruction_file_filter() {
        assert!(is_instruction_file(Path::new("/kb/a/x.instructions.md")));
        assert!(!is_instruction_file(Path::new("/kb/a/x.md")));
        assert!(!is_instruction_file(Path::new("/kb/a/instructions")));
    }

    #[tokio::test]
    async fn test_watcher_debounced_reload() {
        let dir = TempDir::new().unwrap();
        let (snapshot, controller) = setup(&dir);
        let controller = Arc::new(
            Arc::try_unwrap(controller)
                .unwrap_or_else(|arc| panic!("controller still shared: {}", Arc::strong_count(&arc)))
                .with_debounce(Duration::from_millis(100)),
        );

        let _handle = controller.spawn_watcher().unwrap();

        // A burst of writes lands one debounced reload.
        let kb = dir.path().join("instructions");
        write_instruction(&kb, "github/two.instructions.md", "---\nid: github/two\n---\nb\n");
        write_instruction(&kb, "github/three.instructions.md", "---\nid: github/three\n---\nb\n");
        // Non-instruction files are ignored by the filter.
        fs::write(kb.join("notes.md"), "ignored").unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(snapshot.read().unwrap().store.len(), 3);
    }
}
