//! Pongogo knowledge server entry point.
//!
//! Wires configuration, the instruction store, the routing engine, the
//! persistence substrate, and the hot-reload watcher, then serves JSON-RPC
//! over stdio. Logging goes to stderr so stdout stays a clean transport.

use pongogo::config::{self, Config};
use pongogo::db::Database;
use pongogo::discovery::DiscoveryEngine;
use pongogo::engine::{create_router, register_builtin_engines};
use pongogo::instructions::InstructionStore;
use pongogo::reload::{EngineSnapshot, ReloadController};
use pongogo::server::{rpc, KnowledgeServer};
use std::process::ExitCode;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pongogo-server: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> pongogo::Result<()> {
    let project_root = config::resolve_project_root();
    let config = Config::load(None, &project_root)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "pongogo-knowledge {} starting (project root: {})",
        config::running_version(),
        project_root.display()
    );

    register_builtin_engines();

    let knowledge_path = config.knowledge_path(&project_root);
    let core_path = config::core_instructions_path();

    let db = match Database::open_default(Some(&project_root)) {
        Ok(db) => Some(db),
        Err(e) => {
            warn!("Persistence store unavailable: {e}");
            None
        }
    };

    let discovery = match (&db, project_root.join(".pongogo").exists()) {
        (Some(db), true) => {
            info!("Discovery system initialized for: {}", project_root.display());
            Some(DiscoveryEngine::new(&project_root, db.clone()))
        }
        _ => None,
    };

    let mut store = InstructionStore::new(&knowledge_path, core_path.clone());
    let count = store.load()?;
    info!("Instruction store ready: {count} files");

    let store = Arc::new(store);
    let engine = create_router(Arc::clone(&store), db.clone(), Some(&config))?;
    info!("Routing engine: {}", engine.version());

    let snapshot = Arc::new(RwLock::new(EngineSnapshot {
        store,
        engine: Arc::from(engine),
    }));

    let controller = Arc::new(ReloadController::new(
        Arc::clone(&snapshot),
        &knowledge_path,
        core_path,
        db.clone(),
        config.clone(),
    ));

    // Watch failures are not fatal; routing runs without hot reload.
    let _watcher = match controller.spawn_watcher() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("File watcher unavailable: {e}");
            None
        }
    };

    let server = Arc::new(KnowledgeServer::new(
        snapshot,
        controller,
        db,
        discovery,
        config.routing.limit_default,
    ));

    rpc::run_stdio(server).await?;
    Ok(())
}
