//! # pongogo
//!
//! A knowledge-routing server for coding agents: intercepts developer-agent
//! prompts and injects the most relevant subset of a curated instruction
//! corpus into the agent's context.
//!
//! ## Core Components
//!
//! - **Instructions**: load, parse, and index Markdown-with-frontmatter
//!   instruction files, with a protected bundled core shadowing user files
//! - **Engine**: versioned, feature-flagged scoring pipelines producing
//!   ranked instructions and action directives
//! - **Patterns**: compiled pattern libraries backing the detection passes
//! - **Db**: embedded SQLite substrate for routing events, trigger
//!   dictionaries, and the artifact/observation lifecycles
//! - **Reload**: debounced filesystem watcher with atomic store/engine swap
//! - **Server**: tool surface and stdio JSON-RPC transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use pongogo::engine::{create_router, register_builtin_engines};
//! use pongogo::instructions::InstructionStore;
//! use std::sync::Arc;
//!
//! register_builtin_engines();
//! let mut store = InstructionStore::new(".pongogo/instructions", None);
//! store.load()?;
//! let engine = create_router(Arc::new(store), None, None)?;
//!
//! let result = engine.route("fix this bug", None, 5);
//! println!("routed {} instructions", result.count);
//! ```

pub mod config;
pub mod db;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod instructions;
pub mod patterns;
pub mod reload;
pub mod server;

// Re-exports for convenience
pub use config::{resolve_project_root, running_version, Config};
pub use db::{Database, RoutingEventRecord};
pub use discovery::DiscoveryEngine;
pub use engine::{
    available_engines, create_router, register_builtin_engines, FeatureSpec, RouteContext,
    RoutingEngine, RoutingResult,
};
pub use error::{Error, Result};
pub use instructions::{Instruction, InstructionStore};
pub use reload::{EngineSnapshot, ReloadController, SharedSnapshot, WatcherHandle};
pub use server::KnowledgeServer;
