//! Routing engines: the versioned scoring pipelines and their registry.
//!
//! An engine transforms a user message plus optional context into a ranked,
//! bounded set of instructions and a small set of action directives. Engines
//! are identified by version string (`durian-...`) and constructed through
//! the factory, which validates the configured version and feature flags:
//!
//! - **durian-0.6.2** — canonical engine, all detection passes
//! - **durian-0.5** — frozen stable snapshot (A/B, rollback)
//! - **durian-00** — frozen baseline (keyword/taxonomy scoring only)

pub mod durian;
pub mod durian_00;
pub mod durian_05;
mod text;
mod types;

pub use text::{extract_intent, extract_keywords};
pub use types::{
    FrictionRiskWatch, GuidanceAction, GuidanceParameters, ProceduralItem, ProceduralWarning,
    PromotedDiscovery, RouteContext, RoutingResult, ScoredInstruction,
};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::instructions::InstructionStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

/// A versioned routing engine.
pub trait RoutingEngine: Send + Sync {
    /// Engine version identifier (e.g. `durian-0.6.2`).
    fn version(&self) -> &'static str;

    /// Human-readable description of the routing approach.
    fn description(&self) -> &'static str;

    /// The resolved feature set this instance runs with.
    fn features(&self) -> &BTreeMap<String, bool>;

    /// Route a message to relevant instructions. Never fails: internal
    /// errors produce an empty result with `routing_analysis.error`.
    fn route(&self, message: &str, context: Option<&RouteContext>, limit: usize) -> RoutingResult;
}

/// Specification for a feature flag an engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: bool,
    pub category: &'static str,
}

impl FeatureSpec {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: bool,
        category: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            default,
            category,
        }
    }
}

/// Everything an engine constructor receives.
pub struct EngineContext {
    pub store: Arc<InstructionStore>,
    /// Persistence handle for lookback and echo detection; optional so
    /// engines degrade gracefully without a store file.
    pub db: Option<Database>,
    /// Fully resolved feature set (defaults overlaid with config).
    pub features: BTreeMap<String, bool>,
}

type EngineConstructor = fn(EngineContext) -> Box<dyn RoutingEngine>;

/// One registered engine version.
#[derive(Clone)]
pub struct EngineEntry {
    pub version: &'static str,
    constructor: EngineConstructor,
    available_features: fn() -> Vec<FeatureSpec>,
}

struct Registry {
    engines: Vec<EngineEntry>,
    default_version: Option<&'static str>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            engines: Vec::new(),
            default_version: None,
        })
    })
}

/// Register an engine version. Later registrations of the same version are
/// ignored (the registry is append-only after startup).
pub fn register_engine(
    version: &'static str,
    constructor: EngineConstructor,
    available_features: fn() -> Vec<FeatureSpec>,
) {
    let mut registry = registry().write().expect("engine registry poisoned");
    if registry.engines.iter().any(|e| e.version == version) {
        return;
    }
    registry.engines.push(EngineEntry {
        version,
        constructor,
        available_features,
    });
}

/// Set the default engine version for the factory.
pub fn set_default_engine(version: &'static str) {
    registry().write().expect("engine registry poisoned").default_version = Some(version);
}

/// The default engine version, falling back to the first registered.
pub fn default_engine_version() -> Result<String> {
    let registry = registry().read().expect("engine registry poisoned");
    if let Some(version) = registry.default_version {
        if registry.engines.iter().any(|e| e.version == version) {
            return Ok(version.to_string());
        }
    }
    registry
        .engines
        .first()
        .map(|e| e.version.to_string())
        .ok_or_else(|| Error::config("No routing engines registered"))
}

/// All registered engine versions, in registration order.
pub fn available_engines() -> Vec<String> {
    registry()
        .read()
        .expect("engine registry poisoned")
        .engines
        .iter()
        .map(|e| e.version.to_string())
        .collect()
}

fn entry_for(version: &str) -> Result<EngineEntry> {
    let registry = registry().read().expect("engine registry poisoned");
    registry
        .engines
        .iter()
        .find(|e| e.version == version)
        .cloned()
        .ok_or_else(|| {
            let available: Vec<&str> = registry.engines.iter().map(|e| e.version).collect();
            Error::config(format!(
                "Unknown routing engine: '{version}'. Available engines: {available:?}"
            ))
        })
}

/// Feature flags available for an engine version.
pub fn engine_features(version: &str) -> Result<Vec<FeatureSpec>> {
    Ok((entry_for(version)?.available_features)())
}

/// Validate submitted feature names against an engine's declared set.
pub fn validate_features(version: &str, features: &BTreeMap<String, bool>) -> Result<()> {
    let available = engine_features(version)?;
    let available_names: Vec<&str> = available.iter().map(|f| f.name).collect();

    for name in features.keys() {
        if !available_names.contains(&name.as_str()) {
            return Err(Error::config(format!(
                "Feature '{name}' is not available for engine '{version}'. \
                 Available features: {available_names:?}"
            )));
        }
    }
    Ok(())
}

/// Factory: create a routing engine from configuration.
///
/// Unknown engine versions and unknown feature names are configuration
/// errors listing what is available.
pub fn create_router(
    store: Arc<InstructionStore>,
    db: Option<Database>,
    config: Option<&Config>,
) -> Result<Box<dyn RoutingEngine>> {
    let default_version = default_engine_version()?;
    let (version, overrides) = match config {
        Some(config) => (
            config
                .routing
                .engine
                .clone()
                .unwrap_or(default_version),
            config.routing.features.clone(),
        ),
        None => (default_version, BTreeMap::new()),
    };

    let entry = entry_for(&version)?;

    let specs = (entry.available_features)();
    if !overrides.is_empty() {
        if specs.is_empty() {
            return Err(Error::config(format!(
                "Engine '{version}' does not support feature flags. \
                 Remove feature overrides or choose a different engine."
            )));
        }
        validate_features(&version, &overrides)?;
    }

    // Defaults overlaid with validated overrides.
    let mut features: BTreeMap<String, bool> = specs
        .iter()
        .map(|spec| (spec.name.to_string(), spec.default))
        .collect();
    features.extend(overrides);

    Ok((entry.constructor)(EngineContext {
        store,
        db,
        features,
    }))
}

static BUILTIN_ENGINES: OnceLock<()> = OnceLock::new();

/// Register the built-in engine versions and set the default. Idempotent;
/// the server binary and tests call this once at startup. Registration
/// order matters only for the no-default fallback; the default pointer is
/// what selects the active engine.
pub fn register_builtin_engines() {
    BUILTIN_ENGINES.get_or_init(|| {
        durian_00::register();
        durian_05::register();
        durian::register();
        set_default_engine(durian::DURIAN_VERSION);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_store() -> Arc<InstructionStore> {
        let dir = TempDir::new().unwrap();
        let mut store = InstructionStore::new(dir.path(), None);
        store.load().unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_registry_roundtrip() {
        register_builtin_engines();
        let store = empty_store();

        for version in available_engines() {
            let mut config = Config::default();
            config.routing.engine = Some(version.clone());
            let engine = create_router(Arc::clone(&store), None, Some(&config)).unwrap();
            assert_eq!(engine.version(), version);
        }
    }

    #[test]
    fn test_default_engine_is_canonical() {
        register_builtin_engines();
        assert_eq!(default_engine_version().unwrap(), durian::DURIAN_VERSION);

        let engine = create_router(empty_store(), None, None).unwrap();
        assert_eq!(engine.version(), durian::DURIAN_VERSION);
    }

    #[test]
    fn test_unknown_engine_lists_available() {
        register_builtin_engines();
        let mut config = Config::default();
        config.routing.engine = Some("durian-9.9".to_string());

        let err = match create_router(empty_store(), None, Some(&config)) {
            Ok(_) => panic!("expected create_router to fail"),
            Err(e) => e,
        };
        let message = err.to_string();
        assert!(message.contains("Unknown routing engine"));
        assert!(message.contains("durian-0.5"));
    }

    #[test]
    fn test_unknown_feature_rejected() {
        register_builtin_engines();
        let mut config = Config::default();
        config
            .routing
            .features
            .insert("telepathy".to_string(), true);

        let err = match create_router(empty_store(), None, Some(&config)) {
            Ok(_) => panic!("expected create_router to fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn test_featureless_engine_rejects_overrides() {
        register_builtin_engines();
        let mut config = Config::default();
        config.routing.engine = Some("durian-00".to_string());
        config
            .routing
            .features
            .insert("foundational".to_string(), false);

        let err = match create_router(empty_store(), None, Some(&config)) {
            Ok(_) => panic!("expected create_router to fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("does not support feature flags"));
    }

    #[test]
    fn test_feature_defaults_merged_with_overrides() {
        register_builtin_engines();
        let mut config = Config::default();
        config
            .routing
            .features
            .insert("foundational".to_string(), false);

        let engine = create_router(empty_store(), None, Some(&config)).unwrap();
        assert_eq!(engine.features().get("foundational"), Some(&false));
        // Untouched flags keep their declared defaults.
        assert_eq!(engine.features().get("approval_suppression"), Some(&true));
    }
}
