//! Server configuration loading and project-root resolution.
//!
//! Configuration priority (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file (`PONGOGO_CONFIG_PATH` or `<root>/.pongogo/config.yaml`)
//! 3. Environment overrides (`PONGOGO_KNOWLEDGE_PATH`)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Explicit config file path override.
pub const ENV_CONFIG_PATH: &str = "PONGOGO_CONFIG_PATH";
/// Overrides `knowledge.path` and seeds project-root resolution.
pub const ENV_KNOWLEDGE_PATH: &str = "PONGOGO_KNOWLEDGE_PATH";
/// Explicit project root (takes precedence over all other resolution).
pub const ENV_PROJECT_ROOT: &str = "PONGOGO_PROJECT_ROOT";
/// Reported as the running version.
pub const ENV_VERSION: &str = "PONGOGO_VERSION";

/// Default maximum instructions returned per routing request.
pub const DEFAULT_ROUTING_LIMIT: usize = 5;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub knowledge: KnowledgeConfig,
    pub server: ServerConfig,
}

/// Routing engine selection and feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Engine version (e.g. "durian-0.6.2"); `None` uses the registered default.
    pub engine: Option<String>,
    /// Default routing limit when the caller does not supply one.
    pub limit_default: usize,
    /// Feature flag overrides, validated against the selected engine.
    pub features: BTreeMap<String, bool>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            engine: None,
            limit_default: DEFAULT_ROUTING_LIMIT,
            features: BTreeMap::new(),
        }
    }
}

/// Knowledge base location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Path to the user instruction tree; `None` uses
    /// `<project_root>/.pongogo/instructions`.
    pub path: Option<PathBuf>,
}

/// Server behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Parse a config from YAML text. Missing sections fall back to defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config = serde_yaml::from_str(text)
            .map_err(|e| Error::config(format!("invalid YAML in config file: {e}")))?;
        Ok(config)
    }

    /// Load configuration for a project root.
    ///
    /// An explicit path (argument or `PONGOGO_CONFIG_PATH`) that exists but is
    /// invalid YAML is a hard configuration error. The default config file at
    /// `<root>/.pongogo/config.yaml` is optional, and parse failures there are
    /// logged and ignored.
    pub fn load(explicit_path: Option<&Path>, project_root: &Path) -> Result<Self> {
        let env_path = env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from);
        let explicit = explicit_path.map(Path::to_path_buf).or(env_path);

        let mut config = if let Some(path) = explicit {
            if path.exists() {
                let text = std::fs::read_to_string(&path)?;
                let config = Self::from_yaml(&text)?;
                info!("Loaded configuration from {}", path.display());
                config
            } else {
                warn!("Config file not found (using defaults): {}", path.display());
                Self::default()
            }
        } else {
            let default_path = project_root.join(".pongogo").join("config.yaml");
            if default_path.exists() {
                match std::fs::read_to_string(&default_path)
                    .map_err(Error::from)
                    .and_then(|text| Self::from_yaml(&text))
                {
                    Ok(config) => {
                        info!("Loaded configuration from {}", default_path.display());
                        config
                    }
                    Err(e) => {
                        warn!("Ignoring invalid default config: {e}");
                        Self::default()
                    }
                }
            } else {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        if let Ok(knowledge_override) = env::var(ENV_KNOWLEDGE_PATH) {
            info!("Knowledge path override from env: {knowledge_override}");
            config.knowledge.path = Some(PathBuf::from(knowledge_override));
        }

        Ok(config)
    }

    /// Resolve the user knowledge path for a project root.
    pub fn knowledge_path(&self, project_root: &Path) -> PathBuf {
        match &self.knowledge.path {
            Some(path) => path.clone(),
            None => project_root.join(".pongogo").join("instructions"),
        }
    }
}

/// Resolve the project root from the environment.
///
/// Order: `PONGOGO_PROJECT_ROOT` → nearest ancestor of
/// `PONGOGO_KNOWLEDGE_PATH` containing a `.pongogo` directory → current
/// working directory.
pub fn resolve_project_root() -> PathBuf {
    let explicit = env::var(ENV_PROJECT_ROOT).ok().map(PathBuf::from);
    let knowledge = env::var(ENV_KNOWLEDGE_PATH).ok().map(PathBuf::from);
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    project_root_from(explicit, knowledge, cwd)
}

fn project_root_from(
    explicit: Option<PathBuf>,
    knowledge: Option<PathBuf>,
    cwd: PathBuf,
) -> PathBuf {
    if let Some(root) = explicit {
        return root;
    }

    if let Some(knowledge) = knowledge {
        for ancestor in knowledge.ancestors() {
            if ancestor.join(".pongogo").is_dir() {
                return ancestor.to_path_buf();
            }
        }
    }

    cwd
}

/// The version reported by the running server.
pub fn running_version() -> String {
    env::var(ENV_VERSION).unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}

/// Locate the bundled core instruction tree, if the installation ships one.
///
/// Resolution: `core_instructions/` next to the running executable, falling
/// back to the crate source tree for development runs.
pub fn core_instructions_path() -> Option<PathBuf> {
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join("core_instructions");
            if bundled.is_dir() {
                return Some(bundled);
            }
        }
    }

    let dev = Path::new(env!("CARGO_MANIFEST_DIR")).join("core_instructions");
    dev.is_dir().then_some(dev)
}
