//! Error types for pongogo.

use thiserror::Error;

/// Result type alias using pongogo's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during routing and storage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (unknown engine, unknown feature, invalid YAML)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence substrate error
    #[error("Database error: {0}")]
    Database(String),

    /// Instruction file could not be parsed
    #[error("Instruction parse error in {path}: {message}")]
    InstructionParse { path: String, message: String },

    /// Routing internal error (caught at the engine boundary)
    #[error("Routing error: {0}")]
    Routing(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an instruction parse error.
    pub fn instruction_parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InstructionParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a routing error.
    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
