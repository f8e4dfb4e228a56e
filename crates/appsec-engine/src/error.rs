//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The rules file does not exist.
    #[error("rules file not found: {}", .0.display())]
    RulesFileNotFound(PathBuf),

    /// The rules file exists but could not be read.
    #[error("failed to read rules file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rules document is not valid.
    #[error("failed to parse rules: {0}")]
    Parsing(String),

    /// Published data is not a map at the top level.
    #[error("invalid object: expected map, got {0}")]
    InvalidObject(&'static str),

    /// Unexpected failure inside a listener.
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error comes from the environment rather than the rules
    /// document itself.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        matches!(self, Self::RulesFileNotFound(_) | Self::Io { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
