//! CLI error types and conversions

use std::path::PathBuf;

use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::engine::EngineError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Engine error
    #[error("engine error: {0}")]
    EngineError(#[from] EngineError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// Input or output file could not be read or written
    #[error("failed to access {}: {source}", .path.display())]
    FileError {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Input file is not valid JSON of the expected shape
    #[error("invalid JSON in {}: {source}", .path.display())]
    JsonError {
        /// File involved
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// Audit trail could not be written
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Command ran but part of the work failed
    #[error("{0}")]
    Incomplete(String),
}

impl CliError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::FileError {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        CliError::JsonError {
            path: path.into(),
            source,
        }
    }
}
