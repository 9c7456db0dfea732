//! Error types for the module registry

use std::path::PathBuf;

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry errors
///
/// These are failures of a whole operation. Problems confined to a single
/// module during aggregation are reported as [`crate::report::Diagnostic`]s
/// instead, so one bad module never stops the scan.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Cannot read modules directory {path}: {source}")]
    Structural {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No versions found for {0}")]
    NoVersions(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Unsupported source reference: {0}")]
    UnsupportedReference(String),

    #[error("No source file found in gist {gist_id}")]
    NoSourceFile { gist_id: String },

    #[error("Multiple source files found: {}. Specify which one to use.", candidates.join(", "))]
    AmbiguousSourceFile { candidates: Vec<String> },

    #[error("File {file} not found. Available files: {}", available.join(", "))]
    FileNotFound { file: String, available: Vec<String> },

    #[error("No commits found in gist {0}")]
    NoCommits(String),

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}
