//! Error types for the analysis engine.

use thiserror::Error;

/// Errors raised by a syntax adapter for a single request.
///
/// None of these abort a run; the engine records the file as degraded.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("unsupported file: {0}")]
    Unsupported(String),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {message}")]
    Parse { path: String, message: String },
    #[error("syntax extraction timed out for {0}")]
    Timeout(String),
    #[error("syntax adapter unavailable: {0}")]
    Unavailable(String),
}

/// Fatal engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No file could be registered with the syntax adapter.
    #[error("syntax adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("starting worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Errors raised while loading configuration documents or run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    Malformed { path: String, message: String },
    #[error("invalid run configuration: {0}")]
    Invalid(String),
}
