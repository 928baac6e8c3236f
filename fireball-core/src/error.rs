//! Error types for fireball-core

use thiserror::Error;

/// Main error type for the fireball-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input file
    #[error("invalid input {path}: {message}")]
    Input { path: String, message: String },

    /// Bad glob pattern for input discovery
    #[error("invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Text-completion provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Extract export or verification failure
    #[error("export error: {0}")]
    Export(String),
}

/// Result type alias for fireball-core
pub type Result<T> = std::result::Result<T, Error>;
