//! Custom error types for talk-codebase
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations.

use thiserror::Error;

/// Application-specific errors for talk-codebase
#[derive(Error, Debug)]
pub enum TalkError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing a required value or holds an invalid one.
    /// Fatal when raised while a session is starting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding model failed to load or embed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operations failed
    #[error("Index error: {0}")]
    Index(String),

    /// Language model request failed
    #[error("Model error: {0}")]
    Model(String),

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// No index exists at the expected location
    #[error("No vector store found")]
    NoIndex,

    /// Protocol output did not follow the record/terminator framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid file or directory path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl TalkError {
    /// True for errors that must stop a session before it starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TalkError>;
