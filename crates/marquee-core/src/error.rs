//! Error types for Marquee Core

use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source not playable: {0}")]
    SourceNotPlayable(String),

    #[error("Invalid ad phase transition: {from} -> {to}")]
    InvalidAdTransition { from: String, to: String },

    #[error("Episode index out of range: {index} (have {count})")]
    EpisodeOutOfRange { index: usize, count: usize },

    #[error("Watch time store error: {0}")]
    WatchTimeStore(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
