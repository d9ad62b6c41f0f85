//! Error types for sonos-presence

use thiserror::Error;

/// Errors that can occur while setting up presence tracking
#[derive(Error, Debug)]
pub enum PresenceError {
    /// No tokio runtime is running on the calling thread
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The dedicated worker runtime could not be built
    #[error("Failed to build worker runtime: {0}")]
    RuntimeBuild(#[from] std::io::Error),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for presence operations
pub type Result<T> = std::result::Result<T, PresenceError>;
