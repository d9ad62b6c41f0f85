//! Error types for sonos-mute

use sonos_presence::PresenceError;
use thiserror::Error;

use crate::logging::LoggingError;

/// Errors that can occur while setting up or configuring the mute service
///
/// Remote device failures are not represented here: they are logged and
/// routed to the failure sink instead of being returned to callers.
#[derive(Error, Debug)]
pub enum MuteError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Presence tracking could not be set up
    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

/// Failure of a single remote action against a device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The device could not be reached
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// The device answered with a fault
    #[error("Device fault {code}: {description}")]
    Fault { code: u16, description: String },

    /// The device answered but the response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The device did not answer in time
    #[error("Action timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for mute service operations
pub type Result<T> = std::result::Result<T, MuteError>;
