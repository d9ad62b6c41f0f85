//! Identity types for networks and devices

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the local network currently associated with (e.g. an SSID)
///
/// All presence state is partitioned by this key: devices found on one
/// network mean nothing on another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        NetworkId::new(s)
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        NetworkId::new(s)
    }
}

/// Globally unique device identifier (the UPnP UDN)
///
/// Normalized to strip the "uuid:" prefix if present, so identities taken
/// from device descriptions and from discovery headers compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new DeviceId, normalizing the format
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        match id.strip_prefix("uuid:") {
            Some(normalized) => Self(normalized.to_string()),
            None => Self(id),
        }
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId::new(s)
    }
}
