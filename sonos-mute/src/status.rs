//! UI-facing status types

use std::fmt;

use serde::{Deserialize, Serialize};
use sonos_presence::{DeviceId, NetworkId};

/// User-visible notice for a toggle that could not start a mute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    NotConnected,
    NoDevicesFound,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NotConnected => write!(f, "Not connected to wi-fi"),
            Notice::NoDevicesFound => write!(f, "No Sonos systems found"),
        }
    }
}

/// One-line summary shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusSummary {
    NoConnectivity,
    NoDevices,
    DevicesFound { count: usize },
    Muted { seconds_remaining: u64 },
}

impl StatusSummary {
    /// Pick the summary for the given facts
    ///
    /// Connectivity is checked first, then an active mute, then devices.
    pub fn from_parts(connected: bool, muted_seconds: Option<u64>, device_count: usize) -> Self {
        if !connected {
            return StatusSummary::NoConnectivity;
        }
        if let Some(seconds_remaining) = muted_seconds {
            return StatusSummary::Muted { seconds_remaining };
        }
        match device_count {
            0 => StatusSummary::NoDevices,
            count => StatusSummary::DevicesFound { count },
        }
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSummary::NoConnectivity => write!(f, "No wi-fi"),
            StatusSummary::NoDevices => write!(f, "No Sonos systems found"),
            StatusSummary::DevicesFound { count: 1 } => write!(f, "Found 1 Sonos system"),
            StatusSummary::DevicesFound { count } => write!(f, "Found {} Sonos systems", count),
            StatusSummary::Muted { seconds_remaining } => {
                write!(f, "Muted. Seconds until unmute: {}", seconds_remaining)
            }
        }
    }
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub network: Option<NetworkId>,
    pub muted: bool,
    pub seconds_until_unmute: Option<u64>,
    pub device_count: usize,
    pub watermark: usize,
    pub summary: StatusSummary,
}

/// Change published to status subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// A mute cycle started on `devices` devices
    Muted { devices: usize, seconds_remaining: u64 },
    /// The running cycle was extended
    Extended { seconds_remaining: u64 },
    /// The cycle ended and devices are being restored
    Unmuted,
    /// Periodic refresh while muted
    Tick { seconds_remaining: u64 },
    NetworkConnected(NetworkId),
    NetworkDisconnected,
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
    Notice(Notice),
}
