//! # Sonos Presence
//!
//! Tracks which speakers are present on which network, remembers how many
//! were ever seen, and keeps searching when some go missing.
//!
//! ## Overview
//!
//! Device discovery on home networks is lossy. A speaker that misses a
//! search, reboots or sleeps its radio looks identical to one that was
//! unplugged. This crate separates the two cases with a decaying
//! high-watermark per network: as long as fewer devices are present than
//! were seen recently, discovery is retried with exponential backoff.
//!
//! ## Key Features
//!
//! - **Per-network registry**: devices are partitioned by [`NetworkId`]
//! - **Decaying watermark**: each device count decays independently after 24h without confirmation
//! - **Join burst**: three unconditional searches after joining a network
//! - **Adaptive backoff**: one coalesced retry loop, 10s doubling up to 30min, reset after 1h idle
//! - **Scoped tasks**: everything runs on a [`TaskHost`] that cancels all work on shutdown
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sonos_presence::prelude::*;
//!
//! let host = TaskHost::current()?;
//! let scheduler = RediscoveryScheduler::new(RediscoveryConfig::default(), search, host);
//! let registry: PresenceRegistry<MyHandle> =
//!     PresenceRegistry::new(SeenWatermarks::default(), scheduler);
//!
//! registry.add(&network, DeviceId::new("uuid:RINCON_1"), handle);
//! registry.remove(&network, &DeviceId::new("RINCON_1")); // schedules rediscovery
//! ```

pub mod error;
pub mod model;
pub mod rediscovery;
pub mod registry;
pub mod tasks;
pub mod watermark;

// Re-export main types for convenience
pub use error::{PresenceError, Result};
pub use model::{DeviceId, NetworkId};
pub use rediscovery::{DeviceSearch, PopulationProbe, RediscoveryConfig, RediscoveryScheduler};
pub use registry::{PresenceRegistry, WeakPresenceRegistry};
pub use tasks::{TaskHost, DEFAULT_WORKER_THREADS};
pub use watermark::{SeenWatermark, SeenWatermarks, DEFAULT_DECAY_TIMEOUT};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DeviceId, DeviceSearch, NetworkId, PresenceError, PresenceRegistry, RediscoveryConfig,
        RediscoveryScheduler, Result, SeenWatermarks, TaskHost,
    };
}
