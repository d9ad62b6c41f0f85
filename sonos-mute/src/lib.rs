//! # Sonos Mute
//!
//! Temporarily mute every speaker on the network and put each one back the
//! way it was when the time runs out.
//!
//! ## Overview
//!
//! A single [`toggle`](MuteService::toggle) mutes all speakers found on the
//! active network for 30 seconds, remembering each speaker's previous state.
//! Toggling again while muted adds another 30 seconds, up to 9:59 ahead.
//! When the deadline passes, or on [`unmute`](MuteService::unmute), every
//! speaker is restored to its remembered state.
//!
//! Speaker presence is tracked by [`sonos_presence`]: a decaying watermark
//! per network decides whether discovery missed something, and if so a
//! backoff loop keeps searching.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sonos_mute::prelude::*;
//!
//! let service = MuteService::builder(actions, search)
//!     .with_config(MuteConfig::default())
//!     .build()?;
//!
//! service.on_network_changed(NetworkEvent::Connected(NetworkId::new("home-wifi")));
//! service.on_device_appeared(DeviceId::new("uuid:RINCON_000E58A0123401400"), "Kitchen");
//!
//! match service.toggle() {
//!     ToggleOutcome::Muted { devices, .. } => println!("Muted {} speakers", devices),
//!     outcome => println!("{:?}", outcome),
//! }
//! println!("{}", service.current_status_summary());
//! ```
//!
//! ## Architecture
//!
//! - [`device`]: one speaker, async mute get/set through [`RemoteActions`]
//! - [`notifier`]: durable and one-shot change callbacks
//! - [`lifecycle`]: the Idle/Muted state machine with its timer and tick
//! - [`service`]: the owned context wiring everything together

pub mod config;
pub mod connectivity;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod notifier;
pub mod service;
pub mod status;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::MuteConfig;
pub use connectivity::Connectivity;
pub use device::{
    ActionOutput, DeviceContext, DeviceHandle, FailureSink, RemoteAction, RemoteActions,
};
pub use error::{ActionError, MuteError, Result};
pub use lifecycle::{extend_deadline, MuteLifecycle, ToggleOutcome};
pub use logging::{init_logging, init_logging_from_env, init_logging_with_file, LoggingMode};
pub use notifier::ChangeNotifier;
pub use service::{MuteService, MuteServiceBuilder, NetworkEvent};
pub use status::{Notice, StatusChange, StatusSnapshot, StatusSummary};

// Re-export commonly used types from dependencies
pub use sonos_presence::{DeviceId, DeviceSearch, NetworkId, RediscoveryConfig, TaskHost};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ActionError, DeviceHandle, DeviceId, DeviceSearch, MuteConfig, MuteError, MuteService,
        NetworkEvent, NetworkId, RemoteAction, RemoteActions, Result, StatusChange, StatusSummary,
        ToggleOutcome,
    };
}
