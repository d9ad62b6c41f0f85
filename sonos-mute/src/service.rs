//! The mute service context
//!
//! [`MuteService`] owns every piece of state: connectivity, the presence
//! registry with its watermarks and rediscovery scheduler, the mute
//! lifecycle and the status fan-out. Hosts build one instance, feed it
//! network and discovery events and call [`toggle`](MuteService::toggle).

use std::sync::Arc;

use dashmap::DashMap;
use sonos_presence::{
    DeviceId, DeviceSearch, NetworkId, PresenceRegistry, RediscoveryScheduler, SeenWatermarks,
    TaskHost, WeakPresenceRegistry,
};
use tracing::{debug, info, warn};

use crate::config::MuteConfig;
use crate::connectivity::Connectivity;
use crate::device::{DeviceContext, DeviceHandle, FailureSink, RemoteActions};
use crate::error::Result;
use crate::lifecycle::{MuteLifecycle, ToggleOutcome};
use crate::notifier::ChangeNotifier;
use crate::status::{StatusChange, StatusSnapshot, StatusSummary};

/// Network association change reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected(NetworkId),
    Disconnected,
}

/// Evicts devices after repeated remote failures
struct FailureTracker {
    registry: WeakPresenceRegistry<DeviceHandle>,
    counts: DashMap<DeviceId, u32>,
    threshold: u32,
    status: Arc<ChangeNotifier<StatusChange>>,
}

impl FailureSink for FailureTracker {
    fn on_failure(&self, device: &DeviceHandle) {
        if self.threshold == 0 {
            return;
        }

        let failures = {
            let mut count = self.counts.entry(device.id().clone()).or_insert(0);
            *count += 1;
            *count
        };
        debug!(device = %device.id(), failures, threshold = self.threshold, "Counted device failure");

        if failures < self.threshold {
            return;
        }
        self.counts.remove(device.id());

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if registry.remove(device.network(), device.id()).is_some() {
            warn!(
                device = %device.id(),
                name = %device.name(),
                failures,
                "Evicting unresponsive device"
            );
            self.status.publish(&StatusChange::DeviceRemoved(device.id().clone()));
        }
    }

    fn on_success(&self, device: &DeviceHandle) {
        self.counts.remove(device.id());
    }
}

/// Builder for [`MuteService`]
pub struct MuteServiceBuilder {
    actions: Arc<dyn RemoteActions>,
    search: Arc<dyn DeviceSearch>,
    config: MuteConfig,
    host: Option<TaskHost>,
}

impl MuteServiceBuilder {
    pub fn with_config(mut self, config: MuteConfig) -> Self {
        self.config = config;
        self
    }

    /// Run background work on `host` instead of the default
    pub fn with_task_host(mut self, host: TaskHost) -> Self {
        self.host = Some(host);
        self
    }

    /// Validate the configuration and assemble the service
    ///
    /// Without an explicit task host the ambient tokio runtime is used, or
    /// a dedicated one is built when called outside of any runtime.
    pub fn build(self) -> Result<MuteService> {
        self.config.validate()?;

        let host = match self.host {
            Some(host) => host,
            None => match TaskHost::current() {
                Ok(host) => host,
                Err(_) => TaskHost::with_worker_threads(self.config.worker_threads)?,
            },
        };

        let status = Arc::new(ChangeNotifier::new());
        let connectivity = Connectivity::new();
        let scheduler = RediscoveryScheduler::new(self.config.rediscovery.clone(), self.search, host.clone());
        let registry = PresenceRegistry::new(SeenWatermarks::new(self.config.watermark_timeout), scheduler);

        let failures = Arc::new(FailureTracker {
            registry: registry.downgrade(),
            counts: DashMap::new(),
            threshold: self.config.failures_before_eviction,
            status: Arc::clone(&status),
        });

        let devices = DeviceContext {
            actions: self.actions,
            failures: failures as Arc<dyn FailureSink>,
            host: host.clone(),
            action_timeout: self.config.action_timeout,
        };

        let lifecycle = MuteLifecycle::new(
            self.config.clone(),
            registry.clone(),
            connectivity.clone(),
            Arc::clone(&status),
            host.clone(),
        );

        info!(
            mute_length = ?self.config.mute_length,
            failures_before_eviction = self.config.failures_before_eviction,
            "Mute service ready"
        );

        Ok(MuteService {
            config: self.config,
            host,
            connectivity,
            registry,
            lifecycle,
            status,
            devices,
        })
    }
}

/// Owned context for the whole mute system
pub struct MuteService {
    config: MuteConfig,
    host: TaskHost,
    connectivity: Connectivity,
    registry: PresenceRegistry<DeviceHandle>,
    lifecycle: MuteLifecycle,
    status: Arc<ChangeNotifier<StatusChange>>,
    devices: DeviceContext,
}

impl MuteService {
    pub fn builder(actions: Arc<dyn RemoteActions>, search: Arc<dyn DeviceSearch>) -> MuteServiceBuilder {
        MuteServiceBuilder {
            actions,
            search,
            config: MuteConfig::default(),
            host: None,
        }
    }

    // ------------------------------------------------------------------
    // Events from the host
    // ------------------------------------------------------------------

    /// The host joined or left a network
    pub fn on_network_changed(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected(network) => {
                match self.connectivity.connect(network.clone()) {
                    Some(previous) if previous != network => {
                        info!(from = %previous, to = %network, "Switched networks");
                    }
                    _ => info!(network = %network, "Network connected"),
                }

                self.registry.ensure_network(&network);
                self.registry.rediscovery().on_network_joined(&network);
                self.status.publish(&StatusChange::NetworkConnected(network));
            }
            NetworkEvent::Disconnected => {
                if let Some(network) = self.connectivity.disconnect() {
                    info!(network = %network, "Network disconnected");
                    self.status.publish(&StatusChange::NetworkDisconnected);
                }
            }
        }
    }

    /// Discovery found a device on the active network
    pub fn on_device_appeared(&self, id: DeviceId, name: impl Into<String>) {
        let Some(network) = self.connectivity.active() else {
            warn!(device = %id, "Device appeared while not connected, ignoring");
            return;
        };

        let (handle, is_new) = match self.registry.get(&network, &id) {
            Some(existing) => (existing, false),
            None => (
                DeviceHandle::new(id.clone(), network.clone(), name, self.devices.clone()),
                true,
            ),
        };

        self.registry.add(&network, id.clone(), handle);
        if is_new {
            self.status.publish(&StatusChange::DeviceAdded(id));
        }
    }

    /// Discovery reported a device gone
    ///
    /// The device is dropped from whichever network holds it. Only the
    /// active network is re-checked for missing devices.
    pub fn on_device_disappeared(&self, id: &DeviceId) {
        let active = self.connectivity.active();
        let mut removed = false;
        for network in self.registry.networks_with(id) {
            let handle = if active.as_ref() == Some(&network) {
                self.registry.remove(&network, id)
            } else {
                debug!(device = %id, network = %network, "Device left a network we are no longer on");
                self.registry.forget(&network, id)
            };
            removed |= handle.is_some();
        }

        if removed {
            self.status.publish(&StatusChange::DeviceRemoved(id.clone()));
        } else {
            debug!(device = %id, "Unknown device disappeared, ignoring");
        }
    }

    /// Discovery failed to reach a device it expected
    ///
    /// Treated as a disappearance, and the population is re-checked even if
    /// the device never made it into the registry.
    pub fn on_discovery_failed(&self, id: &DeviceId) {
        let Some(network) = self.connectivity.active() else {
            return;
        };

        warn!(device = %id, "Discovery failed for device");
        if self.registry.remove(&network, id).is_some() {
            self.status.publish(&StatusChange::DeviceRemoved(id.clone()));
        } else {
            self.registry.check_population(&network);
        }
    }

    /// The discovery transport came up, already knowing `known` devices
    pub fn on_transport_connected(&self, known: Vec<(DeviceId, String)>) {
        debug!(known = known.len(), "Discovery transport connected");
        for (id, name) in known {
            self.on_device_appeared(id, name);
        }
        self.registry.rediscovery().search_now();
    }

    /// The discovery transport went away; its devices are no longer reachable
    pub fn on_transport_lost(&self) {
        if let Some(network) = self.connectivity.active() {
            let cleared = self.registry.clear(&network);
            info!(network = %network, cleared, "Discovery transport lost");
        }
    }

    /// A device pushed its current mute state
    pub fn on_mute_event(&self, id: &DeviceId, muted: bool) {
        let device = self
            .connectivity
            .active()
            .and_then(|network| self.registry.get(&network, id));
        match device {
            Some(device) => {
                device.observe_mute_event(muted);
            }
            None => debug!(device = %id, "Mute event from unknown device"),
        }
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    pub fn toggle(&self) -> ToggleOutcome {
        self.lifecycle.toggle()
    }

    /// End the running mute cycle now; `false` if nothing was muted
    pub fn unmute(&self) -> bool {
        self.lifecycle.unmute()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_status_summary(&self) -> StatusSummary {
        StatusSummary::from_parts(
            self.is_connected(),
            self.seconds_until_unmute(),
            self.device_count(),
        )
    }

    pub fn status(&self) -> StatusSnapshot {
        let network = self.connectivity.active();
        let seconds_until_unmute = self.seconds_until_unmute();
        let (device_count, watermark) = network
            .as_ref()
            .map(|n| (self.registry.size(n), self.registry.watermark_max(n)))
            .unwrap_or((0, 0));

        StatusSnapshot {
            summary: StatusSummary::from_parts(network.is_some(), seconds_until_unmute, device_count),
            network,
            muted: seconds_until_unmute.is_some(),
            seconds_until_unmute,
            device_count,
            watermark,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.lifecycle.is_muted()
    }

    pub fn seconds_until_unmute(&self) -> Option<u64> {
        self.lifecycle.seconds_until_unmute()
    }

    /// Devices present on the active network
    pub fn device_count(&self) -> usize {
        self.connectivity
            .active()
            .map_or(0, |network| self.registry.size(&network))
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn active_network(&self) -> Option<NetworkId> {
        self.connectivity.active()
    }

    /// Devices present on the active network, ordered by identity
    pub fn devices(&self) -> Vec<DeviceHandle> {
        let mut devices = self
            .connectivity
            .active()
            .map(|network| self.registry.snapshot(&network))
            .unwrap_or_default();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    /// Subscribe to every status change
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.status.subscribe(callback);
    }

    /// Subscribe to the next status change only
    pub fn subscribe_once<F>(&self, callback: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.status.subscribe_once(callback);
    }

    pub fn config(&self) -> &MuteConfig {
        &self.config
    }

    pub fn registry(&self) -> &PresenceRegistry<DeviceHandle> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &MuteLifecycle {
        &self.lifecycle
    }

    pub fn task_host(&self) -> &TaskHost {
        &self.host
    }

    /// Cancel all background work
    ///
    /// A running mute cycle is dropped without restoring devices.
    pub fn shutdown(&self) {
        if self.lifecycle.is_muted() {
            warn!("Shutting down while muted, devices stay muted");
        }
        self.lifecycle.abandon();
        self.host.shutdown();
    }
}

impl std::fmt::Debug for MuteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuteService")
            .field("network", &self.connectivity.active())
            .field("lifecycle", &self.lifecycle)
            .field("host", &self.host)
            .finish()
    }
}
