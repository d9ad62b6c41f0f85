//! Per-network registry of currently present devices
//!
//! Devices are keyed by [`DeviceId`] within each [`NetworkId`]. Every
//! addition feeds the network's [`SeenWatermark`](crate::SeenWatermark);
//! every removal compares the registry against it and, if devices look
//! missing, asks the [`RediscoveryScheduler`] for a retry loop.
//!
//! Locks are always taken in the order scheduler, network, watermark, and
//! none of them is held while calling out to device handles.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::model::{DeviceId, NetworkId};
use crate::rediscovery::{PopulationProbe, RediscoveryScheduler};
use crate::watermark::SeenWatermarks;

type DeviceTable<H> = Arc<Mutex<HashMap<DeviceId, H>>>;

struct RegistryInner<H> {
    networks: DashMap<NetworkId, DeviceTable<H>>,
    watermarks: SeenWatermarks,
    rediscovery: RediscoveryScheduler,
}

impl<H> RegistryInner<H> {
    fn table(&self, network: &NetworkId) -> Option<DeviceTable<H>> {
        self.networks.get(network).map(|entry| Arc::clone(entry.value()))
    }

    fn table_or_insert(&self, network: &NetworkId) -> DeviceTable<H> {
        Arc::clone(
            self.networks
                .entry(network.clone())
                .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
                .value(),
        )
    }

    fn size(&self, network: &NetworkId) -> usize {
        self.table(network).map_or(0, |table| table.lock().len())
    }
}

impl<H: Send + Sync + 'static> PopulationProbe for RegistryInner<H> {
    fn is_complete(&self, network: &NetworkId) -> bool {
        let size = self.size(network);
        size >= self.watermarks.max(network)
    }
}

/// Registry of present devices, generic over the device handle type
///
/// Cloning is cheap and yields another view of the same registry.
pub struct PresenceRegistry<H> {
    inner: Arc<RegistryInner<H>>,
}

impl<H> Clone for PresenceRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> PresenceRegistry<H>
where
    H: Clone + Send + Sync + 'static,
{
    pub fn new(watermarks: SeenWatermarks, rediscovery: RediscoveryScheduler) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                networks: DashMap::new(),
                watermarks,
                rediscovery,
            }),
        }
    }

    /// Make sure `network` has a watermark, creating an empty one if needed
    pub fn ensure_network(&self, network: &NetworkId) {
        self.inner.watermarks.ensure(network);
    }

    /// Insert or replace a device, returning the handle it replaced
    ///
    /// The resulting device count is recorded against the network's
    /// watermark.
    pub fn add(&self, network: &NetworkId, id: DeviceId, handle: H) -> Option<H> {
        let table = self.inner.table_or_insert(network);
        let mut devices = table.lock();
        let previous = devices.insert(id.clone(), handle);
        let size = devices.len();
        self.inner.watermarks.seen(network, size);
        drop(devices);

        if previous.is_none() {
            debug!(network = %network, device = %id, size, "Device added");
        }
        previous
    }

    /// Remove a device, checking afterwards whether the network looks short
    pub fn remove(&self, network: &NetworkId, id: &DeviceId) -> Option<H> {
        let removed = self.forget(network, id);
        if removed.is_some() {
            self.check_population(network);
        }
        removed
    }

    /// Remove a device without scheduling any rediscovery
    ///
    /// Used for networks the host is no longer on, where a search would
    /// not reach them anyway.
    pub fn forget(&self, network: &NetworkId, id: &DeviceId) -> Option<H> {
        let removed = self
            .inner
            .table(network)
            .and_then(|table| table.lock().remove(id));
        if removed.is_some() {
            debug!(network = %network, device = %id, "Device removed");
        }
        removed
    }

    /// Every network currently holding `id`
    pub fn networks_with(&self, id: &DeviceId) -> Vec<NetworkId> {
        let tables: Vec<_> = self
            .inner
            .networks
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut networks: Vec<_> = tables
            .into_iter()
            .filter(|(_, table)| table.lock().contains_key(id))
            .map(|(network, _)| network)
            .collect();
        networks.sort();
        networks
    }

    /// Compare the registry against the watermark and schedule a retry
    /// loop if devices are missing
    ///
    /// Returns `true` if devices are missing.
    pub fn check_population(&self, network: &NetworkId) -> bool {
        let size = self.inner.size(network);
        let expected = self.inner.watermarks.max(network);
        if size >= expected {
            return false;
        }

        info!(
            network = %network,
            size,
            expected,
            "Lost a device, scheduling rediscovery"
        );

        let probe: Weak<dyn PopulationProbe> = Arc::downgrade(&self.inner) as Weak<dyn PopulationProbe>;
        self.inner.rediscovery.request(network.clone(), probe);
        true
    }

    /// Number of devices currently present on `network`
    pub fn size(&self, network: &NetworkId) -> usize {
        self.inner.size(network)
    }

    /// Copy of every handle present on `network`
    pub fn snapshot(&self, network: &NetworkId) -> Vec<H> {
        self.inner
            .table(network)
            .map(|table| table.lock().values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, network: &NetworkId, id: &DeviceId) -> Option<H> {
        self.inner
            .table(network)
            .and_then(|table| table.lock().get(id).cloned())
    }

    pub fn contains(&self, network: &NetworkId, id: &DeviceId) -> bool {
        self.inner
            .table(network)
            .is_some_and(|table| table.lock().contains_key(id))
    }

    /// Drop every device on `network`, leaving its watermark untouched
    ///
    /// Returns how many devices were dropped.
    pub fn clear(&self, network: &NetworkId) -> usize {
        let cleared = self
            .inner
            .table(network)
            .map_or(0, |table| table.lock().drain().count());
        if cleared > 0 {
            debug!(network = %network, cleared, "Cleared devices");
        }
        cleared
    }

    /// Decayed watermark for `network`
    pub fn watermark_max(&self, network: &NetworkId) -> usize {
        self.inner.watermarks.max(network)
    }

    pub fn is_complete(&self, network: &NetworkId) -> bool {
        self.inner.is_complete(network)
    }

    pub fn rediscovery(&self) -> &RediscoveryScheduler {
        &self.inner.rediscovery
    }

    pub fn downgrade(&self) -> WeakPresenceRegistry<H> {
        WeakPresenceRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<H> std::fmt::Debug for PresenceRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceRegistry")
            .field("networks", &self.inner.networks.len())
            .field("rediscovery", &self.inner.rediscovery)
            .finish()
    }
}

/// Non-owning reference to a [`PresenceRegistry`]
pub struct WeakPresenceRegistry<H> {
    inner: Weak<RegistryInner<H>>,
}

impl<H> Clone for WeakPresenceRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<H> WeakPresenceRegistry<H> {
    pub fn upgrade(&self) -> Option<PresenceRegistry<H>> {
        self.inner.upgrade().map(|inner| PresenceRegistry { inner })
    }
}
