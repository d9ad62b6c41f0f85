//! Which network, if any, is currently active

use std::sync::Arc;

use parking_lot::RwLock;
use sonos_presence::NetworkId;

/// Shared view of the active network
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    active: Arc<RwLock<Option<NetworkId>>>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `network` active, returning the network it replaced
    pub fn connect(&self, network: NetworkId) -> Option<NetworkId> {
        self.active.write().replace(network)
    }

    pub fn disconnect(&self) -> Option<NetworkId> {
        self.active.write().take()
    }

    pub fn active(&self) -> Option<NetworkId> {
        self.active.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.active.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_disconnect() {
        let connectivity = Connectivity::new();
        assert!(!connectivity.is_connected());

        assert_eq!(connectivity.connect(NetworkId::new("home")), None);
        assert_eq!(connectivity.active(), Some(NetworkId::new("home")));

        let previous = connectivity.connect(NetworkId::new("office"));
        assert_eq!(previous, Some(NetworkId::new("home")));

        assert_eq!(connectivity.disconnect(), Some(NetworkId::new("office")));
        assert!(!connectivity.is_connected());
    }
}
