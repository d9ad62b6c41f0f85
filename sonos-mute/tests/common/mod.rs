//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sonos_mute::{
    ActionError, ActionOutput, DeviceId, DeviceSearch, MuteConfig, MuteService, NetworkEvent,
    NetworkId, RemoteAction, RemoteActions, StatusChange,
};

/// A household of speakers answering mute actions from memory
#[derive(Default)]
pub struct Household {
    muted: Mutex<HashMap<DeviceId, bool>>,
    offline: Mutex<Vec<DeviceId>>,
    set_calls: Mutex<HashMap<DeviceId, Vec<bool>>>,
}

impl Household {
    pub fn with_speakers(speakers: &[(&str, bool)]) -> Arc<Self> {
        let household = Self::default();
        for (id, muted) in speakers {
            household.muted.lock().insert(DeviceId::new(*id), *muted);
        }
        Arc::new(household)
    }

    pub fn is_muted(&self, id: &str) -> Option<bool> {
        self.muted.lock().get(&DeviceId::new(id)).copied()
    }

    pub fn take_offline(&self, id: &str) {
        self.offline.lock().push(DeviceId::new(id));
    }

    /// Every SetMute value a speaker received, in order
    pub fn set_calls(&self, id: &str) -> Vec<bool> {
        self.set_calls
            .lock()
            .get(&DeviceId::new(id))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteActions for Household {
    async fn call(&self, device: &DeviceId, action: RemoteAction) -> Result<ActionOutput, ActionError> {
        if self.offline.lock().contains(device) {
            return Err(ActionError::Unreachable(device.to_string()));
        }

        let mut muted = self.muted.lock();
        let state = muted
            .get_mut(device)
            .ok_or_else(|| ActionError::Unreachable(device.to_string()))?;

        match action.name {
            "GetMute" => Ok(HashMap::from([(
                "CurrentMute".to_string(),
                if *state { "1" } else { "0" }.to_string(),
            )])),
            "SetMute" => {
                let desired = action.param("DesiredMute") == Some("1");
                *state = desired;
                self.set_calls
                    .lock()
                    .entry(device.clone())
                    .or_default()
                    .push(desired);
                Ok(HashMap::new())
            }
            other => Err(ActionError::InvalidResponse(format!("Unknown action {}", other))),
        }
    }
}

/// Search that counts how often it was asked to run
#[derive(Default)]
pub struct SearchCounter {
    count: AtomicUsize,
}

impl SearchCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl DeviceSearch for SearchCounter {
    fn search_for_devices(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub service: MuteService,
    pub household: Arc<Household>,
    pub search: Arc<SearchCounter>,
    pub changes: Arc<Mutex<Vec<StatusChange>>>,
}

impl Harness {
    /// Service on network "home" with every household speaker discovered
    pub fn connected(speakers: &[(&str, bool)]) -> Self {
        Self::connected_with(speakers, MuteConfig::default())
    }

    pub fn connected_with(speakers: &[(&str, bool)], config: MuteConfig) -> Self {
        let household = Household::with_speakers(speakers);
        let search = Arc::new(SearchCounter::default());
        let service = MuteService::builder(
            Arc::clone(&household) as Arc<dyn RemoteActions>,
            Arc::clone(&search) as Arc<dyn DeviceSearch>,
        )
        .with_config(config)
        .build()
        .expect("valid test configuration");

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        service.subscribe(move |change| sink.lock().push(change.clone()));

        service.on_network_changed(NetworkEvent::Connected(home()));
        for (id, _) in speakers {
            service.on_device_appeared(DeviceId::new(*id), format!("Speaker {}", id));
        }

        Self {
            service,
            household,
            search,
            changes,
        }
    }

    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().clone()
    }
}

pub fn home() -> NetworkId {
    NetworkId::new("home")
}

pub async fn advance_secs(seconds: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
}
