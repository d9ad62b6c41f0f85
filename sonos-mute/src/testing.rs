//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sonos_presence::{DeviceId, DeviceSearch};

use crate::device::{ActionOutput, DeviceHandle, FailureSink, RemoteAction, RemoteActions};
use crate::error::ActionError;

#[derive(Debug, Clone, Default)]
struct FakeSpeaker {
    muted: bool,
    unreachable: bool,
    garbled: bool,
    latency: Duration,
}

/// Speakers that answer mute actions from memory
#[derive(Default)]
pub struct FakeSpeakers {
    speakers: Mutex<HashMap<DeviceId, FakeSpeaker>>,
    calls: Mutex<Vec<(DeviceId, &'static str)>>,
}

impl FakeSpeakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, muted: bool) {
        self.speakers.lock().insert(
            DeviceId::new(id),
            FakeSpeaker {
                muted,
                ..Default::default()
            },
        );
    }

    pub fn mute_of(&self, id: &str) -> Option<bool> {
        self.speakers.lock().get(&DeviceId::new(id)).map(|s| s.muted)
    }

    pub fn set_mute_externally(&self, id: &str, muted: bool) {
        self.update(id, |speaker| speaker.muted = muted);
    }

    pub fn set_unreachable(&self, id: &str, unreachable: bool) {
        self.update(id, |speaker| speaker.unreachable = unreachable);
    }

    pub fn set_garbled(&self, id: &str, garbled: bool) {
        self.update(id, |speaker| speaker.garbled = garbled);
    }

    pub fn set_latency(&self, id: &str, latency: Duration) {
        self.update(id, |speaker| speaker.latency = latency);
    }

    pub fn calls_for(&self, id: &str) -> Vec<&'static str> {
        let id = DeviceId::new(id);
        self.calls
            .lock()
            .iter()
            .filter(|(device, _)| *device == id)
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn set_calls_for(&self, id: &str) -> usize {
        self.calls_for(id).iter().filter(|name| **name == "SetMute").count()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut FakeSpeaker)) {
        if let Some(speaker) = self.speakers.lock().get_mut(&DeviceId::new(id)) {
            apply(speaker);
        }
    }
}

#[async_trait]
impl RemoteActions for FakeSpeakers {
    async fn call(&self, device: &DeviceId, action: RemoteAction) -> Result<ActionOutput, ActionError> {
        self.calls.lock().push((device.clone(), action.name));

        let latency = self
            .speakers
            .lock()
            .get(device)
            .map(|s| s.latency)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut speakers = self.speakers.lock();
        let speaker = speakers
            .get_mut(device)
            .filter(|s| !s.unreachable)
            .ok_or_else(|| ActionError::Unreachable(device.to_string()))?;

        match action.name {
            "GetMute" if speaker.garbled => Ok(HashMap::from([("CurrentMute".to_string(), "maybe".to_string())])),
            "GetMute" => Ok(HashMap::from([(
                "CurrentMute".to_string(),
                if speaker.muted { "1" } else { "0" }.to_string(),
            )])),
            "SetMute" => {
                speaker.muted = action.param("DesiredMute") == Some("1");
                Ok(HashMap::new())
            }
            other => Err(ActionError::Fault {
                code: 401,
                description: format!("Invalid action {}", other),
            }),
        }
    }
}

/// Failure sink that only counts
#[derive(Default)]
pub struct RecordingFailures {
    failures: Mutex<HashMap<DeviceId, usize>>,
    successes: Mutex<HashMap<DeviceId, usize>>,
}

impl RecordingFailures {
    pub fn failures_for(&self, id: &str) -> usize {
        self.failures.lock().get(&DeviceId::new(id)).copied().unwrap_or(0)
    }

    pub fn successes_for(&self, id: &str) -> usize {
        self.successes.lock().get(&DeviceId::new(id)).copied().unwrap_or(0)
    }
}

impl FailureSink for RecordingFailures {
    fn on_failure(&self, device: &DeviceHandle) {
        *self.failures.lock().entry(device.id().clone()).or_insert(0) += 1;
    }

    fn on_success(&self, device: &DeviceHandle) {
        *self.successes.lock().entry(device.id().clone()).or_insert(0) += 1;
    }
}

/// Search that only counts
#[derive(Default)]
pub struct CountingSearch {
    count: AtomicUsize,
}

impl CountingSearch {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl DeviceSearch for CountingSearch {
    fn search_for_devices(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
