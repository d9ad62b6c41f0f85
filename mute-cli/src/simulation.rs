//! Simulated speakers standing in for a real household
//!
//! Implements both collaborators the mute service consumes: remote actions
//! answered from memory after a configurable latency, and a search that
//! announces every online speaker over a channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sonos_mute::{ActionError, ActionOutput, DeviceId, DeviceSearch, RemoteAction, RemoteActions};
use tokio::sync::mpsc;
use tracing::debug;

const ROOM_NAMES: &[&str] = &[
    "Kitchen",
    "Living Room",
    "Bedroom",
    "Office",
    "Patio",
    "Bathroom",
    "Garage",
    "Den",
];

/// What the simulated discovery transport reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Appeared(DeviceId, String),
    Disappeared(DeviceId),
}

#[derive(Debug, Clone)]
struct SimulatedSpeaker {
    name: String,
    muted: bool,
    online: bool,
    failing: bool,
}

/// One speaker as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerView {
    pub id: DeviceId,
    pub name: String,
    pub muted: bool,
    pub online: bool,
    pub failing: bool,
}

pub struct SimulatedHousehold {
    speakers: Mutex<BTreeMap<DeviceId, SimulatedSpeaker>>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    latency: Duration,
}

impl SimulatedHousehold {
    pub fn new(count: usize, latency: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let speakers = (0..count)
            .map(|index| {
                let name = ROOM_NAMES
                    .get(index)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("Speaker {}", index + 1));
                let speaker = SimulatedSpeaker {
                    name,
                    // Every other speaker starts muted so restores are visible
                    muted: index % 2 == 1,
                    online: true,
                    failing: false,
                };
                (DeviceId::new(format!("uuid:RINCON_SIM{:06}01400", index)), speaker)
            })
            .collect();

        let household = Arc::new(Self {
            speakers: Mutex::new(speakers),
            events,
            latency,
        });
        (household, receiver)
    }

    /// Resolve a speaker by 1-based index or case-insensitive room name
    pub fn find(&self, reference: &str) -> Option<DeviceId> {
        let speakers = self.speakers.lock();
        if let Ok(index) = reference.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|index| speakers.keys().nth(index))
                .cloned();
        }
        speakers
            .iter()
            .find(|(_, speaker)| speaker.name.eq_ignore_ascii_case(reference))
            .map(|(id, _)| id.clone())
    }

    /// Take a speaker off the network
    pub fn drop_speaker(&self, id: &DeviceId) -> bool {
        let dropped = self.set_online(id, false);
        if dropped {
            let _ = self.events.send(DiscoveryEvent::Disappeared(id.clone()));
        }
        dropped
    }

    /// Put a speaker back; it is found by the next search
    pub fn return_speaker(&self, id: &DeviceId) -> bool {
        self.set_online(id, true)
    }

    /// Flip whether a speaker answers remote actions, returning the new state
    pub fn toggle_failing(&self, id: &DeviceId) -> Option<bool> {
        let mut speakers = self.speakers.lock();
        let speaker = speakers.get_mut(id)?;
        speaker.failing = !speaker.failing;
        Some(speaker.failing)
    }

    pub fn speakers(&self) -> Vec<SpeakerView> {
        self.speakers
            .lock()
            .iter()
            .map(|(id, speaker)| SpeakerView {
                id: id.clone(),
                name: speaker.name.clone(),
                muted: speaker.muted,
                online: speaker.online,
                failing: speaker.failing,
            })
            .collect()
    }

    /// Speakers currently online, as the transport would already know them
    pub fn online(&self) -> Vec<(DeviceId, String)> {
        self.speakers
            .lock()
            .iter()
            .filter(|(_, speaker)| speaker.online)
            .map(|(id, speaker)| (id.clone(), speaker.name.clone()))
            .collect()
    }

    fn set_online(&self, id: &DeviceId, online: bool) -> bool {
        let mut speakers = self.speakers.lock();
        match speakers.get_mut(id) {
            Some(speaker) if speaker.online != online => {
                speaker.online = online;
                true
            }
            _ => false,
        }
    }
}

impl DeviceSearch for SimulatedHousehold {
    fn search_for_devices(&self) {
        let online = self.online();
        debug!(found = online.len(), "Simulated search");
        for (id, name) in online {
            let _ = self.events.send(DiscoveryEvent::Appeared(id, name));
        }
    }
}

#[async_trait]
impl RemoteActions for SimulatedHousehold {
    async fn call(&self, device: &DeviceId, action: RemoteAction) -> Result<ActionOutput, ActionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut speakers = self.speakers.lock();
        let speaker = speakers
            .get_mut(device)
            .filter(|speaker| speaker.online && !speaker.failing)
            .ok_or_else(|| ActionError::Unreachable(device.to_string()))?;

        match action.name {
            "GetMute" => Ok(ActionOutput::from([(
                "CurrentMute".to_string(),
                if speaker.muted { "1" } else { "0" }.to_string(),
            )])),
            "SetMute" => {
                speaker.muted = action.param("DesiredMute") == Some("1");
                Ok(ActionOutput::new())
            }
            other => Err(ActionError::Fault {
                code: 401,
                description: format!("Invalid action {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speakers_are_named_by_room() {
        let (household, _events) = SimulatedHousehold::new(3, Duration::ZERO);
        let names: Vec<_> = household.speakers().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Kitchen", "Living Room", "Bedroom"]);
    }

    #[test]
    fn test_find_by_index_or_name() {
        let (household, _events) = SimulatedHousehold::new(3, Duration::ZERO);

        assert_eq!(household.find("1"), household.find("kitchen"));
        assert!(household.find("bedroom").is_some());
        assert!(household.find("0").is_none());
        assert!(household.find("4").is_none());
        assert!(household.find("attic").is_none());
    }

    #[test]
    fn test_search_announces_online_speakers_only() {
        let (household, mut events) = SimulatedHousehold::new(2, Duration::ZERO);
        let kitchen = household.find("kitchen").unwrap();

        assert!(household.drop_speaker(&kitchen));
        assert!(!household.drop_speaker(&kitchen));
        assert_eq!(events.try_recv().unwrap(), DiscoveryEvent::Disappeared(kitchen.clone()));

        household.search_for_devices();
        assert!(matches!(events.try_recv().unwrap(), DiscoveryEvent::Appeared(_, name) if name == "Living Room"));
        assert!(events.try_recv().is_err());

        assert!(household.return_speaker(&kitchen));
        household.search_for_devices();
        assert!(matches!(events.try_recv().unwrap(), DiscoveryEvent::Appeared(id, _) if id == kitchen));
    }

    #[tokio::test]
    async fn test_failing_speaker_rejects_actions() {
        let (household, _events) = SimulatedHousehold::new(1, Duration::ZERO);
        let kitchen = household.find("kitchen").unwrap();

        assert_eq!(household.toggle_failing(&kitchen), Some(true));
        let result = household.call(&kitchen, RemoteAction::get_mute()).await;
        assert!(matches!(result, Err(ActionError::Unreachable(_))));

        assert_eq!(household.toggle_failing(&kitchen), Some(false));
        household.call(&kitchen, RemoteAction::set_mute(true)).await.unwrap();
        assert!(household.speakers()[0].muted);
    }
}
