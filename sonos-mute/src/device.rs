//! Handle to a single remote speaker
//!
//! A [`DeviceHandle`] wraps a device's identity and friendly name together
//! with asynchronous mute query/set operations issued through the injected
//! [`RemoteActions`] transport. Failures are logged and reported exactly once
//! to the injected [`FailureSink`]; the handle itself never retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sonos_presence::{DeviceId, NetworkId, TaskHost};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ActionError;
use crate::notifier::ChangeNotifier;

/// Output arguments of a remote action, by name
pub type ActionOutput = HashMap<String, String>;

/// Service that carries the mute actions
pub const RENDERING_CONTROL: &str = "RenderingControl";

/// A remote action invocation: service, action name and input arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAction {
    pub service: &'static str,
    pub name: &'static str,
    pub params: Vec<(&'static str, String)>,
}

impl RemoteAction {
    /// Query the master channel mute state
    pub fn get_mute() -> Self {
        Self {
            service: RENDERING_CONTROL,
            name: "GetMute",
            params: vec![("InstanceID", "0".to_string()), ("Channel", "Master".to_string())],
        }
    }

    /// Set the master channel mute state
    pub fn set_mute(desired: bool) -> Self {
        Self {
            service: RENDERING_CONTROL,
            name: "SetMute",
            params: vec![
                ("InstanceID", "0".to_string()),
                ("Channel", "Master".to_string()),
                ("DesiredMute", if desired { "1" } else { "0" }.to_string()),
            ],
        }
    }

    /// Value of an input argument
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Transport that performs remote actions against devices
#[async_trait]
pub trait RemoteActions: Send + Sync {
    async fn call(&self, device: &DeviceId, action: RemoteAction) -> Result<ActionOutput, ActionError>;
}

/// Receives the outcome of remote actions
///
/// `on_failure` is invoked exactly once per failed action.
pub trait FailureSink: Send + Sync {
    fn on_failure(&self, device: &DeviceHandle);

    fn on_success(&self, _device: &DeviceHandle) {}
}

/// Collaborators shared by every handle a service creates
#[derive(Clone)]
pub struct DeviceContext {
    pub actions: Arc<dyn RemoteActions>,
    pub failures: Arc<dyn FailureSink>,
    pub host: TaskHost,
    pub action_timeout: Duration,
}

#[derive(Debug, Default)]
struct MuteMemory {
    /// State before the last mute, used by restore
    remembered: Option<bool>,
    /// Last state seen from the device itself
    reported: Option<bool>,
}

struct DeviceInner {
    id: DeviceId,
    network: NetworkId,
    name: String,
    mute: Mutex<MuteMemory>,
    changes: ChangeNotifier<DeviceHandle>,
    context: DeviceContext,
}

/// Cloneable handle to one remote device
///
/// Two handles are equal iff their device identities are equal.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
}

impl DeviceHandle {
    pub fn new(id: DeviceId, network: NetworkId, name: impl Into<String>, context: DeviceContext) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id,
                network,
                name: name.into(),
                mute: Mutex::new(MuteMemory::default()),
                changes: ChangeNotifier::new(),
                context,
            }),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    /// Network the device was found on
    pub fn network(&self) -> &NetworkId {
        &self.inner.network
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mute state captured before the last mute, if any
    pub fn remembered_mute(&self) -> Option<bool> {
        self.inner.mute.lock().remembered
    }

    /// Last mute state the device reported or confirmed
    pub fn reported_mute(&self) -> Option<bool> {
        self.inner.mute.lock().reported
    }

    /// Called whenever the device's reported mute state changes
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&DeviceHandle) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(callback);
    }

    /// Called on the next reported mute change only
    pub fn subscribe_once<F>(&self, callback: F)
    where
        F: Fn(&DeviceHandle) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe_once(callback);
    }

    /// Query the device's current mute state
    ///
    /// Returns `None` after reporting the failure.
    pub async fn current_mute_state(&self) -> Option<bool> {
        let output = match self.invoke(RemoteAction::get_mute()).await {
            Ok(output) => output,
            Err(error) => {
                self.report_failure("GetMute", &error);
                return None;
            }
        };

        match parse_mute(&output) {
            Ok(muted) => {
                self.inner.context.failures.on_success(self);
                self.record_reported(muted);
                Some(muted)
            }
            Err(error) => {
                self.report_failure("GetMute", &error);
                None
            }
        }
    }

    /// Set the device's mute state, returning whether it succeeded
    pub async fn apply_mute(&self, desired: bool) -> bool {
        match self.invoke(RemoteAction::set_mute(desired)).await {
            Ok(_) => {
                debug!(device = %self.id(), muted = desired, "Set mute");
                self.inner.context.failures.on_success(self);
                self.record_reported(desired);
                true
            }
            Err(error) => {
                self.report_failure("SetMute", &error);
                false
            }
        }
    }

    /// Fire-and-forget [`apply_mute`](Self::apply_mute)
    pub fn set_mute(&self, desired: bool) -> Option<JoinHandle<bool>> {
        let device = self.clone();
        self.inner
            .context
            .host
            .spawn(async move { device.apply_mute(desired).await })
    }

    /// Remember the current mute state, then mute
    ///
    /// Returns the remembered state, or `None` if it could not be read, in
    /// which case the device is left alone. Not atomic against changes made
    /// elsewhere between the query and the command.
    pub async fn remember_and_mute(&self) -> Option<bool> {
        let previous = self.current_mute_state().await?;
        self.inner.mute.lock().remembered = Some(previous);
        debug!(device = %self.id(), previous, "Remembered mute state");

        self.apply_mute(true).await;
        Some(previous)
    }

    /// Fire-and-forget [`remember_and_mute`](Self::remember_and_mute)
    pub fn mute_remembering_previous(&self) -> Option<JoinHandle<Option<bool>>> {
        self.mute_remembering_previous_after(None)
    }

    /// Like [`mute_remembering_previous`](Self::mute_remembering_previous),
    /// but the device is only queried once `earlier` has finished
    ///
    /// `earlier` is typically a restore still on its way to the device; the
    /// remembered state must be read after it lands.
    pub fn mute_remembering_previous_after(
        &self,
        earlier: Option<JoinHandle<()>>,
    ) -> Option<JoinHandle<Option<bool>>> {
        let device = self.clone();
        self.inner.context.host.spawn(async move {
            if let Some(earlier) = earlier {
                if earlier.await.is_err() {
                    debug!(device = %device.id(), "Earlier restore did not complete");
                }
            }
            device.remember_and_mute().await
        })
    }

    /// Put the device back into its remembered mute state
    ///
    /// # Panics
    ///
    /// Panics if no state was ever remembered for this device.
    pub async fn restore(&self) -> bool {
        let Some(previous) = self.remembered_mute() else {
            panic!("restore requested for {} with no remembered mute state", self.id());
        };
        self.apply_mute(previous).await
    }

    /// Fire-and-forget [`restore`](Self::restore)
    pub fn restore_mute(&self) -> Option<JoinHandle<bool>> {
        let device = self.clone();
        self.inner
            .context
            .host
            .spawn(async move { device.restore().await })
    }

    /// Record a mute state pushed by the device, notifying subscribers on change
    pub fn observe_mute_event(&self, muted: bool) -> bool {
        self.record_reported(muted)
    }

    fn record_reported(&self, muted: bool) -> bool {
        let changed = {
            let mut memory = self.inner.mute.lock();
            let changed = memory.reported != Some(muted);
            memory.reported = Some(muted);
            changed
        };

        if changed {
            self.inner.changes.publish(self);
        }
        changed
    }

    async fn invoke(&self, action: RemoteAction) -> Result<ActionOutput, ActionError> {
        let timeout = self.inner.context.action_timeout;
        let call = self.inner.context.actions.call(&self.inner.id, action);

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(timeout)),
        }
    }

    fn report_failure(&self, action: &str, error: &ActionError) {
        warn!(
            device = %self.id(),
            name = %self.name(),
            action,
            error = %error,
            "Remote action failed"
        );
        self.inner.context.failures.on_failure(self);
    }
}

fn parse_mute(output: &ActionOutput) -> Result<bool, ActionError> {
    match output.get("CurrentMute").map(String::as_str) {
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(other) => Err(ActionError::InvalidResponse(format!(
            "Unexpected CurrentMute value: {}",
            other
        ))),
        None => Err(ActionError::InvalidResponse(
            "Missing CurrentMute in response".to_string(),
        )),
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DeviceHandle {}

impl std::hash::Hash for DeviceHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let memory = self.inner.mute.lock();
        f.debug_struct("DeviceHandle")
            .field("id", &self.inner.id)
            .field("network", &self.inner.network)
            .field("name", &self.inner.name)
            .field("remembered", &memory.remembered)
            .field("reported", &memory.reported)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSpeakers, RecordingFailures};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(speakers: &Arc<FakeSpeakers>, failures: &Arc<RecordingFailures>, id: &str) -> DeviceHandle {
        let context = DeviceContext {
            actions: Arc::clone(speakers) as Arc<dyn RemoteActions>,
            failures: Arc::clone(failures) as Arc<dyn FailureSink>,
            host: TaskHost::current().unwrap(),
            action_timeout: Duration::from_secs(10),
        };
        DeviceHandle::new(DeviceId::new(id), NetworkId::new("home"), format!("Room {}", id), context)
    }

    #[tokio::test]
    async fn test_remember_and_mute_stores_previous_state() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        let device = handle(&speakers, &failures, "a");

        assert_eq!(device.remember_and_mute().await, Some(false));
        assert_eq!(device.remembered_mute(), Some(false));
        assert_eq!(speakers.mute_of("a"), Some(true));
        assert_eq!(device.reported_mute(), Some(true));
        assert_eq!(speakers.calls_for("a"), vec!["GetMute", "SetMute"]);
    }

    #[tokio::test]
    async fn test_restore_returns_to_remembered_state() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", true);
        let device = handle(&speakers, &failures, "a");

        device.remember_and_mute().await;
        speakers.set_mute_externally("a", false);
        assert!(device.restore().await);

        assert_eq!(speakers.mute_of("a"), Some(true));
    }

    #[tokio::test]
    #[should_panic(expected = "no remembered mute state")]
    async fn test_restore_without_remembered_state_panics() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        let device = handle(&speakers, &failures, "a");

        device.restore().await;
    }

    #[tokio::test]
    async fn test_failed_query_reports_once_and_skips_mute() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        speakers.set_unreachable("a", true);
        let device = handle(&speakers, &failures, "a");

        assert_eq!(device.remember_and_mute().await, None);

        assert_eq!(failures.failures_for("a"), 1);
        assert_eq!(device.remembered_mute(), None);
        assert_eq!(speakers.calls_for("a"), vec!["GetMute"]);
    }

    #[tokio::test]
    async fn test_failed_set_reports_failure() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        let device = handle(&speakers, &failures, "missing");

        assert!(!device.apply_mute(true).await);
        assert_eq!(failures.failures_for("missing"), 1);
        assert_eq!(device.reported_mute(), None);
    }

    #[tokio::test]
    async fn test_invalid_response_is_a_failure() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        speakers.set_garbled("a", true);
        let device = handle(&speakers, &failures, "a");

        assert_eq!(device.current_mute_state().await, None);
        assert_eq!(failures.failures_for("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_times_out() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        speakers.set_latency("a", Duration::from_secs(60));
        let device = handle(&speakers, &failures, "a");

        assert_eq!(device.current_mute_state().await, None);
        assert_eq!(failures.failures_for("a"), 1);
    }

    #[tokio::test]
    async fn test_success_is_reported_to_sink() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        let device = handle(&speakers, &failures, "a");

        device.current_mute_state().await;
        assert_eq!(failures.successes_for("a"), 1);
    }

    #[tokio::test]
    async fn test_observe_mute_event_notifies_on_change_only() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        let device = handle(&speakers, &failures, "a");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        device.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(device.observe_mute_event(true));
        assert!(!device.observe_mute_event(true));
        assert!(device.observe_mute_event(false));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(device.reported_mute(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remember_waits_for_earlier_restore() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", true);
        let device = handle(&speakers, &failures, "a");

        let landing = Arc::clone(&speakers);
        let earlier = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            landing.set_mute_externally("a", false);
        });

        let join = device.mute_remembering_previous_after(Some(earlier)).unwrap();
        assert_eq!(join.await.unwrap(), Some(false));
        assert_eq!(device.remembered_mute(), Some(false));
        assert_eq!(speakers.mute_of("a"), Some(true));
    }

    #[tokio::test]
    async fn test_fire_and_forget_set_mute() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());
        speakers.add("a", false);
        let device = handle(&speakers, &failures, "a");

        let join = device.set_mute(true).unwrap();
        assert!(join.await.unwrap());
        assert_eq!(speakers.mute_of("a"), Some(true));
    }

    #[tokio::test]
    async fn test_handles_compare_by_identity() {
        let speakers = Arc::new(FakeSpeakers::new());
        let failures = Arc::new(RecordingFailures::default());

        let a1 = handle(&speakers, &failures, "uuid:a");
        let a2 = handle(&speakers, &failures, "a");
        let b = handle(&speakers, &failures, "b");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn test_set_mute_action_params() {
        let action = RemoteAction::set_mute(true);
        assert_eq!(action.service, "RenderingControl");
        assert_eq!(action.param("DesiredMute"), Some("1"));
        assert_eq!(RemoteAction::set_mute(false).param("DesiredMute"), Some("0"));
        assert_eq!(RemoteAction::get_mute().param("DesiredMute"), None);
    }
}
