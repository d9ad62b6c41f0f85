//! The mute cycle state machine
//!
//! ```text
//!            toggle (connected, devices present)
//!   ┌──────┐ ──────────────────────────────────▶ ┌───────┐
//!   │ Idle │                                      │ Muted │ ◀─┐ toggle: extend deadline
//!   └──────┘ ◀────────────────────────────────── └───────┘ ──┘
//!            unmute / deadline timer / tick past deadline
//! ```
//!
//! All transitions happen under one lock. A cycle owns at most one deadline
//! timer and one tick task; both are cancelled on every path back to Idle.
//! Timers carry the generation they were armed with, so a timer that fires
//! after being superseded does nothing.
//!
//! Status changes are published in transition order: a transition and its
//! publish both happen inside a reentrant gate, so subscribers may call back
//! into the lifecycle from the same thread.
//!
//! A device restored by one cycle is only queried by the next once that
//! restore has landed, so a quick unmute and re-mute never remembers the
//! muted state of the cycle before.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use sonos_presence::{DeviceId, PresenceRegistry, TaskHost};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MuteConfig;
use crate::connectivity::Connectivity;
use crate::device::DeviceHandle;
use crate::notifier::ChangeNotifier;
use crate::status::{Notice, StatusChange};

/// Extend a deadline by `length`, never past `now + max`
pub fn extend_deadline(current: Instant, now: Instant, length: Duration, max: Duration) -> Instant {
    (current + length).min(now + max)
}

/// Whole seconds left until `deadline`, rounded to nearest
pub fn seconds_remaining(deadline: Instant, now: Instant) -> u64 {
    let millis = deadline.saturating_duration_since(now).as_millis();
    ((millis + 500) / 1000) as u64
}

/// Result of a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A new cycle started
    Muted { devices: usize, deadline: Instant },
    /// The running cycle was extended
    Extended { deadline: Instant },
    /// No network, nothing changed
    NotConnected,
    /// Connected but nothing to mute, nothing changed
    NoDevices,
}

impl ToggleOutcome {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            ToggleOutcome::NotConnected => Some(Notice::NotConnected),
            ToggleOutcome::NoDevices => Some(Notice::NoDevicesFound),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            ToggleOutcome::Muted { deadline, .. } | ToggleOutcome::Extended { deadline } => Some(*deadline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Muted { deadline: Instant },
}

struct PendingRestore {
    device: DeviceHandle,
    /// Resolves to the state captured before muting
    remembered: Option<JoinHandle<Option<bool>>>,
}

struct DeadlineTimer {
    generation: u64,
    deadline: Instant,
    abort: AbortHandle,
}

struct MuteState {
    phase: Phase,
    pending: HashMap<DeviceId, PendingRestore>,
    timer: Option<DeadlineTimer>,
    ticker: Option<AbortHandle>,
    next_generation: u64,
    /// Restores of earlier cycles that may still be in flight
    restoring: HashMap<DeviceId, JoinHandle<()>>,
}

impl MuteState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            pending: HashMap::new(),
            timer: None,
            ticker: None,
            next_generation: 0,
            restoring: HashMap::new(),
        }
    }

    fn cancel_tasks(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort.abort();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

struct LifecycleInner {
    config: MuteConfig,
    registry: PresenceRegistry<DeviceHandle>,
    connectivity: Connectivity,
    status: Arc<ChangeNotifier<StatusChange>>,
    host: TaskHost,
    transitions: ReentrantMutex<()>,
    state: Mutex<MuteState>,
}

/// Mute/extend/unmute state machine shared by every caller
#[derive(Clone)]
pub struct MuteLifecycle {
    inner: Arc<LifecycleInner>,
}

impl MuteLifecycle {
    pub fn new(
        config: MuteConfig,
        registry: PresenceRegistry<DeviceHandle>,
        connectivity: Connectivity,
        status: Arc<ChangeNotifier<StatusChange>>,
        host: TaskHost,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                config,
                registry,
                connectivity,
                status,
                host,
                transitions: ReentrantMutex::new(()),
                state: Mutex::new(MuteState::new()),
            }),
        }
    }

    /// Start a mute cycle, or extend the running one
    pub fn toggle(&self) -> ToggleOutcome {
        let _order = self.inner.transitions.lock();
        let now = Instant::now();
        let outcome = {
            let mut state = self.inner.state.lock();
            let phase = state.phase;
            match phase {
                Phase::Muted { deadline } => {
                    let extended = extend_deadline(
                        deadline,
                        now,
                        self.inner.config.mute_length,
                        self.inner.config.max_mute_length,
                    );
                    state.phase = Phase::Muted { deadline: extended };
                    self.arm_timer(&mut state, extended);
                    info!(seconds_remaining = seconds_remaining(extended, now), "Extended mute");
                    ToggleOutcome::Extended { deadline: extended }
                }
                Phase::Idle => match self.inner.connectivity.active() {
                    None => ToggleOutcome::NotConnected,
                    Some(network) => {
                        let devices = self.inner.registry.snapshot(&network);
                        if devices.is_empty() {
                            ToggleOutcome::NoDevices
                        } else {
                            self.start_cycle(&mut state, devices, now)
                        }
                    }
                },
            }
        };

        let change = match outcome {
            ToggleOutcome::Muted { devices, deadline } => StatusChange::Muted {
                devices,
                seconds_remaining: seconds_remaining(deadline, now),
            },
            ToggleOutcome::Extended { deadline } => StatusChange::Extended {
                seconds_remaining: seconds_remaining(deadline, now),
            },
            ToggleOutcome::NotConnected => StatusChange::Notice(Notice::NotConnected),
            ToggleOutcome::NoDevices => StatusChange::Notice(Notice::NoDevicesFound),
        };
        if let StatusChange::Notice(notice) = &change {
            info!(%notice, "Toggle ignored");
        }
        self.inner.status.publish(&change);
        outcome
    }

    /// End the running cycle now, restoring every device
    ///
    /// Returns `false` if nothing was muted.
    pub fn unmute(&self) -> bool {
        let _order = self.inner.transitions.lock();
        let state = self.inner.state.lock();
        self.finish_cycle(state)
    }

    /// End the cycle if its deadline has passed
    pub fn force_unmute_if_past_deadline(&self) -> bool {
        let _order = self.inner.transitions.lock();
        let state = self.inner.state.lock();
        match state.phase {
            Phase::Muted { deadline } if Instant::now() >= deadline => {
                debug!("Past unmute deadline, unmuting");
                self.finish_cycle(state)
            }
            _ => false,
        }
    }

    /// Drop the running cycle without restoring any device
    pub fn abandon(&self) {
        let mut state = self.inner.state.lock();
        state.cancel_tasks();
        state.pending.clear();
        state.phase = Phase::Idle;
    }

    pub fn is_muted(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Muted { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.inner.state.lock().phase {
            Phase::Muted { deadline } => Some(deadline),
            Phase::Idle => None,
        }
    }

    pub fn seconds_until_unmute(&self) -> Option<u64> {
        self.deadline()
            .map(|deadline| seconds_remaining(deadline, Instant::now()))
    }

    /// Devices that will be restored when the cycle ends
    pub fn pending_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.inner.state.lock().pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_deadline_timer(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    pub fn is_ticking(&self) -> bool {
        self.inner.state.lock().ticker.is_some()
    }

    fn downgrade(&self) -> Weak<LifecycleInner> {
        Arc::downgrade(&self.inner)
    }

    fn start_cycle(&self, state: &mut MuteState, devices: Vec<DeviceHandle>, now: Instant) -> ToggleOutcome {
        let deadline = now + self.inner.config.mute_length;
        let count = devices.len();
        for device in devices {
            let earlier = state.restoring.remove(device.id());
            if earlier.is_some() {
                debug!(device = %device.id(), "Waiting for the last restore before muting");
            }
            let remembered = device.mute_remembering_previous_after(earlier);
            state
                .pending
                .insert(device.id().clone(), PendingRestore { device, remembered });
        }

        state.phase = Phase::Muted { deadline };
        self.arm_timer(state, deadline);
        self.start_ticker(state);
        info!(devices = count, "Muting all devices");
        ToggleOutcome::Muted { devices: count, deadline }
    }

    fn arm_timer(&self, state: &mut MuteState, deadline: Instant) {
        if let Some(previous) = state.timer.take() {
            previous.abort.abort();
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let lifecycle = self.downgrade();
        let spawned = self.inner.host.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = lifecycle.upgrade() {
                MuteLifecycle { inner }.on_deadline_timer(generation);
            }
        });

        match spawned {
            Some(join) => {
                state.timer = Some(DeadlineTimer {
                    generation,
                    deadline,
                    abort: join.abort_handle(),
                });
            }
            None => warn!("Could not arm unmute timer, task host is shut down"),
        }
    }

    fn on_deadline_timer(&self, generation: u64) {
        let _order = self.inner.transitions.lock();
        let mut state = self.inner.state.lock();
        let deadline = match &state.timer {
            Some(timer) if timer.generation == generation => timer.deadline,
            _ => {
                debug!(generation, "Ignoring superseded unmute timer");
                return;
            }
        };
        // This task is the timer, so it must not abort itself
        state.timer = None;

        if Instant::now() + self.inner.config.deadline_grace >= deadline {
            self.finish_cycle(state);
        } else {
            debug!(generation, "Unmute timer fired early, rearming");
            self.arm_timer(&mut state, deadline);
        }
    }

    fn start_ticker(&self, state: &mut MuteState) {
        if let Some(previous) = state.ticker.take() {
            previous.abort();
        }

        let period = self.inner.config.tick_interval;
        let lifecycle = self.downgrade();
        let spawned = self.inner.host.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = lifecycle.upgrade() else {
                    break;
                };
                let current = MuteLifecycle { inner };
                let _order = current.inner.transitions.lock();
                if let Some(seconds_remaining) = current.seconds_until_unmute() {
                    current
                        .inner
                        .status
                        .publish(&StatusChange::Tick { seconds_remaining });
                }
                current.force_unmute_if_past_deadline();
            }
        });

        state.ticker = spawned.map(|join| join.abort_handle());
    }

    fn finish_cycle(&self, mut state: MutexGuard<'_, MuteState>) -> bool {
        if state.phase == Phase::Idle {
            return false;
        }

        state.phase = Phase::Idle;
        state.cancel_tasks();
        let pending = std::mem::take(&mut state.pending);
        state.restoring.retain(|_, join| !join.is_finished());

        info!(devices = pending.len(), "Unmuting");
        for (id, restore) in pending {
            let PendingRestore { device, remembered } = restore;
            let spawned = self.inner.host.spawn(async move {
                let previous = match remembered {
                    Some(join) => join.await.ok().flatten(),
                    None => None,
                };
                match previous {
                    Some(_) => {
                        device.restore().await;
                    }
                    None => debug!(device = %device.id(), "No remembered mute state, leaving device alone"),
                }
            });
            match spawned {
                Some(join) => {
                    state.restoring.insert(id, join);
                }
                None => warn!(device = %id, "Could not restore device, task host is shut down"),
            }
        }
        drop(state);

        self.inner.status.publish(&StatusChange::Unmuted);
        true
    }
}

impl std::fmt::Debug for MuteLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MuteLifecycle")
            .field("phase", &state.phase)
            .field("pending", &state.pending.len())
            .field("timer", &state.timer.as_ref().map(|t| t.generation))
            .field("ticking", &state.ticker.is_some())
            .finish()
    }
}
