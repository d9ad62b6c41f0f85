//! Re-running device discovery when the network looks incomplete
//!
//! Two triggers drive searches:
//!
//! 1. **Join burst**: when a network is (re)joined, three searches are
//!    scheduled unconditionally at fixed offsets, because discovery right
//!    after connecting routinely misses devices.
//! 2. **Adaptive backoff**: when the registry shrinks below the network's
//!    watermark, a single retry loop searches again with an exponentially
//!    growing, capped delay until the expected device count is back.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PresenceError, Result};
use crate::model::NetworkId;
use crate::tasks::TaskHost;

/// Fire-and-forget request to search the network for devices
///
/// Results arrive later as appeared/disappeared callbacks.
pub trait DeviceSearch: Send + Sync {
    fn search_for_devices(&self);
}

/// Answers whether a network currently has every device it is expected to
pub trait PopulationProbe: Send + Sync {
    fn is_complete(&self, network: &NetworkId) -> bool;
}

/// Timing for discovery retries
#[derive(Debug, Clone)]
pub struct RediscoveryConfig {
    /// First delay of a fresh failure episode
    /// Default: 10 seconds
    pub retry_floor: Duration,

    /// Upper bound for the doubling delay
    /// Default: 30 minutes
    pub retry_ceiling: Duration,

    /// Idle time after which the next loss starts a fresh episode
    /// Default: 1 hour
    pub idle_reset: Duration,

    /// Offsets of the unconditional searches after joining a network
    /// Default: 2s, 5s, 10s
    pub join_search_offsets: Vec<Duration>,
}

impl Default for RediscoveryConfig {
    fn default() -> Self {
        Self {
            retry_floor: Duration::from_secs(10),
            retry_ceiling: Duration::from_secs(30 * 60),
            idle_reset: Duration::from_secs(60 * 60),
            join_search_offsets: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl RediscoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.retry_floor.is_zero() {
            return Err(PresenceError::Configuration(
                "Retry floor must be greater than 0".to_string(),
            ));
        }

        if self.retry_floor > self.retry_ceiling {
            return Err(PresenceError::Configuration(
                "Invalid retry delays: floor must not exceed ceiling".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
struct RetryState {
    delay: Duration,
    scheduled: bool,
    last_retry_start: Option<Instant>,
}

struct SchedulerInner {
    config: RediscoveryConfig,
    search: Arc<dyn DeviceSearch>,
    host: TaskHost,
    state: Mutex<RetryState>,
}

/// Schedules discovery searches on the task host
#[derive(Clone)]
pub struct RediscoveryScheduler {
    inner: Arc<SchedulerInner>,
}

impl RediscoveryScheduler {
    pub fn new(config: RediscoveryConfig, search: Arc<dyn DeviceSearch>, host: TaskHost) -> Self {
        let delay = config.retry_floor;
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                search,
                host,
                state: Mutex::new(RetryState {
                    delay,
                    scheduled: false,
                    last_retry_start: None,
                }),
            }),
        }
    }

    /// Issue a single search right away
    pub fn search_now(&self) {
        self.inner.search.search_for_devices();
    }

    /// Schedule the unconditional search burst after joining `network`
    pub fn on_network_joined(&self, network: &NetworkId) {
        debug!(
            network = %network,
            searches = self.inner.config.join_search_offsets.len(),
            "Scheduling a few device searches to make sure we find everything"
        );

        for offset in self.inner.config.join_search_offsets.iter().copied() {
            let search = Arc::clone(&self.inner.search);
            self.inner.host.spawn(async move {
                tokio::time::sleep(offset).await;
                info!(after = ?offset, "Searching again for devices");
                search.search_for_devices();
            });
        }
    }

    /// Ask for a retry loop because `network` looks short of devices
    ///
    /// Returns `true` if a new loop was scheduled, `false` if one was
    /// already pending.
    pub fn request(&self, network: NetworkId, probe: Weak<dyn PopulationProbe>) -> bool {
        let first_delay = {
            let mut state = self.inner.state.lock();
            if state.scheduled {
                debug!(network = %network, "Retry already scheduled, will just wait for that one");
                return false;
            }

            let now = Instant::now();
            let fresh_episode = state
                .last_retry_start
                .map_or(true, |start| now.saturating_duration_since(start) > self.inner.config.idle_reset);
            if fresh_episode {
                state.delay = self.inner.config.retry_floor;
            }

            state.scheduled = true;
            state.last_retry_start = Some(now);
            state.delay
        };

        info!(network = %network, delay = ?first_delay, "Scheduling device search retry");

        let inner = Arc::clone(&self.inner);
        let spawned = self
            .inner
            .host
            .spawn(retry_loop(inner, network, probe, first_delay));

        if spawned.is_none() {
            warn!("Could not schedule discovery retry, task host is shut down");
            self.inner.state.lock().scheduled = false;
            return false;
        }
        true
    }

    /// Whether a retry loop is currently pending
    pub fn is_scheduled(&self) -> bool {
        self.inner.state.lock().scheduled
    }

    /// Delay the next retry will wait
    pub fn current_delay(&self) -> Duration {
        self.inner.state.lock().delay
    }

    pub fn config(&self) -> &RediscoveryConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for RediscoveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RediscoveryScheduler")
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

async fn retry_loop(
    inner: Arc<SchedulerInner>,
    network: NetworkId,
    probe: Weak<dyn PopulationProbe>,
    mut delay: Duration,
) {
    loop {
        tokio::time::sleep(delay).await;

        {
            let mut state = inner.state.lock();
            let complete = probe
                .upgrade()
                .map_or(true, |probe| probe.is_complete(&network));

            if complete {
                info!(network = %network, "All expected devices present, stopping retries");
                state.scheduled = false;
                return;
            }

            state.last_retry_start = Some(Instant::now());
            state.delay = (state.delay * 2).min(inner.config.retry_ceiling);
            delay = state.delay;
        }

        info!(network = %network, next_delay = ?delay, "Searching again for devices after loss");
        inner.search.search_for_devices();
    }
}
