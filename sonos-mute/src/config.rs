//! Configuration for the mute service
//!
//! Controls how long a mute lasts, how far it may be extended, how often
//! the UI is ticked and how presence tracking retries discovery.

use std::time::Duration;

use sonos_presence::{RediscoveryConfig, DEFAULT_DECAY_TIMEOUT, DEFAULT_WORKER_THREADS};

use crate::error::{MuteError, Result};

/// Configuration for [`MuteService`](crate::MuteService)
#[derive(Debug, Clone)]
pub struct MuteConfig {
    /// Length added by each toggle
    /// Default: 30 seconds
    pub mute_length: Duration,

    /// Furthest a deadline may lie in the future
    /// Default: 9 minutes 59 seconds
    pub max_mute_length: Duration,

    /// Interval of the status tick while muted
    /// Default: 1 second
    pub tick_interval: Duration,

    /// Slack when a deadline timer fires slightly early
    /// Default: 100 milliseconds
    pub deadline_grace: Duration,

    /// Upper bound for a single remote action
    /// Default: 10 seconds
    pub action_timeout: Duration,

    /// How long a device count may go unconfirmed before it decays
    /// Default: 24 hours
    pub watermark_timeout: Duration,

    /// Consecutive remote failures before a device is evicted, 0 disables
    /// Default: 2
    pub failures_before_eviction: u32,

    /// Worker threads when the service owns its runtime
    /// Default: 2
    pub worker_threads: usize,

    /// Discovery retry timing
    pub rediscovery: RediscoveryConfig,
}

impl Default for MuteConfig {
    fn default() -> Self {
        Self {
            mute_length: Duration::from_secs(30),
            max_mute_length: Duration::from_secs(9 * 60 + 59),
            tick_interval: Duration::from_secs(1),
            deadline_grace: Duration::from_millis(100),
            action_timeout: Duration::from_secs(10),
            watermark_timeout: DEFAULT_DECAY_TIMEOUT,
            failures_before_eviction: 2,
            worker_threads: DEFAULT_WORKER_THREADS,
            rediscovery: RediscoveryConfig::default(),
        }
    }
}

impl MuteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short cycles and quick retries, for demos and manual testing
    pub fn quick() -> Self {
        Self {
            mute_length: Duration::from_secs(5),
            max_mute_length: Duration::from_secs(60),
            action_timeout: Duration::from_secs(2),
            rediscovery: RediscoveryConfig {
                retry_floor: Duration::from_secs(2),
                retry_ceiling: Duration::from_secs(60),
                ..RediscoveryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Never evict devices after remote failures
    pub fn without_eviction() -> Self {
        Self {
            failures_before_eviction: 0,
            ..Self::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.mute_length.is_zero() {
            return Err(MuteError::Configuration(
                "Mute length must be greater than 0".to_string(),
            ));
        }

        if self.mute_length > self.max_mute_length {
            return Err(MuteError::Configuration(
                "Invalid mute lengths: mute length must not exceed the maximum".to_string(),
            ));
        }

        if self.tick_interval.is_zero() {
            return Err(MuteError::Configuration(
                "Tick interval must be greater than 0".to_string(),
            ));
        }

        if self.deadline_grace >= self.mute_length {
            return Err(MuteError::Configuration(
                "Deadline grace must be shorter than the mute length".to_string(),
            ));
        }

        if self.action_timeout.is_zero() {
            return Err(MuteError::Configuration(
                "Action timeout must be greater than 0".to_string(),
            ));
        }

        if self.watermark_timeout.is_zero() {
            return Err(MuteError::Configuration(
                "Watermark timeout must be greater than 0".to_string(),
            ));
        }

        if self.worker_threads == 0 {
            return Err(MuteError::Configuration(
                "Worker thread count must be greater than 0".to_string(),
            ));
        }

        self.rediscovery.validate()?;

        Ok(())
    }

    pub fn with_mute_length(mut self, length: Duration, max: Duration) -> Self {
        self.mute_length = length;
        self.max_mute_length = max;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_failures_before_eviction(mut self, failures: u32) -> Self {
        self.failures_before_eviction = failures;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_retry_delays(mut self, floor: Duration, ceiling: Duration) -> Self {
        self.rediscovery.retry_floor = floor;
        self.rediscovery.retry_ceiling = ceiling;
        self
    }

    pub fn with_rediscovery(mut self, rediscovery: RediscoveryConfig) -> Self {
        self.rediscovery = rediscovery;
        self
    }
}
