//! Decaying high-watermark of how many devices a network has shown
//!
//! Raw discovery is unreliable: devices drop off transiently and come back
//! on the next search. A network that once showed N speakers is assumed to
//! still have N until that count goes unconfirmed for [`DEFAULT_DECAY_TIMEOUT`],
//! after which the watermark steps down so a decommissioned speaker stops
//! being treated as "still missing".

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::model::NetworkId;

/// How long a device count may go unconfirmed before it decays
pub const DEFAULT_DECAY_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Watermark for a single network
///
/// `confirmed[n - 1]` holds the last time at least `n` devices were seen at
/// once, so there is always exactly one timestamp per count in `1..=max`.
#[derive(Debug, Clone)]
pub struct SeenWatermark {
    confirmed: Vec<Instant>,
    timeout: Duration,
}

impl SeenWatermark {
    pub fn new(timeout: Duration) -> Self {
        Self {
            confirmed: Vec::new(),
            timeout,
        }
    }

    /// Record a sighting of `count` devices at the current time
    pub fn seen(&mut self, count: usize) {
        self.seen_at(count, Instant::now());
    }

    /// Record a sighting of `count` devices at `now`
    ///
    /// Seeing N devices reconfirms every count from 1 to N, each of which
    /// then decays independently.
    pub fn seen_at(&mut self, count: usize, now: Instant) {
        if count > self.confirmed.len() {
            debug!(from = self.confirmed.len(), to = count, "Raising device watermark");
            self.confirmed.resize(count, now);
        }

        for stamp in &mut self.confirmed[..count] {
            *stamp = now;
        }
    }

    /// Current maximum, decaying expired counts first
    pub fn max(&mut self) -> usize {
        self.max_at(Instant::now())
    }

    /// Current maximum as of `now`, decaying expired counts first
    pub fn max_at(&mut self, now: Instant) -> usize {
        while let Some(last) = self.confirmed.last() {
            if now.saturating_duration_since(*last) <= self.timeout {
                break;
            }
            self.confirmed.pop();
            debug!(max = self.confirmed.len(), "Device watermark decayed");
        }
        self.confirmed.len()
    }

    /// Maximum without applying decay
    pub fn peek_max(&self) -> usize {
        self.confirmed.len()
    }

    /// When at least `count` devices were last seen together
    pub fn last_confirmed(&self, count: usize) -> Option<Instant> {
        count
            .checked_sub(1)
            .and_then(|index| self.confirmed.get(index))
            .copied()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for SeenWatermark {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY_TIMEOUT)
    }
}

/// Watermarks for every network seen so far, behind their own lock
///
/// Entries are created lazily and never removed: networks are assumed to
/// recur.
#[derive(Debug)]
pub struct SeenWatermarks {
    timeout: Duration,
    marks: Mutex<HashMap<NetworkId, SeenWatermark>>,
}

impl SeenWatermarks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure a watermark exists for `network`
    pub fn ensure(&self, network: &NetworkId) {
        self.marks
            .lock()
            .entry(network.clone())
            .or_insert_with(|| SeenWatermark::new(self.timeout));
    }

    pub fn seen(&self, network: &NetworkId, count: usize) {
        self.marks
            .lock()
            .entry(network.clone())
            .or_insert_with(|| SeenWatermark::new(self.timeout))
            .seen(count);
    }

    /// Decayed maximum for `network`, 0 if it was never seen
    pub fn max(&self, network: &NetworkId) -> usize {
        self.marks
            .lock()
            .get_mut(network)
            .map(SeenWatermark::max)
            .unwrap_or(0)
    }

    pub fn contains(&self, network: &NetworkId) -> bool {
        self.marks.lock().contains_key(network)
    }
}

impl Default for SeenWatermarks {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY_TIMEOUT)
    }
}
