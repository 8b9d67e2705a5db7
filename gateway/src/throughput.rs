//! Sliding-window throughput of accepted transaction submissions.
//!
//! Fed by the broadcaster each time a validator accepts a transaction and
//! read by the network status endpoint. Counts only what this gateway
//! relayed, not network-wide volume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Accepted-submission counter over a fixed trailing window.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    events: Mutex<VecDeque<Instant>>,
    total: AtomicU64,
}

impl ThroughputMeter {
    /// `window` must be non-zero; configuration validation guarantees it.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            events: Mutex::new(VecDeque::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Records one accepted submission at the current instant.
    pub fn record(&self) {
        let now = Instant::now();
        let mut events = self.events.lock();
        Self::prune(&mut events, now, self.window);
        events.push_back(now);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Submissions per second averaged over the window.
    pub fn tps(&self) -> f64 {
        let mut events = self.events.lock();
        Self::prune(&mut events, Instant::now(), self.window);
        events.len() as f64 / self.window.as_secs_f64()
    }

    /// Submissions recorded since start-up.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = events.front() {
            if now.duration_since(oldest) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}
