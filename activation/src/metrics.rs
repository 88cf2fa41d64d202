//! Ambient counters for the ATX pipeline. Dedicated `metrics` modules
//! elsewhere in this workspace wrap a metrics-export crate; this crate
//! carries no such dependency, so the counters are plain atomics
//! inspected directly rather than pushed to a collector.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub atxs_published: AtomicU64,
    pub challenges_expired: AtomicU64,
    pub poet_retries: AtomicU64,
}

impl Metrics {
    pub fn record_published(&self) {
        self.atxs_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_challenge_expired(&self) {
        self.challenges_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poet_retry(&self) {
        self.poet_retries.fetch_add(1, Ordering::Relaxed);
    }
}
