//! Ambient counters for the broker and the orchestrator, plain atomics
//! for the same reason `activation::metrics` is: no metrics-export crate
//! is part of this workspace's ambient stack.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub instances_started: AtomicU64,
    pub instances_evicted: AtomicU64,
    pub instances_completed: AtomicU64,
    pub instances_timed_out: AtomicU64,
    pub malfeasance_proofs_emitted: AtomicU64,
    pub messages_ignored: AtomicU64,
}

impl Metrics {
    pub fn record_started(&self) {
        self.instances_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.instances_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.instances_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.instances_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malfeasance(&self) {
        self.malfeasance_proofs_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }
}
