//! Shared health state for the /health endpoint.
//! Updated by the batch job, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};

/// Batch-run counters. The batch job writes, handlers read.
#[derive(Default)]
pub struct BatchHealth {
    /// Epoch seconds of the last completed run (0 = never).
    pub last_run_at_s: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Records graded across all runs since startup.
    pub records_graded: AtomicU64,
}

impl BatchHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_run_completed(&self, at_s: u64) {
        self.last_run_at_s.store(at_s, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_graded(&self, n: u64) {
        self.records_graded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn last_run_at_s(&self) -> u64 {
        self.last_run_at_s.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn records_graded(&self) -> u64 {
        self.records_graded.load(Ordering::Relaxed)
    }
}
