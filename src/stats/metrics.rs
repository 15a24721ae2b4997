//! Counters for the transcoding bridge

use std::sync::atomic::{AtomicU64, Ordering};

/// Bridge counters, updated from concurrent tasks
#[derive(Debug, Default)]
pub struct BridgeStats {
    forwards_started: AtomicU64,
    jobs_started: AtomicU64,
    jobs_exited: AtomicU64,
    failures: AtomicU64,
}

impl BridgeStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_forward(&self) {
        let _ = self.forwards_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_job_started(&self) {
        let _ = self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_job_exited(&self) {
        let _ = self.jobs_exited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        let _ = self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of failed forwarding attempts
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            forwards_started: self.forwards_started.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_exited: self.jobs_exited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    /// Forward requests accepted
    pub forwards_started: u64,
    /// Transcoder processes spawned
    pub jobs_started: u64,
    /// Transcoder processes that exited or were stopped
    pub jobs_exited: u64,
    /// Forward requests that failed before a job was running
    pub failures: u64,
}

impl BridgeStatsSnapshot {
    /// Jobs spawned and not yet exited
    pub fn jobs_running(&self) -> u64 {
        self.jobs_started.saturating_sub(self.jobs_exited)
    }
}
