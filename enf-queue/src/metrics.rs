use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Counters updated by the worker loop
#[derive(Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_claimed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    /// Reports refused because the job was already terminal
    duplicate_reports: AtomicU64,

    job_types: RwLock<HashMap<String, JobTypeMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, job_type: &str) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.job_types.write().entry(job_type.to_string()).or_default().enqueued += 1;
    }

    pub fn record_claimed(&self) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self, job_type: &str, elapsed: Duration) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        let mut types = self.job_types.write();
        let entry = types.entry(job_type.to_string()).or_default();
        entry.succeeded += 1;
        entry.total_execution += elapsed;
    }

    pub fn record_failed(&self, job_type: &str, elapsed: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        let mut types = self.job_types.write();
        let entry = types.entry(job_type.to_string()).or_default();
        entry.failed += 1;
        entry.total_execution += elapsed;
    }

    pub fn record_duplicate_report(&self) {
        self.duplicate_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_claimed(&self) -> u64 {
        self.jobs_claimed.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn duplicate_reports(&self) -> u64 {
        self.duplicate_reports.load(Ordering::Relaxed)
    }

    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_types.read().get(job_type).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued(),
            jobs_claimed: self.jobs_claimed(),
            jobs_succeeded: self.jobs_succeeded(),
            jobs_failed: self.jobs_failed(),
            duplicate_reports: self.duplicate_reports(),
        }
    }
}

/// Metrics for a specific job type
#[derive(Debug, Clone, Default)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_execution: Duration,
}

impl JobTypeMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            100.0
        } else {
            (self.succeeded as f64 / finished as f64) * 100.0
        }
    }

    pub fn average_execution(&self) -> Option<Duration> {
        let finished = self.succeeded + self.failed;
        (finished > 0).then(|| self.total_execution / finished as u32)
    }
}

/// Point-in-time copy of the global counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_claimed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub duplicate_reports: u64,
}

impl MetricsSnapshot {
    /// Enqueued jobs that have not finished yet (as seen by this process)
    pub fn jobs_in_flight(&self) -> u64 {
        self.jobs_enqueued
            .saturating_sub(self.jobs_succeeded + self.jobs_failed)
    }
}
