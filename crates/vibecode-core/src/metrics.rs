//! Global atomic counters for vibecode observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event (e.g. when the CLI exits).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::correction::Verdict;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    sessions_started: AtomicU64,
    executions: AtomicU64,
    corrections_requested: AtomicU64,
    collaborator_retries: AtomicU64,
    stagnation_exits: AtomicU64,
    accepted: AtomicU64,
    exhausted: AtomicU64,
    fatal: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub executions: u64,
    pub corrections_requested: u64,
    pub collaborator_retries: u64,
    pub stagnation_exits: u64,
    pub accepted: u64,
    pub exhausted: u64,
    pub fatal: u64,
    pub cancelled: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            corrections_requested: AtomicU64::new(0),
            collaborator_retries: AtomicU64::new(0),
            stagnation_exits: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_started", "counter incremented");
    }

    pub fn inc_executions(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions", "counter incremented");
    }

    pub fn inc_corrections(&self) {
        self.corrections_requested.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "corrections_requested", "counter incremented");
    }

    pub fn inc_collaborator_retries(&self) {
        self.collaborator_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "collaborator_retries", "counter incremented");
    }

    pub fn inc_stagnation_exits(&self) {
        self.stagnation_exits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stagnation_exits", "counter incremented");
    }

    /// Count a terminal verdict.
    pub fn record_verdict(&self, verdict: &Verdict) {
        let counter = match verdict {
            Verdict::Accepted => &self.accepted,
            Verdict::Exhausted { .. } => &self.exhausted,
            Verdict::Fatal { .. } => &self.fatal,
            Verdict::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            corrections_requested: self.corrections_requested.load(Ordering::Relaxed),
            collaborator_retries: self.collaborator_retries.load(Ordering::Relaxed),
            stagnation_exits: self.stagnation_exits.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            sessions_started = s.sessions_started,
            executions = s.executions,
            corrections_requested = s.corrections_requested,
            collaborator_retries = s.collaborator_retries,
            stagnation_exits = s.stagnation_exits,
            accepted = s.accepted,
            exhausted = s.exhausted,
            fatal = s.fatal,
            cancelled = s.cancelled,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.sessions_started,
            &self.executions,
            &self.corrections_requested,
            &self.collaborator_retries,
            &self.stagnation_exits,
            &self.accepted,
            &self.exhausted,
            &self.fatal,
            &self.cancelled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
