//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one dispatch engine
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Rounds entered
    rounds_started: AtomicU64,
    /// Rounds that returned normally (with or without a result)
    rounds_completed: AtomicU64,
    /// Rounds that hit their deadline
    timeouts: AtomicU64,
    /// Rounds that failed for any other reason
    failures: AtomicU64,
    /// Fire-and-forget rounds sent
    fire_and_forget: AtomicU64,
    /// Replay passes issued
    replays: AtomicU64,
    /// Rounds accepted by the background queue
    queued: AtomicU64,
    /// Rounds dropped because the background queue was full
    dropped: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds_started(&self) -> u64 {
        self.rounds_started.load(Ordering::Relaxed)
    }

    pub fn inc_rounds_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    pub fn inc_rounds_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fire_and_forget(&self) -> u64 {
        self.fire_and_forget.load(Ordering::Relaxed)
    }

    pub fn inc_fire_and_forget(&self) {
        self.fire_and_forget.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    pub fn inc_replays(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn inc_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_started: self.rounds_started(),
            rounds_completed: self.rounds_completed(),
            timeouts: self.timeouts(),
            failures: self.failures(),
            fire_and_forget: self.fire_and_forget(),
            replays: self.replays(),
            queued: self.queued(),
            dropped: self.dropped(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rounds_started: u64,
    pub rounds_completed: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub fire_and_forget: u64,
    pub replays: u64,
    pub queued: u64,
    pub dropped: u64,
}
