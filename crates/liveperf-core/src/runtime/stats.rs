//! Counters updated by the loop and read from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of performance thread activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerformanceStats {
    /// Render steps completed.
    pub cycles_rendered: u64,
    /// Loop iterations, rendered or paused.
    pub cycles_total: u64,
    /// Queued actions executed.
    pub actions_executed: u64,
    /// One-shot request callbacks executed.
    pub request_callbacks_run: u64,
    /// Callbacks that returned an error or panicked.
    pub callback_faults: u64,
    /// Render steps that overran the control period.
    pub deadline_misses: u64,
    /// Requests cancelled because the performance stopped first.
    pub actions_discarded: u64,
    /// Longest render step observed.
    pub worst_render: Duration,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    cycles_rendered: AtomicU64,
    cycles_total: AtomicU64,
    actions_executed: AtomicU64,
    request_callbacks_run: AtomicU64,
    callback_faults: AtomicU64,
    deadline_misses: AtomicU64,
    actions_discarded: AtomicU64,
    worst_render_nanos: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_cycle(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_render(&self, elapsed: Duration) {
        self.cycles_rendered.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.worst_render_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_action(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_callback(&self) {
        self.request_callbacks_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.callback_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadline_miss(&self) -> u64 {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_discarded(&self, count: usize) {
        self.actions_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> PerformanceStats {
        PerformanceStats {
            cycles_rendered: self.cycles_rendered.load(Ordering::Relaxed),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            request_callbacks_run: self.request_callbacks_run.load(Ordering::Relaxed),
            callback_faults: self.callback_faults.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            actions_discarded: self.actions_discarded.load(Ordering::Relaxed),
            worst_render: Duration::from_nanos(self.worst_render_nanos.load(Ordering::Relaxed)),
        }
    }
}
