//! Performance thread configuration.

use std::time::Duration;

/// Default number of queued actions executed per rendered cycle.
pub const DEFAULT_DRAIN_BUDGET: usize = 32;

/// How the loop is paced between render steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockMode {
    /// Sleep out the rest of each control period after a cycle.
    ///
    /// For engines whose render step returns immediately.
    Wallclock,
    /// Render back to back.
    ///
    /// For engines paced by their own audio device, and for tests.
    Freewheel,
}

/// Configuration for a [`PerformanceThread`](crate::PerformanceThread).
#[derive(Clone, Debug)]
pub struct PerformanceConfig {
    /// Name given to the OS thread.
    pub thread_name: String,
    /// Maximum actions drained per rendered cycle (None = drain until empty).
    pub drain_budget: Option<usize>,
    /// Loop pacing.
    pub clock: ClockMode,
    /// Sleep between checks while stopped or paused.
    pub idle_interval: Duration,
    /// Log every render step that overruns its control period.
    pub log_deadline_misses: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            thread_name: "liveperf".to_string(),
            drain_budget: Some(DEFAULT_DRAIN_BUDGET),
            clock: ClockMode::Wallclock,
            idle_interval: Duration::from_millis(1),
            log_deadline_misses: true,
        }
    }
}

impl PerformanceConfig {
    /// Create a new PerformanceConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the per-cycle drain budget. A budget of zero is raised to one so
    /// the queue always makes progress.
    pub fn with_drain_budget(mut self, budget: Option<usize>) -> Self {
        self.drain_budget = budget.map(|b| b.max(1));
        self
    }

    /// Set the clock mode.
    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Set the idle interval.
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Enable or disable deadline miss logging.
    pub fn with_deadline_logging(mut self, enabled: bool) -> Self {
        self.log_deadline_misses = enabled;
        self
    }
}
