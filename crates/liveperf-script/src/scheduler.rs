//! Beat-ordered score event queue and active instance tracking.
//!
//! Events wait in a queue keyed by their start beat and are handed out once
//! the score clock reaches them. Events with the same start beat keep the
//! order they were scheduled in.

use std::collections::BTreeMap;

use liveperf_core::EventKind;

use crate::timing::BeatTime;

/// An event waiting for its start beat.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledEvent {
    /// What the event does.
    pub kind: EventKind,
    /// Parameter fields as scheduled.
    pub params: Vec<f64>,
}

/// Pending score events.
#[derive(Debug, Default)]
pub struct EventQueue {
    /// Keyed by (start beat, insertion sequence).
    pending: BTreeMap<(BeatTime, u64), ScheduledEvent>,
    next_seq: u64,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event to start at `at`.
    pub fn push(&mut self, at: BeatTime, event: ScheduledEvent) {
        self.pending.insert((at, self.next_seq), event);
        self.next_seq += 1;
    }

    /// Move every event due at or before `now` into `out`, in start order.
    pub fn pop_due(&mut self, now: BeatTime, out: &mut Vec<ScheduledEvent>) {
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            out.push(entry.remove());
        }
    }

    /// Start beat of the next pending event.
    pub fn next_due(&self) -> Option<BeatTime> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// A running instrument instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveInstance {
    /// Instrument number (p1).
    pub instrument: i64,
    /// Beat at which the instance ends (None = held).
    pub end: Option<BeatTime>,
}

/// Instances started and not yet finished.
#[derive(Debug, Default)]
pub struct ActiveInstances {
    instances: Vec<ActiveInstance>,
}

impl ActiveInstances {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new instance.
    pub fn start(&mut self, instance: ActiveInstance) {
        self.instances.push(instance);
    }

    /// Remove instances whose end beat has passed. Returns how many ended.
    pub fn retire(&mut self, now: BeatTime) -> usize {
        let before = self.instances.len();
        self.instances
            .retain(|instance| instance.end.map_or(true, |end| end > now));
        before - self.instances.len()
    }

    /// Number of running instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if nothing is running.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of running instances of one instrument.
    pub fn count_of(&self, instrument: i64) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.instrument == instrument)
            .count()
    }
}
