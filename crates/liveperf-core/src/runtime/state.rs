//! Play state machine shared between the handle and the loop.
//!
//! Transitions are compare-and-swap loops, so concurrent `play`, `pause` and
//! `stop` calls from several threads always land on one of the four public
//! states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Public state of a performance thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayState {
    /// Not rendering. Either not yet started or finished.
    Stopped,
    /// Rendering and draining requests.
    Playing,
    /// Not rendering; still servicing one request per cycle.
    Paused,
    /// Stop requested; the loop has not exited yet.
    Stopping,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayState::Stopped => "stopped",
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

// Both IDLE and EXITED read as `Stopped`. Only IDLE can be played.
const IDLE: u8 = 0;
const PLAYING: u8 = 1;
const PAUSED: u8 = 2;
const STOPPING: u8 = 3;
const EXITED: u8 = 4;

/// Internal phase as seen by the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Playing,
    Paused,
    Stopping,
    Exited,
}

pub(crate) struct SharedState(AtomicU8);

impl SharedState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            IDLE => Phase::Idle,
            PLAYING => Phase::Playing,
            PAUSED => Phase::Paused,
            STOPPING => Phase::Stopping,
            _ => Phase::Exited,
        }
    }

    pub(crate) fn public(&self) -> PlayState {
        match self.phase() {
            Phase::Idle | Phase::Exited => PlayState::Stopped,
            Phase::Playing => PlayState::Playing,
            Phase::Paused => PlayState::Paused,
            Phase::Stopping => PlayState::Stopping,
        }
    }

    /// Stopped (not yet started) or Paused to Playing.
    pub(crate) fn play(&self) -> PlayState {
        self.transition(|current| match current {
            IDLE | PAUSED => Some(PLAYING),
            _ => None,
        })
    }

    /// Playing to Paused.
    pub(crate) fn pause(&self) -> PlayState {
        self.transition(|current| match current {
            PLAYING => Some(PAUSED),
            _ => None,
        })
    }

    /// Any live state to Stopping.
    pub(crate) fn stop(&self) -> PlayState {
        self.transition(|current| match current {
            IDLE | PLAYING | PAUSED => Some(STOPPING),
            _ => None,
        })
    }

    /// Called by the loop once it has exited.
    pub(crate) fn mark_exited(&self) {
        self.0.store(EXITED, Ordering::Release);
    }

    fn transition(&self, next: impl Fn(u8) -> Option<u8>) -> PlayState {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| next(current));
        self.public()
    }
}
