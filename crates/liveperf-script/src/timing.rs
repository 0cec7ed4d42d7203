//! Score time for the reference engine.
//!
//! - [`BeatTime`] - Fixed-point beat position used to order score events
//! - [`ScoreClock`] - Sample-counting clock converting rendered cycles to beats

use std::time::Duration;

use crate::options::{EngineOptions, DEFAULT_TEMPO};

/// Check that `bpm` is usable as a tempo.
pub fn valid_tempo(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

/// Fixed-point beat position with 16 fractional bits.
///
/// Events compare exactly, so two events scheduled for the same beat always
/// land in the same cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatTime {
    ticks: i64,
}

impl BeatTime {
    const SCALE: i64 = 1 << 16;

    /// Beat zero.
    pub const ZERO: BeatTime = BeatTime { ticks: 0 };

    /// Create a BeatTime from a floating-point beat value.
    #[inline]
    pub fn from_beats(beats: f64) -> Self {
        Self {
            ticks: (beats * Self::SCALE as f64).round() as i64,
        }
    }

    /// Convert to a floating-point beat value.
    #[inline]
    pub fn to_beats(self) -> f64 {
        self.ticks as f64 / Self::SCALE as f64
    }
}

impl std::ops::Add for BeatTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            ticks: self.ticks.saturating_add(rhs.ticks),
        }
    }
}

/// Clock advanced one control cycle per render step.
///
/// Tempo changes anchor at the current position so the beat never jumps.
#[derive(Clone, Debug)]
pub struct ScoreClock {
    sample_rate: u32,
    ksmps: u32,
    tempo_bpm: f64,
    samples: u64,
    /// Beat reached at the last tempo change.
    anchor_beats: f64,
    /// Sample count at the last tempo change.
    anchor_samples: u64,
}

impl ScoreClock {
    /// Create a clock at beat zero.
    ///
    /// An invalid tempo in `options` falls back to the default.
    pub fn new(options: &EngineOptions) -> Self {
        let tempo_bpm = if valid_tempo(options.tempo_bpm) {
            options.tempo_bpm
        } else {
            log::warn!("[script] invalid tempo {}, using {}", options.tempo_bpm, DEFAULT_TEMPO);
            DEFAULT_TEMPO
        };
        Self {
            sample_rate: options.sample_rate.max(1),
            ksmps: options.ksmps.max(1),
            tempo_bpm,
            samples: 0,
            anchor_beats: 0.0,
            anchor_samples: 0,
        }
    }

    /// Advance by one control cycle.
    pub fn advance(&mut self) {
        self.samples += self.ksmps as u64;
    }

    /// Samples rendered so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Seconds rendered so far.
    pub fn seconds(&self) -> f64 {
        self.samples as f64 / self.sample_rate as f64
    }

    /// Current position in beats.
    pub fn beats(&self) -> f64 {
        let since_anchor = (self.samples - self.anchor_samples) as f64 / self.sample_rate as f64;
        self.anchor_beats + since_anchor * self.tempo_bpm / 60.0
    }

    /// Current position as a fixed-point beat.
    pub fn beat_time(&self) -> BeatTime {
        BeatTime::from_beats(self.beats())
    }

    /// Current tempo.
    pub fn tempo(&self) -> f64 {
        self.tempo_bpm
    }

    /// Change tempo from the current position onward.
    ///
    /// Returns false and keeps the current tempo if `bpm` is not a finite
    /// positive value.
    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        if !valid_tempo(bpm) {
            return false;
        }
        self.anchor_beats = self.beats();
        self.anchor_samples = self.samples;
        self.tempo_bpm = bpm;
        true
    }

    /// Duration of one control cycle.
    pub fn control_period(&self) -> Duration {
        Duration::from_secs_f64(self.ksmps as f64 / self.sample_rate as f64)
    }
}
