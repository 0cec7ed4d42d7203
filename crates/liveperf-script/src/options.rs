//! Engine configuration.

use std::time::Duration;

use crate::timing::valid_tempo;

/// Tempo used when none or an invalid one is given.
pub const DEFAULT_TEMPO: f64 = 60.0;

/// Audio and timing options for a [`ScriptEngine`](crate::ScriptEngine).
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOptions {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per control cycle.
    pub ksmps: u32,
    /// Score tempo. At 60 BPM one beat is one second.
    pub tempo_bpm: f64,
    /// Amplitude of full scale output.
    pub zero_dbfs: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            ksmps: 64,
            tempo_bpm: DEFAULT_TEMPO,
            zero_dbfs: 1.0,
        }
    }
}

impl EngineOptions {
    /// Create a new EngineOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    /// Set the control block size.
    pub fn with_ksmps(mut self, ksmps: u32) -> Self {
        self.ksmps = ksmps.max(1);
        self
    }

    /// Set the tempo in BPM.
    ///
    /// Values that are not finite and positive are ignored.
    pub fn with_tempo(mut self, bpm: f64) -> Self {
        if valid_tempo(bpm) {
            self.tempo_bpm = bpm;
        } else {
            log::warn!("[script] ignoring invalid tempo {}", bpm);
        }
        self
    }

    /// Set the full scale amplitude.
    pub fn with_zero_dbfs(mut self, zero_dbfs: f64) -> Self {
        self.zero_dbfs = zero_dbfs;
        self
    }

    /// Control rate in Hz.
    pub fn control_rate(&self) -> f64 {
        self.sample_rate as f64 / self.ksmps as f64
    }

    /// Duration of one control cycle.
    pub fn control_period(&self) -> Duration {
        Duration::from_secs_f64(self.ksmps as f64 / self.sample_rate as f64)
    }
}
