//! The engine contract consumed by the performance thread.
//!
//! A synthesis engine is an opaque collaborator. The performance thread only
//! needs to compile and evaluate source text, exchange control channel values,
//! schedule score events and advance rendering by one control cycle. Anything
//! implementing [`Engine`] can be driven by a
//! [`PerformanceThread`](crate::PerformanceThread).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A value exchanged with the engine through channels and evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A numeric value (control rate scalar).
    Number(f64),
    /// A string value (string channels, evaluation results).
    Text(String),
}

impl Value {
    /// Get the numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    /// Get the string value, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Kind of score event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Start an instrument instance (`i` statement).
    Instrument,
    /// End the performance (`e` statement).
    End,
}

impl EventKind {
    /// The score opcode letter for this kind.
    pub fn opcode(self) -> char {
        match self {
            EventKind::Instrument => 'i',
            EventKind::End => 'e',
        }
    }

    /// Parse a score opcode letter.
    pub fn from_opcode(opcode: char) -> Option<Self> {
        match opcode {
            'i' => Some(EventKind::Instrument),
            'e' => Some(EventKind::End),
            _ => None,
        }
    }
}

/// A timed score event.
///
/// `delay_beats` is relative to the current performance position. Zero asks
/// for the earliest possible effect, which is the next rendered cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreEvent {
    /// Delay in beats from the current score position.
    pub delay_beats: f64,
    /// What the event does.
    pub kind: EventKind,
    /// Parameter fields (p1, p2, ...).
    pub params: Vec<f64>,
}

impl ScoreEvent {
    /// Create an event with an explicit delay.
    pub fn new(delay_beats: f64, kind: EventKind, params: Vec<f64>) -> Self {
        Self {
            delay_beats,
            kind,
            params,
        }
    }

    /// Create an event that takes effect as early as possible.
    pub fn immediate(kind: EventKind, params: Vec<f64>) -> Self {
        Self::new(0.0, kind, params)
    }
}

/// Outcome of a single render step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleStatus {
    /// Keep rendering.
    Continue,
    /// The score has ended; the performance should stop.
    Finished,
}

/// Errors reported by an engine.
///
/// None of these are fatal to the performance thread. They are routed back to
/// whoever submitted the request, or logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("invalid score event: {0}")]
    Schedule(String),

    #[error("render error: {0}")]
    Render(String),
}

/// A real-time synthesis engine driven by a performance thread.
///
/// All methods are called from the performance thread only, so
/// implementations need no internal locking for the thread's sake.
/// `render_cycle` carries the real-time deadline and should not block.
pub trait Engine: Send + 'static {
    /// Compile orchestra source and merge it into the running engine.
    fn compile(&mut self, source: &str) -> Result<(), EngineError>;

    /// Evaluate source text and return its result.
    fn evaluate(&mut self, source: &str) -> Result<Value, EngineError>;

    /// Read a control channel.
    fn control_channel(&self, name: &str) -> Option<Value>;

    /// Write a control channel, creating it if needed.
    fn set_control_channel(&mut self, name: &str, value: Value);

    /// Schedule a score event relative to the current position.
    fn schedule_event(&mut self, event: &ScoreEvent) -> Result<(), EngineError>;

    /// Render one control cycle.
    fn render_cycle(&mut self) -> Result<CycleStatus, EngineError>;

    /// Wall-clock duration of one control cycle.
    fn control_period(&self) -> Duration;

    /// Current score position in beats.
    fn score_time(&self) -> f64 {
        0.0
    }
}
