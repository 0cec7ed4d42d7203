//! Errors surfaced to callers of the performance thread.

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors delivered through completion slots and the handle API.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PerfError {
    /// The engine rejected orchestra source.
    #[error("compile failed: {0}")]
    Compile(String),

    /// Evaluating source text failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The request was discarded because the performance stopped first.
    #[error("request cancelled before it was executed")]
    Cancelled,

    /// A caller-supplied callback returned an error or panicked.
    #[error("callback fault: {0}")]
    CallbackFault(String),

    /// Any other engine failure.
    #[error(transparent)]
    Engine(EngineError),

    /// A bounded wait on a completion slot elapsed.
    #[error("no result after {0:?}")]
    Timeout(Duration),
}

impl From<EngineError> for PerfError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Compile(msg) => PerfError::Compile(msg),
            EngineError::Evaluation(msg) => PerfError::Evaluation(msg),
            other => PerfError::Engine(other),
        }
    }
}
