//! liveperf core - a real-time performance thread for synthesis engines.
//!
//! This crate drives an external synthesis engine from a dedicated thread and
//! lets any number of other threads send it work while audio is rendering:
//!
//! - **Engine** - The narrow contract a synthesis engine implements
//! - **Actions** - Compile, evaluate, set-channel, schedule and custom requests
//! - **Queue** - Non-blocking multi-producer request queue
//! - **Completion** - One-shot slots returning results to waiting producers
//! - **Runtime** - The performance thread, its state machine and statistics
//!
//! # Architecture
//!
//! All engine mutation funnels through one thread. Producers never touch the
//! engine; they enqueue a [`ControlAction`] through a [`PerformanceHandle`].
//! Between render cycles the [`PerformanceThread`] drains a bounded number of
//! actions, so the engine needs no lock and a request backlog cannot starve
//! rendering.
//!
//! ```no_run
//! # use liveperf_core::{Engine, EventKind, PerformanceThread};
//! # fn demo<E: Engine>(engine: E) -> anyhow::Result<()> {
//! let perf = PerformanceThread::new(engine)?;
//! perf.play();
//! perf.score_event(0.0, EventKind::Instrument, vec![1.0, 0.0, 10.0, 440.0]);
//! let value = perf.eval_code("return givalue").wait()?;
//! println!("givalue = {}", value);
//! let _engine = perf.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use action::{ControlAction, CustomFn};
pub use completion::{completion_slot, Completion, Pending};
pub use config::{ClockMode, PerformanceConfig, DEFAULT_DRAIN_BUDGET};
pub use engine::{CycleStatus, Engine, EngineError, EventKind, ScoreEvent, Value};
pub use error::PerfError;
pub use queue::{request_queue, RequestReceiver, RequestSender};
pub use runtime::{
    CycleContext, PerformanceHandle, PerformanceStats, PerformanceThread, PlayState, ProcessFn,
};
