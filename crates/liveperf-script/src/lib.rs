//! liveperf script - a Rhai-backed reference engine for liveperf.
//!
//! [`ScriptEngine`] implements the [`liveperf_core::Engine`] contract so the
//! performance thread can be exercised end to end without a real synthesis
//! engine:
//!
//! - **Orchestra** - Rhai source; top-level code runs once, `instr_N`
//!   functions are instruments
//! - **Score** - `i` events start instruments on a beat, `e` ends the score
//! - **Store** - Control channels and function tables shared with scripts
//! - **Clock** - One control cycle of `ksmps` samples per render step
//!
//! ```no_run
//! use liveperf_core::{EventKind, PerformanceThread};
//! use liveperf_script::{EngineOptions, ScriptEngine};
//!
//! # fn main() -> anyhow::Result<()> {
//! let orc = r#"
//!     let givalue = 1000;
//!     fn instr_1(p) { chnset(p[3], "freq"); }
//! "#;
//! let engine = ScriptEngine::with_orchestra(EngineOptions::new(), orc)?;
//! let perf = PerformanceThread::new(engine)?;
//! perf.play();
//! perf.score_event(0.0, EventKind::Instrument, vec![1.0, 0.0, 1.0, 440.0]);
//! assert_eq!(perf.eval_code("return givalue").wait()?.as_f64(), Some(1000.0));
//! perf.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod engine;
pub mod options;
pub mod scheduler;
pub mod store;
pub mod timing;


pub use engine::ScriptEngine;
pub use options::EngineOptions;
pub use store::{EngineStore, StoreState};
pub use timing::{BeatTime, ScoreClock};
