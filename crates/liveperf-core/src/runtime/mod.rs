//! Performance runtime - drives an engine from a dedicated thread.
//!
//! The runtime manages:
//! - The render loop and its play/pause/stop state machine
//! - Priority request callbacks and the per-cycle process callback
//! - Loop statistics and deadline miss accounting

mod state;
mod stats;
pub mod thread;

pub use state::PlayState;
pub use stats::PerformanceStats;
pub use thread::{CycleContext, PerformanceHandle, PerformanceThread, ProcessFn};
