//! Engine-held data shared with script functions.
//!
//! Control channels and function tables are reachable from two places: the
//! host (through [`ScriptEngine`](crate::ScriptEngine)) and script functions
//! registered with the Rhai engine. The [`EngineStore`] wraps them in an
//! `Arc<RwLock>` so both sides see the same data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use liveperf_core::Value;

/// First number handed out to tables created without an explicit number.
const FIRST_AUTO_TABLE: i64 = 101;

/// Channels, tables and the published score position.
#[derive(Clone, Debug)]
pub struct StoreState {
    /// Named control channels.
    pub channels: HashMap<String, Value>,
    /// Function tables by number.
    pub tables: BTreeMap<i64, Vec<f64>>,
    /// Score position in beats, updated every cycle.
    pub score_time: f64,
    next_table: i64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
            tables: BTreeMap::new(),
            score_time: 0.0,
            next_table: FIRST_AUTO_TABLE,
        }
    }
}

/// Shared handle to the engine data.
#[derive(Clone, Default)]
pub struct EngineStore {
    state: Arc<RwLock<StoreState>>,
}

impl EngineStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the state with a closure.
    pub fn with_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&StoreState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Write to the state with a closure.
    pub fn with_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut StoreState) -> R,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Read a control channel.
    pub fn channel(&self, name: &str) -> Option<Value> {
        self.with_read(|s| s.channels.get(name).cloned())
    }

    /// Write a control channel.
    pub fn set_channel(&self, name: &str, value: Value) {
        self.with_write(|s| {
            s.channels.insert(name.to_string(), value);
        });
    }

    /// Create a table with the next free number.
    pub fn create_table(&self, values: Vec<f64>) -> i64 {
        self.with_write(|s| {
            while s.tables.contains_key(&s.next_table) {
                s.next_table += 1;
            }
            let number = s.next_table;
            s.next_table += 1;
            s.tables.insert(number, values);
            number
        })
    }

    /// Create or replace a table with an explicit number.
    pub fn create_table_at(&self, number: i64, values: Vec<f64>) {
        self.with_write(|s| {
            s.tables.insert(number, values);
        });
    }

    /// Copy a table's contents.
    pub fn table(&self, number: i64) -> Option<Vec<f64>> {
        self.with_read(|s| s.tables.get(&number).cloned())
    }

    /// Mutate a table in place.
    pub fn update_table<F, R>(&self, number: i64, f: F) -> Option<R>
    where
        F: FnOnce(&mut [f64]) -> R,
    {
        self.with_write(|s| s.tables.get_mut(&number).map(|t| f(t.as_mut_slice())))
    }

    /// Published score position in beats.
    pub fn score_time(&self) -> f64 {
        self.with_read(|s| s.score_time)
    }

    pub(crate) fn publish_score_time(&self, beats: f64) {
        self.with_write(|s| s.score_time = beats);
    }
}

impl std::fmt::Debug for EngineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_read(|s| {
            f.debug_struct("EngineStore")
                .field("channels", &s.channels.len())
                .field("tables", &s.tables.len())
                .finish_non_exhaustive()
        })
    }
}
