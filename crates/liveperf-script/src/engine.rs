//! Rhai-backed reference engine.
//!
//! Orchestra code is Rhai source. Top-level statements run once at compile
//! time, so `let givalue = 1000;` declares a global visible to later
//! evaluations. Instruments are functions named `instr_N` taking the pfield
//! array, started by `i` events whose p1 is `N`:
//!
//! ```text
//! fn instr_1(p) {
//!     chnset(p[3], "freq");
//! }
//! ```
//!
//! The instrument function runs once when the instance starts; the instance
//! then stays active for p3 beats (negative p3 holds it). Rendering produces
//! no audio: it only advances score time and starts and retires instances.

use anyhow::Context;
use liveperf_core::{CycleStatus, Engine, EngineError, EventKind, ScoreEvent, Value};
use rhai::{Array, Dynamic, Scope, AST};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::api::{create_engine, dynamic_to_value};
use crate::options::EngineOptions;
use crate::scheduler::{ActiveInstance, ActiveInstances, EventQueue, ScheduledEvent};
use crate::store::EngineStore;
use crate::timing::{BeatTime, ScoreClock};

/// Function name for instrument number `n`.
fn instrument_fn_name(number: i64) -> String {
    format!("instr_{}", number)
}

/// Reference engine driven by a performance thread.
pub struct ScriptEngine {
    rhai: rhai::Engine,
    /// Globals declared by orchestra code.
    scope: Scope<'static>,
    /// All functions compiled so far, without top-level statements.
    orchestra: AST,
    store: EngineStore,
    clock: ScoreClock,
    events: EventQueue,
    active: ActiveInstances,
    /// Reused buffer for events due in the current cycle.
    due: Vec<ScheduledEvent>,
    options: EngineOptions,
    instances_started: u64,
    missed_events: u64,
    finished: bool,
}

impl ScriptEngine {
    /// Create an engine with an empty orchestra.
    pub fn new(options: EngineOptions) -> Self {
        let store = EngineStore::new();
        let rhai = create_engine(&store);

        let mut scope = Scope::new();
        scope.push_constant("sr", options.sample_rate as i64);
        scope.push_constant("ksmps", options.ksmps as i64);
        scope.push_constant("kr", options.control_rate());
        scope.push_constant("zerodbfs", options.zero_dbfs);

        Self {
            rhai,
            scope,
            orchestra: AST::empty(),
            store,
            clock: ScoreClock::new(&options),
            events: EventQueue::new(),
            active: ActiveInstances::new(),
            due: Vec::new(),
            options,
            instances_started: 0,
            missed_events: 0,
            finished: false,
        }
    }

    /// Create an engine and compile an initial orchestra.
    pub fn with_orchestra(options: EngineOptions, source: &str) -> Result<Self, EngineError> {
        let mut engine = Self::new(options);
        engine.compile(source)?;
        Ok(engine)
    }

    /// Create an engine from an orchestra file.
    pub fn from_file(options: EngineOptions, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read orchestra {}", path.display()))?;
        Self::with_orchestra(options, &source)
            .with_context(|| format!("Failed to compile orchestra {}", path.display()))
    }

    /// Options the engine was created with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Shared channel and table store.
    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    /// Copy a function table.
    pub fn table(&self, number: i64) -> Option<Vec<f64>> {
        self.store.table(number)
    }

    /// Mutate a function table in place.
    pub fn update_table<F, R>(&self, number: i64, f: F) -> Option<R>
    where
        F: FnOnce(&mut [f64]) -> R,
    {
        self.store.update_table(number, f)
    }

    /// Check if `instr_N` has been compiled.
    pub fn instrument_defined(&self, number: i64) -> bool {
        let name = instrument_fn_name(number);
        self.orchestra
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == 1)
    }

    /// Number of running instrument instances.
    pub fn active_instances(&self) -> usize {
        self.active.len()
    }

    /// Number of running instances of one instrument.
    pub fn active_instances_of(&self, number: i64) -> usize {
        self.active.count_of(number)
    }

    /// Instances started since creation.
    pub fn instances_started(&self) -> u64 {
        self.instances_started
    }

    /// Events skipped because their instrument was not defined.
    pub fn missed_events(&self) -> u64 {
        self.missed_events
    }

    /// Events waiting for their start beat.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Whether an end event has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Current tempo.
    pub fn tempo(&self) -> f64 {
        self.clock.tempo()
    }

    /// Change tempo from the current position onward.
    ///
    /// The tempo must be a finite positive BPM value.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), EngineError> {
        if !self.clock.set_tempo(bpm) {
            return Err(EngineError::Schedule(format!("invalid tempo {}", bpm)));
        }
        Ok(())
    }

    /// Number of variables in the global scope, constants included.
    pub fn global_count(&self) -> usize {
        self.scope.len()
    }

    /// Drop older copies of globals declared again by later code.
    ///
    /// The latest declaration wins and keeps its constness.
    fn collapse_redeclared_globals(&mut self) {
        let mut seen = HashSet::new();
        let mut shadowed = vec![false; self.scope.len()];
        let names: Vec<&str> = self.scope.iter_raw().map(|(name, _, _)| name).collect();
        for (i, name) in names.iter().enumerate().rev() {
            if !seen.insert(*name) {
                shadowed[i] = true;
            }
        }
        if !shadowed.contains(&true) {
            return;
        }

        let entries: Vec<(String, bool, Dynamic)> = self
            .scope
            .iter()
            .map(|(name, constant, value)| (name.to_string(), constant, value))
            .collect();
        self.scope.clear();
        for ((name, constant, value), shadowed) in entries.into_iter().zip(shadowed) {
            if shadowed {
                continue;
            }
            if constant {
                self.scope.push_constant_dynamic(name, value);
            } else {
                self.scope.push_dynamic(name, value);
            }
        }
    }

    /// Start an instance of the event's instrument.
    ///
    /// A missing instrument is counted and skipped. A failing instrument
    /// function is returned as an error and no instance is started.
    fn start_instance(&mut self, event: ScheduledEvent, now: BeatTime) -> Result<(), String> {
        let number = event.params[0].floor() as i64;
        if !self.instrument_defined(number) {
            self.missed_events += 1;
            log::warn!("[script] instr {} is not defined, event skipped", number);
            return Ok(());
        }

        let duration = event.params[2];
        let pfields: Array = event.params.iter().map(|p| Dynamic::from_float(*p)).collect();
        let name = instrument_fn_name(number);
        self.rhai
            .call_fn::<Dynamic>(&mut self.scope, &self.orchestra, &name, (pfields,))
            .map(|_| ())
            .map_err(|e| format!("instr {} init failed: {}", number, e))?;

        self.instances_started += 1;
        let end = (duration >= 0.0).then(|| now + BeatTime::from_beats(duration));
        self.active.start(ActiveInstance {
            instrument: number,
            end,
        });
        log::trace!("[script] instr {} started at beat {:.3}", number, now.to_beats());
        Ok(())
    }
}

impl Engine for ScriptEngine {
    fn compile(&mut self, source: &str) -> Result<(), EngineError> {
        let ast = self
            .rhai
            .compile(source)
            .map_err(|e| EngineError::Compile(e.to_string()))?;

        // Top-level code may call functions compiled earlier.
        let mut program = self.orchestra.merge(&ast);
        // Globals are committed only if the whole init succeeds.
        let mut scope = self.scope.clone();
        self.rhai
            .run_ast_with_scope(&mut scope, &program)
            .map_err(|e| EngineError::Compile(format!("init failed: {}", e)))?;

        program.clear_statements();
        self.orchestra = program;
        self.scope = scope;
        self.collapse_redeclared_globals();
        log::debug!(
            "[script] orchestra compiled, {} functions defined",
            self.orchestra.iter_functions().count()
        );
        Ok(())
    }

    fn evaluate(&mut self, source: &str) -> Result<Value, EngineError> {
        let ast = self
            .rhai
            .compile(source)
            .map_err(|e| EngineError::Evaluation(e.to_string()))?;
        let program = self.orchestra.merge(&ast);
        let result = self
            .rhai
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &program)
            .map_err(|e| EngineError::Evaluation(e.to_string()));
        self.collapse_redeclared_globals();
        let result = result?;
        let type_name = result.type_name();
        dynamic_to_value(result).ok_or_else(|| {
            EngineError::Evaluation(format!("cannot return a value of type {}", type_name))
        })
    }

    fn control_channel(&self, name: &str) -> Option<Value> {
        self.store.channel(name)
    }

    fn set_control_channel(&mut self, name: &str, value: Value) {
        self.store.set_channel(name, value);
    }

    fn schedule_event(&mut self, event: &ScoreEvent) -> Result<(), EngineError> {
        if !event.delay_beats.is_finite() || event.delay_beats < 0.0 {
            return Err(EngineError::Schedule(format!(
                "delay must be a non-negative number of beats, got {}",
                event.delay_beats
            )));
        }
        if event.params.iter().any(|p| !p.is_finite()) {
            return Err(EngineError::Schedule("pfields must be finite".to_string()));
        }

        let offset = match event.kind {
            EventKind::Instrument => {
                if event.params.len() < 3 {
                    return Err(EngineError::Schedule(format!(
                        "i event needs at least 3 pfields, got {}",
                        event.params.len()
                    )));
                }
                if event.params[0] < 1.0 {
                    return Err(EngineError::Schedule(format!(
                        "invalid instrument number {}",
                        event.params[0]
                    )));
                }
                if event.params[1] < 0.0 {
                    return Err(EngineError::Schedule(format!(
                        "start time must not be negative, got {}",
                        event.params[1]
                    )));
                }
                event.params[1]
            }
            EventKind::End => event.params.first().copied().unwrap_or(0.0).max(0.0),
        };

        let at = BeatTime::from_beats(self.clock.beats() + event.delay_beats + offset);
        self.events.push(
            at,
            ScheduledEvent {
                kind: event.kind,
                params: event.params.clone(),
            },
        );
        Ok(())
    }

    fn render_cycle(&mut self) -> Result<CycleStatus, EngineError> {
        if self.finished {
            return Ok(CycleStatus::Finished);
        }

        let now = self.clock.beat_time();
        let mut due = std::mem::take(&mut self.due);
        let mut failures = Vec::new();
        self.events.pop_due(now, &mut due);
        for event in due.drain(..) {
            match event.kind {
                EventKind::Instrument => {
                    if let Err(e) = self.start_instance(event, now) {
                        failures.push(e);
                    }
                }
                EventKind::End => self.finished = true,
            }
        }
        self.due = due;

        self.active.retire(now);
        self.clock.advance();
        self.store.publish_score_time(self.clock.beats());

        if self.finished {
            log::info!(
                "[script] end of score at beat {:.3} ({} instances played)",
                now.to_beats(),
                self.instances_started
            );
            self.events.clear();
            return Ok(CycleStatus::Finished);
        }
        // The cycle still counts; failed instances are simply not running.
        if !failures.is_empty() {
            return Err(EngineError::Render(failures.join("; ")));
        }
        Ok(CycleStatus::Continue)
    }

    fn control_period(&self) -> Duration {
        self.clock.control_period()
    }

    fn score_time(&self) -> f64 {
        self.clock.beats()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("options", &self.options)
            .field("score_time", &self.clock.beats())
            .field("pending_events", &self.events.len())
            .field("active_instances", &self.active.len())
            .finish_non_exhaustive()
    }
}
