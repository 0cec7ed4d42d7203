//! The performance thread.
//!
//! The performance thread is the only place the engine is touched once a
//! performance has been created. Each cycle it:
//! - Runs one-shot request callbacks (they take priority over the queue)
//! - Renders one control cycle, unless paused
//! - Drains a bounded number of queued control actions
//! - Invokes the process callback
//!
//! Producers interact through a [`PerformanceHandle`], which can be cloned
//! freely and sent to other threads.

use crate::action::{run_guarded, ControlAction, CustomFn};
use crate::completion::Pending;
use crate::config::{ClockMode, PerformanceConfig};
use crate::engine::{CycleStatus, Engine, EventKind, ScoreEvent, Value};
use crate::queue::{request_queue, RequestReceiver, RequestSender};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Instant;

use super::state::{Phase, PlayState, SharedState};
use super::stats::{PerformanceStats, StatsCounters};

/// Per-cycle callback with engine access.
pub type ProcessFn<E> = Box<dyn FnMut(&mut E, &CycleContext) + Send + 'static>;

/// Information passed to the process callback each rendered cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleContext {
    /// Index of the rendered cycle, starting at 0.
    pub cycle: u64,
    /// Engine score position in beats after the render step.
    pub score_time: f64,
}

/// Requests serviced at the top of a cycle, before the regular queue.
enum PriorityRequest<E> {
    Callback(CustomFn<E>),
    SetProcessCallback(Option<ProcessFn<E>>),
}

/// State shared between handles and the loop.
struct Shared {
    state: SharedState,
    stats: StatsCounters,
    thread: OnceLock<Thread>,
}

impl Shared {
    fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

/// Handle to a running performance thread.
///
/// This is the main interface for producers. Every request is queued and
/// executed on the performance thread; none of these calls block.
pub struct PerformanceHandle<E> {
    /// Sender for control actions.
    requests: RequestSender<E>,
    /// Sender for priority callbacks and process callback swaps.
    priority_tx: Sender<PriorityRequest<E>>,
    /// State machine, stats and the thread to wake.
    shared: Arc<Shared>,
}

impl<E> Clone for PerformanceHandle<E> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            priority_tx: self.priority_tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<E: Engine> PerformanceHandle<E> {
    /// Start or resume rendering. Returns the resulting state.
    pub fn play(&self) -> PlayState {
        let state = self.shared.state.play();
        self.shared.wake();
        log::debug!("[perf] play -> {}", state);
        state
    }

    /// Pause rendering. Queued requests are still serviced, one per cycle.
    pub fn pause(&self) -> PlayState {
        let state = self.shared.state.pause();
        log::debug!("[perf] pause -> {}", state);
        state
    }

    /// Request the loop to stop.
    ///
    /// Cooperative: an in-flight render step completes first. Queued
    /// requests are discarded and their completion slots cancelled.
    pub fn stop(&self) -> PlayState {
        let state = self.shared.state.stop();
        self.shared.wake();
        log::debug!("[perf] stop -> {}", state);
        state
    }

    /// Current state.
    pub fn state(&self) -> PlayState {
        self.shared.state.public()
    }

    /// Check if the loop is playing or paused.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), PlayState::Playing | PlayState::Paused)
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> PerformanceStats {
        self.shared.stats.snapshot()
    }

    /// Number of queued actions not yet executed.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Queue an action. Returns false if the loop has exited.
    pub fn enqueue(&self, action: ControlAction<E>) -> bool {
        self.requests.enqueue(action)
    }

    /// Compile orchestra source on the performance thread.
    ///
    /// The returned slot may be ignored; failures are logged either way.
    pub fn compile_orc(&self, source: impl Into<String>) -> Pending<()> {
        let (action, pending) = ControlAction::compile(source);
        self.enqueue(action);
        pending
    }

    /// Evaluate source text on the performance thread.
    pub fn eval_code(&self, source: impl Into<String>) -> Pending<Value> {
        let (action, pending) = ControlAction::evaluate(source);
        self.enqueue(action);
        pending
    }

    /// Write a control channel.
    pub fn set_control_channel(&self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        self.enqueue(ControlAction::set_channel(name, value))
    }

    /// Schedule a score event `delay_beats` after the current position.
    ///
    /// A schedule is only ordered after a compile sent from the same thread.
    /// To define an instrument and play it atomically, use [`custom`](Self::custom).
    pub fn score_event(&self, delay_beats: f64, kind: EventKind, params: Vec<f64>) -> bool {
        self.enqueue(ControlAction::schedule(ScoreEvent::new(delay_beats, kind, params)))
    }

    /// Queue a closure to run with engine access.
    pub fn custom<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue(ControlAction::custom(f))
    }

    /// Register a one-shot callback for the next cycle.
    ///
    /// Runs before that cycle's queue drain, even while paused.
    pub fn request_callback<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static,
    {
        let sent = self
            .priority_tx
            .send(PriorityRequest::Callback(Box::new(f)))
            .is_ok();
        self.shared.wake();
        sent
    }

    /// Install the per-cycle process callback, replacing any previous one.
    ///
    /// Takes effect at the start of the next cycle.
    pub fn set_process_callback<F>(&self, f: F) -> bool
    where
        F: FnMut(&mut E, &CycleContext) + Send + 'static,
    {
        self.priority_tx
            .send(PriorityRequest::SetProcessCallback(Some(Box::new(f))))
            .is_ok()
    }

    /// Remove the process callback.
    pub fn clear_process_callback(&self) -> bool {
        self.priority_tx
            .send(PriorityRequest::SetProcessCallback(None))
            .is_ok()
    }
}

/// A performance thread bound to an engine.
///
/// Created in the Stopped state. The engine is moved onto the thread and
/// handed back by [`join`](Self::join) or [`shutdown`](Self::shutdown), so the
/// caller decides when it is torn down.
pub struct PerformanceThread<E: Engine> {
    /// Handle for interacting with the thread.
    handle: PerformanceHandle<E>,
    /// Join handle returning the engine.
    thread_handle: Option<JoinHandle<E>>,
}

impl<E: Engine> PerformanceThread<E> {
    /// Create a performance thread with default configuration.
    pub fn new(engine: E) -> Result<Self> {
        Self::with_config(engine, PerformanceConfig::default())
    }

    /// Create a performance thread.
    ///
    /// The engine should already hold a valid orchestra. The thread is
    /// spawned immediately but does nothing until [`play`](Self::play).
    pub fn with_config(engine: E, config: PerformanceConfig) -> Result<Self> {
        let (requests, request_rx) = request_queue();
        let (priority_tx, priority_rx) = unbounded();
        let shared = Arc::new(Shared {
            state: SharedState::new(),
            stats: StatsCounters::default(),
            thread: OnceLock::new(),
        });

        let thread_shared = shared.clone();
        let thread_name = config.thread_name.clone();
        let thread_handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _exit = ExitGuard(thread_shared.clone());
                let mut perf = PerformanceLoop {
                    engine,
                    requests: request_rx,
                    priority_rx,
                    process_callback: None,
                    shared: thread_shared,
                    config,
                    rendered: 0,
                };
                perf.run();
                perf.into_engine()
            })
            .with_context(|| format!("Failed to spawn performance thread '{}'", thread_name))?;

        let _ = shared.thread.set(thread_handle.thread().clone());
        log::info!("[perf] performance thread '{}' created", thread_name);

        Ok(Self {
            handle: PerformanceHandle {
                requests,
                priority_tx,
                shared,
            },
            thread_handle: Some(thread_handle),
        })
    }

    /// Get a cloneable handle for producers.
    pub fn handle(&self) -> &PerformanceHandle<E> {
        &self.handle
    }

    /// Start or resume rendering.
    pub fn play(&self) -> PlayState {
        self.handle.play()
    }

    /// Pause rendering.
    pub fn pause(&self) -> PlayState {
        self.handle.pause()
    }

    /// Request the loop to stop.
    pub fn stop(&self) -> PlayState {
        self.handle.stop()
    }

    /// Current state.
    pub fn state(&self) -> PlayState {
        self.handle.state()
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> PerformanceStats {
        self.handle.stats()
    }

    /// Queue an action.
    pub fn enqueue(&self, action: ControlAction<E>) -> bool {
        self.handle.enqueue(action)
    }

    /// Compile orchestra source on the performance thread.
    pub fn compile_orc(&self, source: impl Into<String>) -> Pending<()> {
        self.handle.compile_orc(source)
    }

    /// Evaluate source text on the performance thread.
    pub fn eval_code(&self, source: impl Into<String>) -> Pending<Value> {
        self.handle.eval_code(source)
    }

    /// Write a control channel.
    pub fn set_control_channel(&self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        self.handle.set_control_channel(name, value)
    }

    /// Schedule a score event.
    pub fn score_event(&self, delay_beats: f64, kind: EventKind, params: Vec<f64>) -> bool {
        self.handle.score_event(delay_beats, kind, params)
    }

    /// Queue a closure to run with engine access.
    pub fn custom<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static,
    {
        self.handle.custom(f)
    }

    /// Register a one-shot callback for the next cycle.
    pub fn request_callback<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static,
    {
        self.handle.request_callback(f)
    }

    /// Install the per-cycle process callback.
    pub fn set_process_callback<F>(&self, f: F) -> bool
    where
        F: FnMut(&mut E, &CycleContext) + Send + 'static,
    {
        self.handle.set_process_callback(f)
    }

    /// Wait for the loop to exit and take the engine back.
    ///
    /// Blocks until [`stop`](Self::stop) is called from somewhere or the
    /// score ends.
    pub fn join(mut self) -> Result<E> {
        let thread_handle = self
            .thread_handle
            .take()
            .ok_or_else(|| anyhow!("Performance thread already joined"))?;
        thread_handle
            .join()
            .map_err(|_| anyhow!("Performance thread panicked"))
    }

    /// Stop the loop and take the engine back.
    pub fn shutdown(self) -> Result<E> {
        self.stop();
        self.join()
    }
}

impl<E: Engine> Drop for PerformanceThread<E> {
    fn drop(&mut self) {
        if let Some(thread_handle) = self.thread_handle.take() {
            self.handle.stop();
            let _ = thread_handle.join();
        }
    }
}

/// Marks the state as exited when the thread ends, including on panic.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.state.mark_exited();
    }
}

/// The loop that owns the engine.
struct PerformanceLoop<E: Engine> {
    engine: E,
    requests: RequestReceiver<E>,
    priority_rx: Receiver<PriorityRequest<E>>,
    process_callback: Option<ProcessFn<E>>,
    shared: Arc<Shared>,
    config: PerformanceConfig,
    /// Rendered cycles so far.
    rendered: u64,
}

impl<E: Engine> PerformanceLoop<E> {
    fn run(&mut self) {
        log::debug!("[perf] loop waiting for play");
        loop {
            match self.shared.state.phase() {
                Phase::Idle => thread::park_timeout(self.config.idle_interval),
                Phase::Playing => self.cycle(false),
                Phase::Paused => self.cycle(true),
                Phase::Stopping | Phase::Exited => break,
            }
        }
        self.finish();
    }

    fn cycle(&mut self, paused: bool) {
        let started = Instant::now();
        self.shared.stats.record_cycle();
        self.run_priority_requests();

        if paused {
            self.drain(Some(1));
            thread::park_timeout(self.config.idle_interval);
            return;
        }

        let status = self.render();
        self.drain(self.config.drain_budget);
        self.run_process_callback();
        self.rendered += 1;

        if status == CycleStatus::Finished {
            log::info!("[perf] score finished after {} cycles", self.rendered);
            self.shared.state.stop();
            return;
        }

        if self.config.clock == ClockMode::Wallclock {
            let period = self.engine.control_period();
            let elapsed = started.elapsed();
            if elapsed < period {
                thread::sleep(period - elapsed);
            }
        }
    }

    /// Render one control cycle and check it against the deadline.
    fn render(&mut self) -> CycleStatus {
        let period = self.engine.control_period();
        let started = Instant::now();
        let result = self.engine.render_cycle();
        let elapsed = started.elapsed();

        self.shared.stats.record_render(elapsed);
        if !period.is_zero() && elapsed > period {
            let misses = self.shared.stats.record_deadline_miss();
            if self.config.log_deadline_misses {
                log::warn!(
                    "[perf] render overran control period: {:?} > {:?} (miss #{})",
                    elapsed,
                    period,
                    misses
                );
            }
        }

        match result {
            Ok(status) => status,
            Err(e) => {
                log::error!("[perf] render failed: {}", e);
                CycleStatus::Continue
            }
        }
    }

    /// Run the request callbacks registered before this cycle started.
    fn run_priority_requests(&mut self) {
        let pending = self.priority_rx.len();
        for _ in 0..pending {
            let Ok(request) = self.priority_rx.try_recv() else {
                break;
            };
            match request {
                PriorityRequest::Callback(f) => {
                    self.shared.stats.record_request_callback();
                    if let Err(e) = run_guarded(f, &mut self.engine) {
                        self.shared.stats.record_fault();
                        log::error!("[perf] request callback failed: {}", e);
                    }
                }
                PriorityRequest::SetProcessCallback(callback) => {
                    log::debug!(
                        "[perf] process callback {}",
                        if callback.is_some() { "installed" } else { "cleared" }
                    );
                    self.process_callback = callback;
                }
            }
        }
    }

    /// Execute up to `budget` queued actions.
    fn drain(&mut self, budget: Option<usize>) -> usize {
        let mut executed = 0;
        while budget.map_or(true, |b| executed < b) {
            let Some(action) = self.requests.try_dequeue_one() else {
                break;
            };
            let kind = action.type_name();
            if let Err(e) = action.execute(&mut self.engine) {
                self.shared.stats.record_fault();
                log::error!("[perf] {} action failed: {}", kind, e);
            }
            self.shared.stats.record_action();
            executed += 1;
        }
        executed
    }

    fn run_process_callback(&mut self) {
        let Some(callback) = self.process_callback.as_mut() else {
            return;
        };
        let context = CycleContext {
            cycle: self.rendered,
            score_time: self.engine.score_time(),
        };
        let outcome = run_guarded(
            |engine: &mut E| {
                callback(engine, &context);
                Ok(())
            },
            &mut self.engine,
        );
        if let Err(e) = outcome {
            self.shared.stats.record_fault();
            log::error!("[perf] process callback removed: {}", e);
            self.process_callback = None;
        }
    }

    /// Discard everything still queued.
    fn finish(&mut self) {
        let discarded = self.requests.discard_pending();
        let mut dropped_callbacks = 0;
        while let Ok(request) = self.priority_rx.try_recv() {
            if let PriorityRequest::Callback(_) = request {
                dropped_callbacks += 1;
            }
        }
        self.shared.stats.record_discarded(discarded + dropped_callbacks);
        log::info!(
            "[perf] stopped after {} cycles ({} requests discarded)",
            self.shared.stats.cycles_total(),
            discarded + dropped_callbacks
        );
    }

    fn into_engine(self) -> E {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerfError;
    use crate::testing::{init_logging, wait_until, EngineLog, RecordingEngine};
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config() -> PerformanceConfig {
        PerformanceConfig::new()
            .with_thread_name("liveperf-test")
            .with_deadline_logging(false)
    }

    fn spawn(engine: RecordingEngine) -> PerformanceThread<RecordingEngine> {
        PerformanceThread::with_config(engine, test_config()).expect("spawn performance thread")
    }

    #[test]
    fn test_lifecycle_transitions() {
        init_logging();
        let perf = spawn(RecordingEngine::new());
        assert_eq!(perf.state(), PlayState::Stopped);
        assert_eq!(perf.pause(), PlayState::Stopped);
        assert_eq!(perf.play(), PlayState::Playing);
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_rendered > 0));
        assert_eq!(perf.pause(), PlayState::Paused);
        assert!(perf.handle().is_running());
        assert_eq!(perf.play(), PlayState::Playing);

        let handle = perf.handle().clone();
        let engine = perf.shutdown().expect("join");
        assert_eq!(handle.state(), PlayState::Stopped);
        assert!(!handle.is_running());
        assert!(engine.renders() > 0);

        // Nothing can restart an exited performance.
        assert_eq!(handle.play(), PlayState::Stopped);
    }

    #[test]
    fn test_stop_before_play_returns_engine() {
        let perf = spawn(RecordingEngine::new());
        assert_eq!(perf.stop(), PlayState::Stopping);
        let engine = perf.join().expect("join");
        assert_eq!(engine.renders(), 0);
    }

    #[test]
    fn test_evaluate_round_trip() {
        let mut engine = RecordingEngine::new();
        engine.set_control_channel("givalue", Value::Number(1000.0));
        let perf = spawn(engine);
        perf.play();
        let value = perf.eval_code("givalue").wait_timeout(TIMEOUT);
        assert_eq!(value, Ok(Value::Number(1000.0)));
        let missing = perf.eval_code("nothing").wait_timeout(TIMEOUT);
        assert!(matches!(missing, Err(PerfError::Evaluation(_))));
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_stop_cancels_pending_evaluate() {
        let perf = spawn(RecordingEngine::new());
        let pending = perf.eval_code("givalue");
        let compile = perf.compile_orc("instr 1");
        perf.stop();
        assert_eq!(pending.wait_timeout(TIMEOUT), Err(PerfError::Cancelled));
        assert_eq!(compile.wait_timeout(TIMEOUT), Err(PerfError::Cancelled));

        let handle = perf.handle().clone();
        let engine = perf.join().unwrap();
        assert!(engine.log().entries().is_empty());
        assert_eq!(handle.stats().actions_discarded, 2);

        // Requests after exit resolve immediately.
        let late = handle.eval_code("givalue");
        assert_eq!(late.wait_timeout(TIMEOUT), Err(PerfError::Cancelled));
        assert!(!handle.request_callback(|_| Ok(())));
    }

    #[test]
    fn test_single_producer_order_is_preserved() {
        let engine = RecordingEngine::new();
        let log = engine.log();
        let perf = spawn(engine);
        perf.play();
        for i in 0..200 {
            perf.set_control_channel(format!("ch{}", i), i as f64);
        }
        assert!(wait_until(TIMEOUT, || log.count("set:") == 200));
        let expected: Vec<String> = (0..200).map(|i| format!("set:ch{}", i)).collect();
        assert_eq!(log.entries(), expected);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_drain_is_bounded_per_cycle() {
        let engine = RecordingEngine::new().recording_renders();
        let log = engine.log();
        let config = test_config().with_drain_budget(Some(2));
        let perf = PerformanceThread::with_config(engine, config).unwrap();
        for i in 0..5 {
            perf.set_control_channel(format!("a{}", i), 0.0);
        }
        perf.play();
        assert!(wait_until(TIMEOUT, || log.count("set:") == 5));
        perf.shutdown().unwrap();

        let entries = log.entries();
        assert_eq!(
            &entries[..8],
            &[
                "render", "set:a0", "set:a1", "render", "set:a2", "set:a3", "render", "set:a4"
            ]
        );
    }

    #[test]
    fn test_request_callback_runs_before_queue_drain() {
        let engine = RecordingEngine::new();
        let log = engine.log();
        let perf = spawn(engine);
        perf.custom(|engine: &mut RecordingEngine| {
            engine.log().push("queued");
            Ok(())
        });
        perf.request_callback(|engine: &mut RecordingEngine| {
            engine.log().push("priority");
            Ok(())
        });
        perf.play();
        assert!(wait_until(TIMEOUT, || log.entries().len() == 2));
        assert_eq!(log.entries(), vec!["priority", "queued"]);
        assert_eq!(perf.stats().request_callbacks_run, 1);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_faulty_custom_does_not_stop_the_loop() {
        init_logging();
        let engine = RecordingEngine::new();
        let log = engine.log();
        let perf = spawn(engine);
        perf.play();
        perf.custom(|_| Err(anyhow!("malformed request")));
        perf.custom(|_| panic!("callback blew up"));
        perf.request_callback(|_| Err(anyhow!("priority failure")));
        perf.set_control_channel("after", 1.0);
        assert!(wait_until(TIMEOUT, || log.count("set:after") == 1));

        let rendered = perf.stats().cycles_rendered;
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_rendered > rendered + 2));
        assert_eq!(perf.stats().callback_faults, 3);
        assert_eq!(perf.state(), PlayState::Playing);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_paused_services_requests_without_rendering() {
        let engine = RecordingEngine::new();
        let log = engine.log();
        let perf = spawn(engine);
        perf.play();
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_rendered > 0));
        perf.pause();
        thread::sleep(Duration::from_millis(20));
        let rendered = perf.stats().cycles_rendered;

        perf.compile_orc("instr 2");
        let value = perf.eval_code("missing");
        perf.set_control_channel("kfreq", 800.0);
        assert!(value.wait_timeout(TIMEOUT).is_err());
        assert!(wait_until(TIMEOUT, || log.count("set:kfreq") == 1));
        assert_eq!(perf.stats().cycles_rendered, rendered);
        assert_eq!(log.entries(), vec!["compile:instr 2", "eval:missing", "set:kfreq"]);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_paused_cycle_services_at_most_one_request() {
        let engine = RecordingEngine::new();
        let log = engine.log();
        let config = test_config().with_idle_interval(Duration::from_millis(30));
        let perf = PerformanceThread::with_config(engine, config).unwrap();
        perf.play();
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_rendered > 0));
        perf.pause();

        // A cycle already past its state check may still render; the one
        // after it is paused.
        let paused_at = perf.stats().cycles_total;
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_total > paused_at + 1));
        let before = perf.stats();

        for i in 0..5 {
            perf.set_control_channel(format!("k{}", i), i as f64);
        }
        let target = before.actions_executed + 3;
        assert!(wait_until(TIMEOUT, || perf.stats().actions_executed >= target));
        let after = perf.stats();

        let actions = after.actions_executed - before.actions_executed;
        let cycles = after.cycles_total - before.cycles_total;
        // The cycle in progress at `before` may still take one.
        assert!(actions <= cycles + 1, "{} actions in {} paused cycles", actions, cycles);
        assert_eq!(after.cycles_rendered, before.cycles_rendered);

        assert!(wait_until(TIMEOUT, || log.count("set:k") == 5));
        let order: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("set:k"))
            .collect();
        assert_eq!(order, vec!["set:k0", "set:k1", "set:k2", "set:k3", "set:k4"]);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_process_callback_runs_every_rendered_cycle() {
        let perf = spawn(RecordingEngine::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        perf.set_process_callback(move |_engine: &mut RecordingEngine, ctx: &CycleContext| {
            sink.lock().unwrap().push(ctx.cycle);
        });
        perf.play();
        assert!(wait_until(TIMEOUT, || seen.lock().unwrap().len() >= 10));
        perf.handle().clear_process_callback();
        perf.shutdown().unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(seen[0], 0);
    }

    #[test]
    fn test_panicking_process_callback_is_removed() {
        let perf = spawn(RecordingEngine::new());
        perf.set_process_callback(|_: &mut RecordingEngine, _: &CycleContext| panic!("bad cycle"));
        perf.play();
        assert!(wait_until(TIMEOUT, || perf.stats().callback_faults == 1));
        let rendered = perf.stats().cycles_rendered;
        assert!(wait_until(TIMEOUT, || perf.stats().cycles_rendered > rendered + 5));
        assert_eq!(perf.stats().callback_faults, 1);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_score_end_stops_the_thread() {
        let perf = spawn(RecordingEngine::new().finishing_after(3));
        perf.play();
        assert!(wait_until(TIMEOUT, || perf.state() == PlayState::Stopped));
        let engine = perf.join().unwrap();
        assert_eq!(engine.renders(), 3);
    }

    #[test]
    fn test_deadline_misses_are_counted() {
        let engine = RecordingEngine::new()
            .with_period(Duration::from_micros(50))
            .with_render_delay(Duration::from_millis(1));
        let perf = spawn(engine);
        perf.play();
        assert!(wait_until(TIMEOUT, || perf.stats().deadline_misses >= 3));
        assert!(perf.stats().worst_render >= Duration::from_millis(1));
        assert_eq!(perf.state(), PlayState::Playing);
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_freewheel_renders_without_sleeping() {
        let config = test_config().with_clock(ClockMode::Freewheel);
        let engine = RecordingEngine::new().with_period(Duration::from_secs(1));
        let perf = PerformanceThread::with_config(engine, config).unwrap();
        perf.play();
        assert!(wait_until(Duration::from_millis(500), || {
            perf.stats().cycles_rendered > 10
        }));
        perf.shutdown().unwrap();
    }

    #[test]
    fn test_random_transitions_always_settle() {
        let perf = spawn(RecordingEngine::new());
        let handle = perf.handle().clone();
        let done = Arc::new(AtomicBool::new(false));

        let drivers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..200 {
                        if done.load(Ordering::Relaxed) {
                            break;
                        }
                        let state = match rng.random_range(0..10) {
                            0 => handle.stop(),
                            1..=5 => handle.play(),
                            _ => handle.pause(),
                        };
                        assert!(matches!(
                            state,
                            PlayState::Stopped
                                | PlayState::Playing
                                | PlayState::Paused
                                | PlayState::Stopping
                        ));
                        thread::sleep(Duration::from_micros(50));
                    }
                })
            })
            .collect();

        for driver in drivers {
            driver.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);

        handle.stop();
        assert!(wait_until(TIMEOUT, || handle.state() == PlayState::Stopped));
        perf.join().unwrap();
    }

    #[test]
    fn test_handles_from_many_threads() {
        let engine = RecordingEngine::new();
        let log: EngineLog = engine.log();
        let perf = spawn(engine);
        perf.play();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let handle = perf.handle().clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        handle.set_control_channel(format!("p{}_{}", p, i), i as f64);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(wait_until(TIMEOUT, || log.count("set:") == 200));
        assert_eq!(perf.stats().actions_executed, 200);
        perf.shutdown().unwrap();
    }
}
