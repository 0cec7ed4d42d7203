//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{CycleStatus, Engine, EngineError, EventKind, ScoreEvent, Value};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Call log readable from the test thread while the engine runs elsewhere.
#[derive(Clone, Default)]
pub(crate) struct EngineLog(Arc<Mutex<Vec<String>>>);

impl EngineLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Engine that records every call it receives.
///
/// Compiling source containing "error" fails. Evaluating returns the channel
/// named by the source text.
pub(crate) struct RecordingEngine {
    log: EngineLog,
    channels: HashMap<String, Value>,
    renders: Arc<AtomicU64>,
    period: Duration,
    render_delay: Option<Duration>,
    finish_after: Option<u64>,
    record_renders: bool,
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self {
            log: EngineLog::default(),
            channels: HashMap::new(),
            renders: Arc::new(AtomicU64::new(0)),
            period: Duration::from_micros(100),
            render_delay: None,
            finish_after: None,
            record_renders: false,
        }
    }

    pub(crate) fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub(crate) fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    pub(crate) fn finishing_after(mut self, cycles: u64) -> Self {
        self.finish_after = Some(cycles);
        self
    }

    pub(crate) fn recording_renders(mut self) -> Self {
        self.record_renders = true;
        self
    }

    pub(crate) fn log(&self) -> EngineLog {
        self.log.clone()
    }

    pub(crate) fn renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }
}

impl Engine for RecordingEngine {
    fn compile(&mut self, source: &str) -> Result<(), EngineError> {
        if source.contains("error") {
            return Err(EngineError::Compile(format!("cannot compile '{}'", source)));
        }
        self.log.push(format!("compile:{}", source));
        Ok(())
    }

    fn evaluate(&mut self, source: &str) -> Result<Value, EngineError> {
        self.log.push(format!("eval:{}", source));
        self.channels
            .get(source)
            .cloned()
            .ok_or_else(|| EngineError::Evaluation(format!("undefined '{}'", source)))
    }

    fn control_channel(&self, name: &str) -> Option<Value> {
        self.channels.get(name).cloned()
    }

    fn set_control_channel(&mut self, name: &str, value: Value) {
        self.log.push(format!("set:{}", name));
        self.channels.insert(name.to_string(), value);
    }

    fn schedule_event(&mut self, event: &ScoreEvent) -> Result<(), EngineError> {
        if event.kind == EventKind::Instrument && event.params.is_empty() {
            return Err(EngineError::Schedule("missing p1".to_string()));
        }
        self.log.push(format!("event:{}", event.kind.opcode()));
        Ok(())
    }

    fn render_cycle(&mut self) -> Result<CycleStatus, EngineError> {
        let rendered = self.renders.fetch_add(1, Ordering::Relaxed) + 1;
        if self.record_renders {
            self.log.push("render");
        }
        if let Some(delay) = self.render_delay {
            thread::sleep(delay);
        }
        match self.finish_after {
            Some(limit) if rendered >= limit => Ok(CycleStatus::Finished),
            _ => Ok(CycleStatus::Continue),
        }
    }

    fn control_period(&self) -> Duration {
        self.period
    }
}
