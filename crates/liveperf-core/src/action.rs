//! Control actions submitted to the performance thread.
//!
//! Every mutation of a running engine is expressed as a [`ControlAction`].
//! Actions are built on producer threads, travel through the request queue and
//! are executed exactly once on the performance thread between render cycles.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::completion::{completion_slot, Completion, Pending};
use crate::engine::{Engine, ScoreEvent, Value};
use crate::error::PerfError;

/// A caller-supplied closure run on the performance thread with engine access.
///
/// Captured state is moved in, so nothing borrowed from the producer outlives
/// the call site.
pub type CustomFn<E> = Box<dyn FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static>;

/// A unit of work for the performance thread.
pub enum ControlAction<E> {
    /// Compile orchestra source.
    Compile {
        source: String,
        reply: Option<Completion<()>>,
    },

    /// Evaluate source text and hand the value back.
    Evaluate {
        source: String,
        reply: Completion<Value>,
    },

    /// Write a control channel.
    SetChannel { name: String, value: Value },

    /// Schedule a score event.
    ScheduleEvent(ScoreEvent),

    /// Run an arbitrary closure against the engine.
    Custom(CustomFn<E>),
}

impl<E: Engine> ControlAction<E> {
    /// Compile action whose result can be awaited.
    pub fn compile(source: impl Into<String>) -> (Self, Pending<()>) {
        let (reply, pending) = completion_slot();
        let action = ControlAction::Compile {
            source: source.into(),
            reply: Some(reply),
        };
        (action, pending)
    }

    /// Compile action whose result is only logged.
    pub fn compile_detached(source: impl Into<String>) -> Self {
        ControlAction::Compile {
            source: source.into(),
            reply: None,
        }
    }

    /// Evaluate action with its completion slot.
    pub fn evaluate(source: impl Into<String>) -> (Self, Pending<Value>) {
        let (reply, pending) = completion_slot();
        let action = ControlAction::Evaluate {
            source: source.into(),
            reply,
        };
        (action, pending)
    }

    /// Channel write action.
    pub fn set_channel(name: impl Into<String>, value: impl Into<Value>) -> Self {
        ControlAction::SetChannel {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Score event action.
    pub fn schedule(event: ScoreEvent) -> Self {
        ControlAction::ScheduleEvent(event)
    }

    /// Closure action.
    pub fn custom<F>(f: F) -> Self
    where
        F: FnOnce(&mut E) -> anyhow::Result<()> + Send + 'static,
    {
        ControlAction::Custom(Box::new(f))
    }

    /// Execute the action against the engine.
    ///
    /// Compile, evaluation and scheduling failures go to the action's own
    /// result channel or the log. Only a failing closure is reported back to
    /// the caller, as a [`PerfError::CallbackFault`].
    pub fn execute(self, engine: &mut E) -> Result<(), PerfError> {
        match self {
            ControlAction::Compile { source, reply } => {
                let result = engine.compile(&source).map_err(PerfError::from);
                if let Err(e) = &result {
                    log::warn!("[perf] {}", e);
                }
                if let Some(reply) = reply {
                    reply.complete(result);
                }
                Ok(())
            }
            ControlAction::Evaluate { source, reply } => {
                let result = engine.evaluate(&source).map_err(PerfError::from);
                if let Err(e) = &result {
                    log::debug!("[perf] {}", e);
                }
                if !reply.complete(result) {
                    log::debug!("[perf] evaluation result dropped, nobody waiting");
                }
                Ok(())
            }
            ControlAction::SetChannel { name, value } => {
                engine.set_control_channel(&name, value);
                Ok(())
            }
            ControlAction::ScheduleEvent(event) => {
                if let Err(e) = engine.schedule_event(&event) {
                    log::warn!(
                        "[perf] score event '{}' rejected: {}",
                        event.kind.opcode(),
                        e
                    );
                }
                Ok(())
            }
            ControlAction::Custom(f) => run_guarded(f, engine),
        }
    }

    /// Discard the action, resolving any completion slot as cancelled.
    pub fn cancel(self) {
        match self {
            ControlAction::Compile {
                reply: Some(reply), ..
            } => {
                reply.cancel();
            }
            ControlAction::Evaluate { reply, .. } => {
                reply.cancel();
            }
            _ => {}
        }
    }
}

impl<E> ControlAction<E> {
    /// Get a short name for this action's kind (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlAction::Compile { .. } => "Compile",
            ControlAction::Evaluate { .. } => "Evaluate",
            ControlAction::SetChannel { .. } => "SetChannel",
            ControlAction::ScheduleEvent(_) => "ScheduleEvent",
            ControlAction::Custom(_) => "Custom",
        }
    }
}

impl<E> fmt::Debug for ControlAction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAction::Compile { source, reply } => f
                .debug_struct("Compile")
                .field("source_len", &source.len())
                .field("awaited", &reply.is_some())
                .finish(),
            ControlAction::Evaluate { source, .. } => {
                f.debug_struct("Evaluate").field("source", source).finish()
            }
            ControlAction::SetChannel { name, value } => f
                .debug_struct("SetChannel")
                .field("name", name)
                .field("value", value)
                .finish(),
            ControlAction::ScheduleEvent(event) => {
                f.debug_tuple("ScheduleEvent").field(event).finish()
            }
            ControlAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Run a callback, turning errors and panics into a callback fault.
pub(crate) fn run_guarded<E, F>(f: F, engine: &mut E) -> Result<(), PerfError>
where
    F: FnOnce(&mut E) -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f(engine))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PerfError::CallbackFault(format!("{:#}", e))),
        Err(payload) => Err(PerfError::CallbackFault(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
