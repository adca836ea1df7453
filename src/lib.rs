//! Durable scatter-gather loan broker.
//!
//! The crate has two halves:
//!
//! - A deterministic orchestration core that records append-only `Event`s
//!   and replays them to rebuild orchestration state after a restart:
//!   the data model (`Event`, `Action`), the turn driver (`run_turn`,
//!   `run_turn_with`, `Executor`), an `OrchestrationContext` that schedules
//!   activities with stable correlation IDs, and the `join` combinator.
//! - The `broker` module, which drives a credit-score lookup followed by a
//!   parallel fan-out to every registered lender and aggregates the answers.
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

pub mod broker;
pub mod error;
pub mod futures;
pub mod logging;
pub mod providers;
pub mod runtime;

pub use error::FailureReason;
pub use crate::futures::{ActivityResult, DurableFuture, JoinFuture};
pub use runtime::{
    ActivityInvocation, ActivityState, InstanceSnapshot, OrchestrationHandler, OrchestrationRegistry,
    OrchestrationRegistryBuilder, OrchestrationStatus, Runtime,
};

use crate::_typed_codec::Codec;
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};

// Internal codec utilities for typed I/O (kept private; public API remains ergonomic)
pub(crate) mod _typed_codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;
    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }
    pub struct Json;
    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // Plain strings travel unquoted
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => {
                    // Fallback: treat raw string as JSON string value
                    let val = Value::String(s.to_string());
                    serde_json::from_value(val).map_err(|e| e.to_string())
                }
            }
        }
    }
}

/// Append-only orchestration history entries persisted by a provider and
/// consumed during replay. Activity variants share a correlation `id` that
/// pairs each schedule with its completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Instance was created for the named orchestration with its input.
    OrchestrationStarted { name: String, input: String },
    /// Orchestration completed with a final result.
    OrchestrationCompleted { output: String },
    /// Orchestration failed with a final error.
    OrchestrationFailed { error: String },
    /// Activity attempt was scheduled. `timeout_ms` bounds how long the executor waits.
    ActivityScheduled {
        id: u64,
        name: String,
        input: String,
        attempt: u32,
        timeout_ms: Option<u64>,
    },
    /// Activity attempt completed successfully with a result.
    ActivityCompleted { id: u64, attempt: u32, result: String },
    /// Activity attempt reached a terminal failure.
    ActivityFailed { id: u64, attempt: u32, reason: FailureReason },
}

impl Event {
    /// Correlation id for activity events; `None` for instance-level events.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Event::ActivityScheduled { id, .. }
            | Event::ActivityCompleted { id, .. }
            | Event::ActivityFailed { id, .. } => Some(*id),
            Event::OrchestrationStarted { .. }
            | Event::OrchestrationCompleted { .. }
            | Event::OrchestrationFailed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. }
        )
    }
}

/// Declarative decisions produced by an orchestration turn. The host
/// materializes these into work for the activity executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Schedule an activity invocation.
    CallActivity {
        id: u64,
        name: String,
        input: String,
        attempt: u32,
        timeout_ms: Option<u64>,
    },
}

/// Per-schedule knobs for an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOptions {
    pub attempt: u32,
    pub timeout_ms: Option<u64>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            attempt: 1,
            timeout_ms: None,
        }
    }
}

impl ActivityOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[derive(Debug)]
pub(crate) struct CtxInner {
    pub(crate) history: Vec<Event>,
    actions: Vec<Action>,

    // Ids are handed out in scheduling order, so replaying the same code
    // yields the same ids as the recorded history.
    next_correlation_id: u64,
    recorded_max_id: u64,

    turn_index: u64,
    // Per-turn buffered logs (messages to flush once per progress turn)
    log_buffer: Vec<(LogLevel, String)>,
    nondeterminism: Option<String>,
}

impl CtxInner {
    fn new(history: Vec<Event>) -> Self {
        let recorded_max_id = history
            .iter()
            .filter_map(|e| match e {
                Event::ActivityScheduled { id, .. } => Some(*id),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Self {
            history,
            actions: Vec::new(),
            next_correlation_id: 1,
            recorded_max_id,
            turn_index: 0,
            log_buffer: Vec::new(),
            nondeterminism: None,
        }
    }

    pub(crate) fn record_action(&mut self, a: Action) {
        self.actions.push(a);
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_correlation_id;
        self.next_correlation_id += 1;
        id
    }

    fn is_replaying(&self) -> bool {
        self.next_correlation_id <= self.recorded_max_id
    }

    pub(crate) fn flag_nondeterminism(&mut self, msg: String) {
        // First mismatch wins; later ones are consequences of it
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(msg);
        }
    }

    pub(crate) fn completion_for(&self, id: u64) -> Option<ActivityResult> {
        self.history.iter().find_map(|e| match e {
            Event::ActivityCompleted { id: cid, result, .. } if *cid == id => Some(Ok(result.clone())),
            Event::ActivityFailed { id: cid, reason, .. } if *cid == id => Some(Err(reason.clone())),
            _ => None,
        })
    }
}

/// User-facing orchestration context for scheduling and replay-safe helpers.
#[derive(Clone)]
pub struct OrchestrationContext {
    pub(crate) inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    /// Construct a new context from an existing history vector.
    pub fn new(history: Vec<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(history))),
        }
    }

    fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut self.inner.lock().unwrap().actions)
    }

    pub(crate) fn set_turn_index(&self, idx: u64) {
        self.inner.lock().unwrap().turn_index = idx;
    }

    /// True while the orchestrator is re-deriving decisions that are already
    /// recorded in history.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().unwrap().is_replaying()
    }

    /// Drain the buffered log messages accumulated during the last turn.
    pub fn take_log_buffer(&self) -> Vec<(LogLevel, String)> {
        std::mem::take(&mut self.inner.lock().unwrap().log_buffer)
    }
    /// Buffer a structured log message for the current turn.
    pub fn push_log(&self, level: LogLevel, msg: String) {
        self.inner.lock().unwrap().log_buffer.push((level, msg));
    }

    /// Buffer a trace entry. Every turn re-buffers the same lines in the same
    /// order, so the host emits only those past what an earlier turn produced.
    pub fn trace(&self, level: LogLevel, message: impl Into<String>) {
        self.push_log(level, message.into());
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        self.trace(LogLevel::Info, message);
    }
    pub fn trace_warn(&self, message: impl Into<String>) {
        self.trace(LogLevel::Warn, message);
    }
    pub fn trace_error(&self, message: impl Into<String>) {
        self.trace(LogLevel::Error, message);
    }
    pub fn trace_debug(&self, message: impl Into<String>) {
        self.trace(LogLevel::Debug, message);
    }

    /// Schedule an activity and return a `DurableFuture` correlated to it.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        self.schedule_activity_with(name, input, ActivityOptions::default())
    }

    /// Schedule an activity with an explicit attempt number and deadline.
    pub fn schedule_activity_with(
        &self,
        name: impl Into<String>,
        input: impl Into<String>,
        options: ActivityOptions,
    ) -> DurableFuture {
        let id = self.inner.lock().unwrap().next_id();
        DurableFuture::new(id, name.into(), input.into(), options, None, self.clone())
    }

    /// Typed helper that serializes input; decode the output via `into_activity_typed`.
    /// An input that fails to encode resolves to `FailureReason::Decode` without scheduling.
    pub fn schedule_activity_typed<In: Serialize>(&self, name: impl Into<String>, input: &In) -> DurableFuture {
        self.schedule_activity_typed_with(name, input, ActivityOptions::default())
    }

    pub fn schedule_activity_typed_with<In: Serialize>(
        &self,
        name: impl Into<String>,
        input: &In,
        options: ActivityOptions,
    ) -> DurableFuture {
        let id = self.inner.lock().unwrap().next_id();
        match crate::_typed_codec::Json::encode(input) {
            Ok(payload) => DurableFuture::new(id, name.into(), payload, options, None, self.clone()),
            Err(e) => DurableFuture::new(
                id,
                name.into(),
                String::new(),
                options,
                Some(FailureReason::Decode(e)),
                self.clone(),
            ),
        }
    }

    /// Wait for every future, returning results in the order given.
    pub fn join(&self, futures: Vec<DurableFuture>) -> JoinFuture {
        JoinFuture::new(futures)
    }
}

fn poll_once<F: Future>(fut: std::pin::Pin<&mut F>) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    fut.poll(&mut cx)
}

/// Tuple returned by `run_turn` containing the updated history, actions to
/// execute, per-turn logs, and an optional output.
pub type TurnResult<O> = (Vec<Event>, Vec<Action>, Vec<(LogLevel, String)>, Option<O>);

/// `TurnResult` plus the first nondeterminism diagnostic raised during the poll.
pub type DetailedTurnResult<O> = (
    Vec<Event>,
    Vec<Action>,
    Vec<(LogLevel, String)>,
    Option<O>,
    Option<String>,
);

/// Poll the orchestrator once with the provided history, producing
/// updated history, requested `Action`s, buffered logs, and an optional output.
pub fn run_turn<O, F>(history: Vec<Event>, orchestrator: impl Fn(OrchestrationContext) -> F) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    let (hist_after, actions, logs, out, _nondeterminism) = run_turn_with(history, 0, orchestrator);
    (hist_after, actions, logs, out)
}

/// Same as `run_turn` but annotates the context with a caller-supplied
/// turn index and reports replay mismatches.
pub fn run_turn_with<O, F>(
    history: Vec<Event>,
    turn_index: u64,
    orchestrator: impl Fn(OrchestrationContext) -> F,
) -> DetailedTurnResult<O>
where
    F: Future<Output = O>,
{
    let ctx = OrchestrationContext::new(history);
    ctx.set_turn_index(turn_index);
    let fut = pin!(orchestrator(ctx.clone()));
    let out = match poll_once(fut) {
        Poll::Ready(out) => Some(out),
        Poll::Pending => None,
    };
    let actions = ctx.take_actions();
    let logs = ctx.take_log_buffer();
    let mut inner = ctx.inner.lock().unwrap();
    let hist_after = std::mem::take(&mut inner.history);
    let nondeterminism = inner.nondeterminism.take();
    (hist_after, actions, logs, out, nondeterminism)
}

/// Helper for single-threaded, host-driven execution in tests and samples.
pub struct Executor;

impl Executor {
    /// Drives an orchestrator by alternately replaying one turn and invoking
    /// the provided `execute_actions` to materialize requested actions into
    /// history, until the orchestrator completes.
    ///
    /// Panics if a turn reports a replay mismatch.
    pub fn drive_to_completion<O, F, X>(
        mut history: Vec<Event>,
        orchestrator: impl Fn(OrchestrationContext) -> F,
        mut execute_actions: X,
    ) -> (Vec<Event>, O)
    where
        F: Future<Output = O>,
        X: FnMut(Vec<Action>, &mut Vec<Event>),
    {
        let mut turn_index = 0;
        loop {
            let (hist_after_replay, actions, _logs, output, nondeterminism) =
                run_turn_with(history, turn_index, &orchestrator);
            if let Some(msg) = nondeterminism {
                panic!("{msg}");
            }
            history = hist_after_replay;
            turn_index += 1;
            if let Some(out) = output {
                return (history, out);
            }
            execute_actions(actions, &mut history);
        }
    }
}
