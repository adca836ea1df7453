use crate::_typed_codec::{Codec, Json};
use crate::providers::in_memory::InMemoryHistoryStore;
use crate::providers::{HistoryStore, QueueKind, WorkItem};
use crate::{Event, OrchestrationContext};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub mod completions;
pub mod executor;
pub mod registry;
pub mod replay;
pub mod router;
pub mod status;

pub use executor::ActivityExecutor;
pub use registry::{ActivityRegistry, OrchestrationRegistry, OrchestrationRegistryBuilder};
pub use router::{InstanceRouter, OrchestratorMsg};
pub use status::{ActivityInvocation, ActivityState, InstanceSnapshot, OrchestrationStatus};

/// Error type returned by orchestration wait helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Other(String),
}

/// Trait implemented by orchestration handlers that can be invoked by the runtime.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

type ResultWaiter = oneshot::Sender<(Vec<Event>, Result<String, String>)>;

/// In-process runtime that executes activities and persists history via a
/// `HistoryStore`. Each instance is driven by its own task; activities run
/// concurrently on the worker dispatcher.
pub struct Runtime {
    router: Arc<InstanceRouter>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    instance_joins: Mutex<Vec<JoinHandle<()>>>,
    history_store: Arc<dyn HistoryStore>,
    // std mutex so the instance guard can clear its entry from Drop
    active_instances: std::sync::Mutex<HashSet<String>>,
    result_waiters: Mutex<HashMap<String, Vec<ResultWaiter>>>,
    orchestration_registry: OrchestrationRegistry,
    running_activities: std::sync::Mutex<HashSet<(String, u64)>>,
}

struct ActiveGuard {
    rt: Arc<Runtime>,
    inst: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.rt.active_instances.lock() {
            active.remove(&self.inst);
        }
    }
}

impl Runtime {
    // Associated constants for runtime behavior
    const COMPLETION_BATCH_LIMIT: usize = 128;
    const POLLER_GATE_DELAY_MS: u64 = 5;
    const POLLER_IDLE_SLEEP_MS: u64 = 10;
    const ORCH_IDLE_DEHYDRATE_MS: u64 = 1000;

    /// Start a new runtime using the in-memory history store.
    pub async fn start(
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
    ) -> Arc<Self> {
        let history_store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::default());
        Self::start_with_store(history_store, activity_registry, orchestration_registry).await
    }

    /// Start a new runtime with a custom `HistoryStore` implementation.
    pub async fn start_with_store(
        history_store: Arc<dyn HistoryStore>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_registry: OrchestrationRegistry,
    ) -> Arc<Self> {
        // Install a default subscriber if none set (ok to call many times)
        crate::logging::init_tracing();

        let runtime = Arc::new(Self {
            router: Arc::new(InstanceRouter::default()),
            joins: Mutex::new(Vec::new()),
            instance_joins: Mutex::new(Vec::new()),
            history_store,
            active_instances: std::sync::Mutex::new(HashSet::new()),
            result_waiters: Mutex::new(HashMap::new()),
            orchestration_registry,
            running_activities: std::sync::Mutex::new(HashSet::new()),
        });

        let handle = runtime.clone().start_orchestration_dispatcher();
        runtime.joins.lock().await.push(handle);

        let work_handle = runtime.clone().start_work_dispatcher(activity_registry);
        runtime.joins.lock().await.push(work_handle);

        runtime
    }

    /// The store this runtime persists to.
    pub fn history_store(&self) -> Arc<dyn HistoryStore> {
        self.history_store.clone()
    }

    /// Start an orchestration using raw String input/output. Fails if the instance already exists.
    pub async fn start_orchestration(
        self: Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: impl Into<String>,
    ) -> Result<JoinHandle<(Vec<Event>, Result<String, String>)>, String> {
        let rx = self
            .clone()
            .start_internal_rx(instance, orchestration_name, input.into())
            .await?;
        Ok(tokio::spawn(async move {
            rx.await
                .unwrap_or_else(|_| (Vec::new(), Err("runtime stopped before the instance finished".to_string())))
        }))
    }

    /// Start a typed orchestration; input/output are serialized internally.
    pub async fn start_orchestration_typed<In, Out>(
        self: Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: In,
    ) -> Result<JoinHandle<(Vec<Event>, Result<Out, String>)>, String>
    where
        In: Serialize,
        Out: DeserializeOwned + Send + 'static,
    {
        let payload = Json::encode(&input).map_err(|e| format!("encode: {e}"))?;
        let rx = self
            .clone()
            .start_internal_rx(instance, orchestration_name, payload)
            .await?;
        Ok(tokio::spawn(async move {
            match rx.await {
                Ok((hist, Ok(s))) => (hist, Json::decode::<Out>(&s)),
                Ok((hist, Err(e))) => (hist, Err(e)),
                Err(_) => (Vec::new(), Err("runtime stopped before the instance finished".to_string())),
            }
        }))
    }

    async fn start_internal_rx(
        self: Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: String,
    ) -> Result<oneshot::Receiver<(Vec<Event>, Result<String, String>)>, String> {
        self.history_store.create_instance(instance).await?;
        let started = vec![Event::OrchestrationStarted {
            name: orchestration_name.to_string(),
            input,
        }];
        self.history_store
            .append(instance, started)
            .await
            .map_err(|e| format!("failed to append OrchestrationStarted: {e}"))?;
        // Register the waiter before the instance can possibly finish
        let (tx, rx) = oneshot::channel();
        self.result_waiters
            .lock()
            .await
            .entry(instance.to_string())
            .or_default()
            .push(tx);
        self.ensure_instance_active(instance, orchestration_name).await;
        info!(instance, orchestration = orchestration_name, "orchestration started");
        Ok(rx)
    }

    /// Re-activate an instance from its persisted history after a restart.
    /// Work for scheduled-but-incomplete activities is re-enqueued idempotently.
    /// Terminal instances are left alone.
    pub async fn resume(self: &Arc<Self>, instance: &str) -> Result<OrchestrationStatus, String> {
        let hist = self.history_store.read(instance).await;
        let status = status::status_from_history(&hist);
        match status {
            OrchestrationStatus::NotFound => return Err(format!("instance not found: {instance}")),
            OrchestrationStatus::Completed { .. } | OrchestrationStatus::Failed { .. } => return Ok(status),
            OrchestrationStatus::Created | OrchestrationStatus::Running => {}
        }
        let name = hist
            .iter()
            .find_map(|e| match e {
                Event::OrchestrationStarted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let active = self
            .active_instances
            .lock()
            .map(|a| a.contains(instance))
            .unwrap_or(false);
        if !active {
            let running = self.running_activities_of(instance);
            completions::rehydrate_pending(instance, &hist, &self.history_store, |id| running.contains(&id)).await;
        }
        self.ensure_instance_active(instance, &name).await;
        Ok(status)
    }

    /// Resume every non-terminal instance in the store; returns the ids that were resumed.
    pub async fn resume_all(self: &Arc<Self>) -> Vec<String> {
        let mut resumed = Vec::new();
        for inst in self.history_store.list_instances().await {
            match self.resume(&inst).await {
                Ok(OrchestrationStatus::Created | OrchestrationStatus::Running) => resumed.push(inst),
                Ok(_) => {}
                Err(e) => warn!(instance = %inst, error = %e, "skipping instance on resume"),
            }
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "resumed in-flight instances");
        }
        resumed
    }

    fn running_activities_of(&self, instance: &str) -> HashSet<u64> {
        self.running_activities
            .lock()
            .map(|r| r.iter().filter(|(i, _)| i == instance).map(|(_, id)| *id).collect())
            .unwrap_or_default()
    }

    async fn ensure_instance_active(self: &Arc<Self>, instance: &str, orchestration_name: &str) -> bool {
        {
            let Ok(mut active) = self.active_instances.lock() else {
                return false;
            };
            if !active.insert(instance.to_string()) {
                return false;
            }
        }
        let guard = ActiveGuard {
            rt: self.clone(),
            inst: instance.to_string(),
        };
        let rt = self.clone();
        let inst = instance.to_string();
        let orch_name = orchestration_name.to_string();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _ = rt.run_instance_to_completion(&inst, &orch_name).await;
        });
        self.instance_joins.lock().await.push(handle);
        true
    }

    fn start_orchestration_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Some((item, token)) = self.history_store.dequeue_peek_lock(QueueKind::Orchestrator).await {
                    let msg = match item {
                        WorkItem::ActivityCompleted {
                            instance,
                            id,
                            attempt,
                            result,
                        } => {
                            debug!(instance = %instance, id, attempt, "ActivityCompleted");
                            OrchestratorMsg::ActivityCompleted {
                                instance,
                                id,
                                attempt,
                                result,
                                ack_token: Some(token.clone()),
                            }
                        }
                        WorkItem::ActivityFailed {
                            instance,
                            id,
                            attempt,
                            reason,
                        } => {
                            debug!(instance = %instance, id, attempt, reason = %reason, "ActivityFailed");
                            OrchestratorMsg::ActivityFailed {
                                instance,
                                id,
                                attempt,
                                reason,
                                ack_token: Some(token.clone()),
                            }
                        }
                        // No ActivityExecute should land on Orchestrator queue
                        other => {
                            error!(?other, "unexpected WorkItem in Orchestrator dispatcher; dropping");
                            let _ = self.history_store.ack(QueueKind::Orchestrator, &token).await;
                            continue;
                        }
                    };
                    self.deliver_or_rehydrate(msg, token).await;
                } else {
                    tokio::time::sleep(std::time::Duration::from_millis(Self::POLLER_IDLE_SLEEP_MS)).await;
                }
            }
        })
    }

    /// Forward a completion to its live instance task. If the instance is not
    /// active, rehydrate it and abandon the item so it is redelivered; completions
    /// for terminal or unknown instances are acked and dropped.
    async fn deliver_or_rehydrate(self: &Arc<Self>, msg: OrchestratorMsg, token: String) {
        let Err(msg) = self.router.try_send(msg).await else {
            return;
        };
        let instance = msg.instance().to_string();
        let hist = self.history_store.read(&instance).await;
        let orch_name = hist.iter().find_map(|e| match e {
            Event::OrchestrationStarted { name, .. } => Some(name.clone()),
            _ => None,
        });
        let Some(orch_name) = orch_name else {
            warn!(instance = %instance, "completion for unknown instance; dropping");
            let _ = self.history_store.ack(QueueKind::Orchestrator, &token).await;
            return;
        };
        if hist.iter().any(Event::is_terminal) {
            debug!(instance = %instance, "completion for terminal instance; dropping");
            let _ = self.history_store.ack(QueueKind::Orchestrator, &token).await;
            return;
        }
        self.ensure_instance_active(&instance, &orch_name).await;
        let _ = self.history_store.abandon(QueueKind::Orchestrator, &token).await;
        tokio::time::sleep(std::time::Duration::from_millis(Self::POLLER_GATE_DELAY_MS)).await;
    }

    fn start_work_dispatcher(self: Arc<Self>, activities: Arc<ActivityRegistry>) -> JoinHandle<()> {
        let executor = ActivityExecutor::new(activities);
        tokio::spawn(async move {
            // Owned here so aborting the dispatcher also aborts in-flight activities
            let mut inflight: JoinSet<()> = JoinSet::new();
            loop {
                while inflight.try_join_next().is_some() {}
                if let Some((item, token)) = self.history_store.dequeue_peek_lock(QueueKind::Worker).await {
                    match item {
                        WorkItem::ActivityExecute {
                            instance,
                            id,
                            attempt,
                            name,
                            input,
                            timeout_ms,
                        } => {
                            let rt = self.clone();
                            let executor = executor.clone();
                            inflight.spawn(async move {
                                rt.run_activity(executor, token, instance, id, attempt, name, input, timeout_ms)
                                    .await;
                            });
                        }
                        other => {
                            error!(?other, "unexpected WorkItem in Worker dispatcher; dropping");
                            let _ = self.history_store.ack(QueueKind::Worker, &token).await;
                        }
                    }
                } else {
                    tokio::time::sleep(std::time::Duration::from_millis(Self::POLLER_IDLE_SLEEP_MS)).await;
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_activity(
        self: Arc<Self>,
        executor: ActivityExecutor,
        token: String,
        instance: String,
        id: u64,
        attempt: u32,
        name: String,
        input: String,
        timeout_ms: Option<u64>,
    ) {
        let key = (instance.clone(), id);
        if let Ok(mut running) = self.running_activities.lock() {
            running.insert(key.clone());
        }
        debug!(instance = %instance, id, attempt, name = %name, "executing activity");
        let outcome = executor.execute(id, &name, input, timeout_ms).await;
        if let Ok(mut running) = self.running_activities.lock() {
            running.remove(&key);
        }
        let completion = match outcome {
            Ok(result) => WorkItem::ActivityCompleted {
                instance: instance.clone(),
                id,
                attempt,
                result,
            },
            Err(reason) => {
                debug!(instance = %instance, id, name = %name, reason = %reason, "activity failed");
                WorkItem::ActivityFailed {
                    instance: instance.clone(),
                    id,
                    attempt,
                    reason,
                }
            }
        };
        match self.history_store.enqueue_work(QueueKind::Orchestrator, completion).await {
            Ok(()) => {
                let _ = self.history_store.ack(QueueKind::Worker, &token).await;
            }
            Err(e) => {
                warn!(instance = %instance, id, error = %e, "failed to enqueue completion; abandoning for retry");
                let _ = self.history_store.abandon(QueueKind::Worker, &token).await;
            }
        }
    }

    /// Abort background tasks, in-flight activities, and live instance tasks.
    /// Durable state is left as-is so another runtime can resume it.
    pub async fn shutdown(self: Arc<Self>) {
        for j in self.joins.lock().await.drain(..) {
            j.abort();
        }
        for j in self.instance_joins.lock().await.drain(..) {
            j.abort();
        }
    }

    async fn notify_waiters(&self, instance: &str, history: &[Event], out: &Result<String, String>) {
        if let Some(waiters) = self.result_waiters.lock().await.remove(instance) {
            for w in waiters {
                let _ = w.send((history.to_vec(), out.clone()));
            }
        }
    }

    /// Append `OrchestrationFailed` and wake waiters.
    async fn fail_instance(&self, instance: &str, mut history: Vec<Event>, err: String) -> (Vec<Event>, Result<String, String>) {
        error!(instance, error = %err, "orchestration failed");
        let term = Event::OrchestrationFailed { error: err.clone() };
        if let Err(e) = self.history_store.append(instance, vec![term.clone()]).await {
            error!(instance, error = %e, "failed to append OrchestrationFailed");
        }
        history.push(term);
        let out = Err(err);
        self.notify_waiters(instance, &history, &out).await;
        (history, out)
    }

    /// Persist `history[from..]`. On failure waiters are woken with the error and
    /// the instance is left non-terminal so it can be resumed later.
    async fn persist_from(
        &self,
        instance: &str,
        history: &[Event],
        from: usize,
        turn_index: u64,
    ) -> Result<bool, String> {
        if history.len() <= from {
            return Ok(false);
        }
        if let Err(e) = self.history_store.append(instance, history[from..].to_vec()).await {
            error!(instance, turn_index, error = %e, "failed to append history");
            let err = format!("history append failed: {e}");
            self.notify_waiters(instance, history, &Err(err.clone())).await;
            return Err(err);
        }
        Ok(true)
    }

    /// Drive one instance: replay, persist new schedules, dispatch work, then
    /// wait for completions and repeat until the orchestration returns.
    pub async fn run_instance_to_completion(
        self: Arc<Self>,
        instance: &str,
        orchestration_name: &str,
    ) -> (Vec<Event>, Result<String, String>) {
        let history: Vec<Event> = self.history_store.read(instance).await;

        for e in history.iter().rev() {
            match e {
                Event::OrchestrationCompleted { output } => return (history.clone(), Ok(output.clone())),
                Event::OrchestrationFailed { error } => return (history.clone(), Err(error.clone())),
                _ => {}
            }
        }
        let Some(input) = history.iter().find_map(|e| match e {
            Event::OrchestrationStarted { input, .. } => Some(input.clone()),
            _ => None,
        }) else {
            return self
                .fail_instance(instance, history, "missing OrchestrationStarted".to_string())
                .await;
        };
        let Some(handler) = self.orchestration_registry.get(orchestration_name) else {
            return self
                .fail_instance(instance, history, format!("unregistered:{orchestration_name}"))
                .await;
        };

        let mut comp_rx = self.router.register(instance).await;

        // A resumed instance already logged everything its recorded history leads to
        let resumed = history.iter().any(|e| matches!(e, Event::ActivityScheduled { .. }));
        let mut logs_emitted: Option<usize> = if resumed { None } else { Some(0) };

        let engine = replay::DefaultReplayEngine::new();
        let mut history = history;
        let mut turn_index: u64 = 0;
        loop {
            let baseline_len = history.len();
            use replay::ReplayEngine as _;
            let outcome = engine.replay(history, turn_index, handler.clone(), input.clone());
            history = outcome.history;

            if let Some(err) = outcome.nondeterminism {
                self.router.unregister(instance).await;
                self.release_inbox(instance, &mut comp_rx, true).await;
                // Drop schedules the diverging code recorded this turn
                history.truncate(baseline_len);
                return self.fail_instance(instance, history, err).await;
            }

            let total_logs = outcome.logs.len();
            let skip = logs_emitted.unwrap_or(total_logs);
            crate::logging::flush(instance, turn_index, outcome.logs.into_iter().skip(skip).collect());
            logs_emitted = Some(total_logs.max(skip));

            if let Some(out) = outcome.output {
                if let Err(e) = self.persist_from(instance, &history, baseline_len, turn_index).await {
                    self.router.unregister(instance).await;
                    self.release_inbox(instance, &mut comp_rx, false).await;
                    return (history, Err(e));
                }
                let term = match &out {
                    Ok(s) => Event::OrchestrationCompleted { output: s.clone() },
                    Err(e) => Event::OrchestrationFailed { error: e.clone() },
                };
                if let Err(e) = self.history_store.append(instance, vec![term.clone()]).await {
                    error!(instance, turn_index, error = %e, "failed to append terminal event");
                    let err = Err(format!("history append failed: {e}"));
                    self.notify_waiters(instance, &history, &err).await;
                    self.router.unregister(instance).await;
                    self.release_inbox(instance, &mut comp_rx, false).await;
                    return (history, err);
                }
                history.push(term);
                match &out {
                    Ok(_) => info!(instance, turn_index, "orchestration completed"),
                    Err(e) => warn!(instance, turn_index, error = %e, "orchestration failed"),
                }
                self.router.unregister(instance).await;
                self.release_inbox(instance, &mut comp_rx, true).await;
                self.notify_waiters(instance, &history, &out).await;
                return (history, out);
            }

            // Schedules must be durable before any work for them is enqueued
            let mut appended_any = match self.persist_from(instance, &history, baseline_len, turn_index).await {
                Ok(appended) => appended,
                Err(e) => {
                    self.router.unregister(instance).await;
                    self.release_inbox(instance, &mut comp_rx, false).await;
                    return (history, Err(e));
                }
            };
            self.apply_decisions(instance, outcome.decisions).await;

            // Receive at least one completion, or dehydrate on idle timeout
            let persisted_len = history.len();
            let first = match tokio::time::timeout(
                std::time::Duration::from_millis(Self::ORCH_IDLE_DEHYDRATE_MS),
                comp_rx.recv(),
            )
            .await
            {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    self.router.unregister(instance).await;
                    return (history, Ok(String::new()));
                }
                Err(_timeout) => {
                    // Dehydrate only if no outstanding result waiters
                    if self.result_waiters.lock().await.contains_key(instance) {
                        continue;
                    }
                    debug!(instance, "dehydrating idle instance");
                    self.router.unregister(instance).await;
                    self.release_inbox(instance, &mut comp_rx, false).await;
                    return (history, Ok(String::new()));
                }
            };

            let mut ack_tokens: Vec<String> = Vec::new();
            let (token, _changed) = completions::append_completion(&mut history, first);
            ack_tokens.extend(token);
            for _ in 0..Self::COMPLETION_BATCH_LIMIT {
                match comp_rx.try_recv() {
                    Ok(msg) => {
                        let (token, _changed) = completions::append_completion(&mut history, msg);
                        ack_tokens.extend(token);
                    }
                    Err(_) => break,
                }
            }

            match self.persist_from(instance, &history, persisted_len, turn_index).await {
                Ok(appended) => appended_any |= appended,
                Err(e) => {
                    for t in ack_tokens.drain(..) {
                        let _ = self.history_store.abandon(QueueKind::Orchestrator, &t).await;
                    }
                    self.router.unregister(instance).await;
                    self.release_inbox(instance, &mut comp_rx, false).await;
                    return (history, Err(e));
                }
            }
            // Completions are durable (or were no-ops); release their queue items
            for t in ack_tokens.drain(..) {
                let _ = self.history_store.ack(QueueKind::Orchestrator, &t).await;
            }

            if appended_any {
                turn_index = turn_index.saturating_add(1);
            }
        }
    }

    /// Settle messages still sitting in a closed inbox: ack them if the instance
    /// is terminal, otherwise abandon them so they are redelivered.
    async fn release_inbox(&self, instance: &str, rx: &mut mpsc::UnboundedReceiver<OrchestratorMsg>, terminal: bool) {
        rx.close();
        while let Ok(msg) = rx.try_recv() {
            let Some(token) = msg.ack_token() else { continue };
            let res = if terminal {
                self.history_store.ack(QueueKind::Orchestrator, token).await
            } else {
                self.history_store.abandon(QueueKind::Orchestrator, token).await
            };
            if let Err(e) = res {
                warn!(instance, error = %e, "failed to settle inbox message");
            }
        }
    }

    /// Materialize decisions into worker-queue items.
    async fn apply_decisions(&self, instance: &str, decisions: Vec<replay::Decision>) {
        for d in decisions {
            match d {
                crate::Action::CallActivity {
                    id,
                    name,
                    input,
                    attempt,
                    timeout_ms,
                } => {
                    debug!(instance, id, name = %name, attempt, "dispatching activity");
                    let wi = WorkItem::ActivityExecute {
                        instance: instance.to_string(),
                        id,
                        attempt,
                        name: name.clone(),
                        input,
                        timeout_ms,
                    };
                    // Not fatal: rehydration re-enqueues pending schedules
                    if let Err(e) = self.history_store.enqueue_work(QueueKind::Worker, wi).await {
                        warn!(instance, id, name = %name, error = %e, "failed to enqueue activity");
                    }
                }
            }
        }
    }

    /// Wait until the orchestration reaches a terminal state (Completed/Failed) or the timeout elapses.
    pub async fn wait_for_orchestration(
        &self,
        instance: &str,
        timeout: std::time::Duration,
    ) -> Result<OrchestrationStatus, WaitError> {
        let deadline = std::time::Instant::now() + timeout;
        // poll with backoff
        let mut delay_ms: u64 = 5;
        loop {
            let status = self.get_orchestration_status(instance).await;
            if status.is_terminal() {
                return Ok(status);
            }
            if std::time::Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms.saturating_mul(2)).min(100);
        }
    }

    /// Typed variant: returns Ok(Ok<T>) on Completed with decoded output, Ok(Err(String)) on Failed.
    pub async fn wait_for_orchestration_typed<Out: DeserializeOwned>(
        &self,
        instance: &str,
        timeout: std::time::Duration,
    ) -> Result<Result<Out, String>, WaitError> {
        match self.wait_for_orchestration(instance, timeout).await? {
            OrchestrationStatus::Completed { output } => match Json::decode::<Out>(&output) {
                Ok(v) => Ok(Ok(v)),
                Err(e) => Err(WaitError::Other(format!("decode failed: {e}"))),
            },
            OrchestrationStatus::Failed { error } => Ok(Err(error)),
            other => Err(WaitError::Other(format!("unexpected status {other:?}"))),
        }
    }
}
