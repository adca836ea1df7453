use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Event, FailureReason};

pub mod fs;
pub mod in_memory;

/// Which queue a work item travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Completions flowing back to instance tasks.
    Orchestrator,
    /// Activity executions waiting for the worker dispatcher.
    Worker,
}

/// Units of work exchanged between the orchestrator and the activity worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkItem {
    ActivityExecute {
        instance: String,
        id: u64,
        attempt: u32,
        name: String,
        input: String,
        timeout_ms: Option<u64>,
    },
    ActivityCompleted {
        instance: String,
        id: u64,
        attempt: u32,
        result: String,
    },
    ActivityFailed {
        instance: String,
        id: u64,
        attempt: u32,
        reason: FailureReason,
    },
}

/// Durable history plus the two peek-lock queues the runtime is built on.
///
/// History is per instance and append-only. Completion and terminal events are
/// deduplicated on append, so redelivered completions are harmless.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn read(&self, instance: &str) -> Vec<Event>;
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String>;
    async fn reset(&self);
    async fn list_instances(&self) -> Vec<String>;
    async fn dump_all_pretty(&self) -> String;

    /// Create an empty history. Fails if the instance already exists.
    async fn create_instance(&self, instance: &str) -> Result<(), String>;
    async fn remove_instance(&self, instance: &str) -> Result<(), String>;

    /// Enqueue a work item. Enqueuing an item identical to one already queued is a no-op.
    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String>;
    /// Take the head item and hide it behind a lock token until `ack` or `abandon`.
    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)>;
    async fn ack(&self, kind: QueueKind, token: &str) -> Result<(), String>;
    /// Return a locked item to the front of its queue.
    async fn abandon(&self, kind: QueueKind, token: &str) -> Result<(), String>;
    /// Every item still owed to `kind`: ready items in queue order, then locked ones.
    async fn queued_items(&self, kind: QueueKind) -> Vec<WorkItem>;
}

// Key used to spot completion-like events that were already recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DedupeKey {
    ActivityTerminal(u64),
    InstanceTerminal,
}

fn dedupe_key(ev: &Event) -> Option<DedupeKey> {
    match ev {
        Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => Some(DedupeKey::ActivityTerminal(*id)),
        Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. } => Some(DedupeKey::InstanceTerminal),
        _ => None,
    }
}

/// Filter `new_events` down to those that are not duplicates of a terminal
/// event already in `existing` (or earlier in the same batch).
pub(crate) fn filter_duplicates(existing: &[Event], new_events: Vec<Event>) -> Vec<Event> {
    let mut seen: HashSet<DedupeKey> = existing.iter().filter_map(dedupe_key).collect();
    new_events
        .into_iter()
        .filter(|ev| match dedupe_key(ev) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}
