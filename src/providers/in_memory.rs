use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use super::{HistoryStore, QueueKind, WorkItem, filter_duplicates};
use crate::Event;

#[derive(Default)]
struct Queue {
    ready: VecDeque<WorkItem>,
    locked: HashMap<String, WorkItem>,
}

/// Process-local store. Default for `Runtime::start` and most tests.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    histories: Mutex<HashMap<String, Vec<Event>>>,
    orch_queue: Mutex<Queue>,
    work_queue: Mutex<Queue>,
    next_token: AtomicU64,
}

impl InMemoryHistoryStore {
    fn queue(&self, kind: QueueKind) -> &Mutex<Queue> {
        match kind {
            QueueKind::Orchestrator => &self.orch_queue,
            QueueKind::Worker => &self.work_queue,
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read(&self, instance: &str) -> Vec<Event> {
        self.histories.lock().await.get(instance).cloned().unwrap_or_default()
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let mut histories = self.histories.lock().await;
        let history = histories
            .get_mut(instance)
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        let kept = filter_duplicates(history, new_events);
        history.extend(kept);
        Ok(())
    }

    async fn reset(&self) {
        self.histories.lock().await.clear();
        *self.orch_queue.lock().await = Queue::default();
        *self.work_queue.lock().await = Queue::default();
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut out: Vec<String> = self.histories.lock().await.keys().cloned().collect();
        out.sort();
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let histories = self.histories.lock().await;
        let mut names: Vec<&String> = histories.keys().collect();
        names.sort();
        let mut out = String::new();
        for inst in names {
            out.push_str(&format!("instance={inst}\n"));
            for ev in &histories[inst] {
                out.push_str(&format!("  {ev:#?}\n"));
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        let mut histories = self.histories.lock().await;
        if histories.contains_key(instance) {
            return Err(format!("instance already exists: {instance}"));
        }
        histories.insert(instance.to_string(), Vec::new());
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        match self.histories.lock().await.remove(instance) {
            Some(_) => Ok(()),
            None => Err(format!("instance not found: {instance}")),
        }
    }

    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String> {
        let mut q = self.queue(kind).lock().await;
        if !q.ready.contains(&item) {
            q.ready.push_back(item);
        }
        Ok(())
    }

    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)> {
        let mut q = self.queue(kind).lock().await;
        let item = q.ready.pop_front()?;
        let token = format!("mem-{}", self.next_token.fetch_add(1, Ordering::Relaxed));
        q.locked.insert(token.clone(), item.clone());
        Some((item, token))
    }

    async fn ack(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        self.queue(kind).lock().await.locked.remove(token);
        Ok(())
    }

    async fn abandon(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        let mut q = self.queue(kind).lock().await;
        if let Some(item) = q.locked.remove(token) {
            q.ready.push_front(item);
        }
        Ok(())
    }

    async fn queued_items(&self, kind: QueueKind) -> Vec<WorkItem> {
        let q = self.queue(kind).lock().await;
        q.ready.iter().chain(q.locked.values()).cloned().collect()
    }
}
