use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::Event;
use crate::providers::{HistoryStore, QueueKind, WorkItem};
use crate::runtime::router::OrchestratorMsg;

/// An activity recorded as scheduled with no terminal event yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingActivity {
    pub id: u64,
    pub name: String,
    pub input: String,
    pub attempt: u32,
    pub timeout_ms: Option<u64>,
}

/// Scheduled activities in `history` that have not completed or failed.
pub fn pending_activities(history: &[Event]) -> Vec<PendingActivity> {
    let terminal: HashSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    history
        .iter()
        .filter_map(|e| match e {
            Event::ActivityScheduled {
                id,
                name,
                input,
                attempt,
                timeout_ms,
            } if !terminal.contains(id) => Some(PendingActivity {
                id: *id,
                name: name.clone(),
                input: input.clone(),
                attempt: *attempt,
                timeout_ms: *timeout_ms,
            }),
            _ => None,
        })
        .collect()
}

/// Apply a completion message to the in-memory history.
///
/// Returns the ack token and whether history changed. Completions for unknown
/// ids, for a different attempt, or for an already-terminal activity are no-ops.
pub fn append_completion(history: &mut Vec<Event>, msg: OrchestratorMsg) -> (Option<String>, bool) {
    let (id, attempt, ev, ack_token) = match msg {
        OrchestratorMsg::ActivityCompleted {
            id,
            attempt,
            result,
            ack_token,
            ..
        } => (id, attempt, Event::ActivityCompleted { id, attempt, result }, ack_token),
        OrchestratorMsg::ActivityFailed {
            id,
            attempt,
            reason,
            ack_token,
            ..
        } => (id, attempt, Event::ActivityFailed { id, attempt, reason }, ack_token),
    };
    let scheduled_attempt = history.iter().find_map(|e| match e {
        Event::ActivityScheduled { id: sid, attempt, .. } if *sid == id => Some(*attempt),
        _ => None,
    });
    match scheduled_attempt {
        None => {
            warn!(id, "completion for unscheduled activity id; ignoring");
            return (ack_token, false);
        }
        Some(a) if a != attempt => {
            warn!(id, attempt, scheduled_attempt = a, "completion for a different attempt; ignoring");
            return (ack_token, false);
        }
        Some(_) => {}
    }
    let already_terminal = history
        .iter()
        .any(|e| matches!(e, Event::ActivityCompleted { id: cid, .. } | Event::ActivityFailed { id: cid, .. } if *cid == id));
    if already_terminal {
        debug!(id, "duplicate completion; ignoring");
        return (ack_token, false);
    }
    history.push(ev);
    (ack_token, true)
}

/// `(id, attempt)` of completions for `instance` still waiting to be applied.
async fn queued_completions(instance: &str, store: &Arc<dyn HistoryStore>) -> HashSet<(u64, u32)> {
    store
        .queued_items(QueueKind::Orchestrator)
        .await
        .into_iter()
        .filter_map(|item| match item {
            WorkItem::ActivityCompleted {
                instance: i, id, attempt, ..
            }
            | WorkItem::ActivityFailed {
                instance: i, id, attempt, ..
            } if i == instance => Some((id, attempt)),
            _ => None,
        })
        .collect()
}

/// Re-enqueue executor work for every scheduled-but-incomplete activity,
/// except those `is_running` reports as still executing and those whose
/// completion is already queued for the instance.
/// Enqueue is idempotent for items already waiting in the worker queue.
pub async fn rehydrate_pending(
    instance: &str,
    history: &[Event],
    store: &Arc<dyn HistoryStore>,
    is_running: impl Fn(u64) -> bool,
) {
    let answered = queued_completions(instance, store).await;
    for p in pending_activities(history)
        .into_iter()
        .filter(|p| !is_running(p.id) && !answered.contains(&(p.id, p.attempt)))
    {
        let wi = WorkItem::ActivityExecute {
            instance: instance.to_string(),
            id: p.id,
            attempt: p.attempt,
            name: p.name.clone(),
            input: p.input,
            timeout_ms: p.timeout_ms,
        };
        if let Err(e) = store.enqueue_work(QueueKind::Worker, wi).await {
            warn!(instance, id = p.id, name = %p.name, error = %e, "failed to re-enqueue pending activity");
        } else {
            debug!(instance, id = p.id, name = %p.name, "re-enqueued pending activity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureReason;

    fn scheduled(id: u64) -> Event {
        Event::ActivityScheduled {
            id,
            name: "A".into(),
            input: id.to_string(),
            attempt: 1,
            timeout_ms: Some(50),
        }
    }

    fn completed(id: u64, attempt: u32, token: &str) -> OrchestratorMsg {
        OrchestratorMsg::ActivityCompleted {
            instance: "i".into(),
            id,
            attempt,
            result: "ok".into(),
            ack_token: Some(token.into()),
        }
    }

    #[test]
    fn completions_apply_once() {
        let mut h = vec![scheduled(1), scheduled(2)];
        assert_eq!(append_completion(&mut h, completed(2, 1, "t1")), (Some("t1".into()), true));
        assert_eq!(append_completion(&mut h, completed(2, 1, "t2")), (Some("t2".into()), false));
        let failed = OrchestratorMsg::ActivityFailed {
            instance: "i".into(),
            id: 2,
            attempt: 1,
            reason: FailureReason::Timeout { after_ms: 50 },
            ack_token: None,
        };
        assert_eq!(append_completion(&mut h, failed), (None, false));
        assert_eq!(h.len(), 3);
        assert_eq!(pending_activities(&h).iter().map(|p| p.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unknown_ids_and_stale_attempts_are_ignored() {
        let mut h = vec![scheduled(1)];
        assert_eq!(append_completion(&mut h, completed(9, 1, "t")).1, false);
        assert_eq!(append_completion(&mut h, completed(1, 2, "t")).1, false);
        assert_eq!(h.len(), 1);
    }

    #[tokio::test]
    async fn rehydrate_skips_activities_with_a_queued_completion() {
        use crate::providers::in_memory::InMemoryHistoryStore;

        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::default());
        let h = vec![scheduled(1), scheduled(2), scheduled(3)];
        store
            .enqueue_work(
                QueueKind::Orchestrator,
                WorkItem::ActivityCompleted {
                    instance: "i".into(),
                    id: 1,
                    attempt: 1,
                    result: "ok".into(),
                },
            )
            .await
            .unwrap();
        // Same id on another instance does not count
        store
            .enqueue_work(
                QueueKind::Orchestrator,
                WorkItem::ActivityFailed {
                    instance: "other".into(),
                    id: 2,
                    attempt: 1,
                    reason: FailureReason::Transport("refused".into()),
                },
            )
            .await
            .unwrap();

        rehydrate_pending("i", &h, &store, |id| id == 3).await;

        let mut ids = Vec::new();
        while let Some((item, token)) = store.dequeue_peek_lock(QueueKind::Worker).await {
            if let WorkItem::ActivityExecute { id, .. } = item {
                ids.push(id);
            }
            store.ack(QueueKind::Worker, &token).await.unwrap();
        }
        assert_eq!(ids, vec![2]);
    }
}
