use loan_broker::providers::fs::FsHistoryStore;
use loan_broker::providers::in_memory::InMemoryHistoryStore;
use loan_broker::providers::{HistoryStore, QueueKind, WorkItem};
use loan_broker::{Action, ActivityOptions, Event, Executor, FailureReason, OrchestrationContext, run_turn, run_turn_with};

fn scheduled(id: u64, name: &str, input: &str) -> Event {
    Event::ActivityScheduled {
        id,
        name: name.into(),
        input: input.into(),
        attempt: 1,
        timeout_ms: None,
    }
}

fn completed(id: u64, result: &str) -> Event {
    Event::ActivityCompleted {
        id,
        attempt: 1,
        result: result.into(),
    }
}

// Single-turn emission: one action per scheduled future, schedule recorded in history.
#[test]
fn action_emission_single_turn() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let _ = ctx.schedule_activity("A", "1").into_activity().await;
        unreachable!()
    };

    let (hist_after, actions, _logs, out) = run_turn(Vec::new(), orchestrator);
    assert!(out.is_none(), "must not complete in first turn");
    assert_eq!(
        actions,
        vec![Action::CallActivity {
            id: 1,
            name: "A".into(),
            input: "1".into(),
            attempt: 1,
            timeout_ms: None,
        }]
    );
    assert_eq!(hist_after, vec![scheduled(1, "A", "1")]);
}

// Correlation ids follow scheduling order, independent of completion order.
#[test]
fn out_of_order_completions_resolve_by_id() {
    let history = vec![
        scheduled(1, "A", "a"),
        scheduled(2, "B", "b"),
        completed(2, "second"),
        completed(1, "first"),
    ];
    let orchestrator = |ctx: OrchestrationContext| async move {
        let results = ctx
            .join(vec![ctx.schedule_activity("A", "a"), ctx.schedule_activity("B", "b")])
            .await;
        results
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .join(",")
    };
    let (_hist, actions, _logs, out) = run_turn(history, orchestrator);
    assert!(actions.is_empty(), "replay must not re-emit recorded schedules");
    assert_eq!(out.as_deref(), Some("first,second"));
}

#[test]
fn join_schedules_all_children_in_one_turn_and_waits_for_all() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let futs = (0..3).map(|i| ctx.schedule_activity("Q", i.to_string())).collect();
        ctx.join(futs).await
    };
    let (hist, actions, _logs, out) = run_turn(Vec::new(), orchestrator);
    assert!(out.is_none());
    assert_eq!(actions.len(), 3);

    // One failure, one pending: still not resolved
    let mut hist = hist;
    hist.push(Event::ActivityFailed {
        id: 1,
        attempt: 1,
        reason: FailureReason::Transport("refused".into()),
    });
    hist.push(completed(3, "c"));
    let (hist, actions, _logs, out) = run_turn(hist, orchestrator);
    assert!(out.is_none(), "join must not short-circuit on failure");
    assert!(actions.is_empty());

    let mut hist = hist;
    hist.push(completed(2, "b"));
    let (_hist, _actions, _logs, out) = run_turn(hist, orchestrator);
    assert_eq!(
        out.unwrap(),
        vec![
            Err(FailureReason::Transport("refused".into())),
            Ok("b".to_string()),
            Ok("c".to_string()),
        ]
    );
}

#[test]
fn empty_join_resolves_immediately() {
    let orchestrator = |ctx: OrchestrationContext| async move { ctx.join(Vec::new()).await.len() };
    let (hist, actions, _logs, out) = run_turn(Vec::new(), orchestrator);
    assert_eq!(out, Some(0));
    assert!(actions.is_empty());
    assert!(hist.is_empty());
}

#[test]
fn replay_reports_nondeterminism() {
    let history = vec![scheduled(1, "A", "1")];
    let orchestrator = |ctx: OrchestrationContext| async move { ctx.schedule_activity("B", "1").into_activity().await };
    let (_hist, actions, _logs, out, nondeterminism) = run_turn_with(history, 3, orchestrator);
    assert!(out.is_none());
    assert!(actions.is_empty());
    let msg = nondeterminism.expect("mismatch must be reported");
    assert!(msg.contains("id=1"), "{msg}");
    assert!(msg.contains("(turn 3)"), "{msg}");
}

#[test]
fn options_are_recorded_on_schedule() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.schedule_activity_with("A", "x", ActivityOptions::default().with_attempt(2).with_timeout_ms(75))
            .into_activity()
            .await
    };
    let (hist, _actions, _logs, _out) = run_turn(Vec::new(), orchestrator);
    assert!(matches!(
        hist[0],
        Event::ActivityScheduled {
            attempt: 2,
            timeout_ms: Some(75),
            ..
        }
    ));
}

#[test]
fn logs_are_buffered_every_turn() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.trace_info("before");
        let r = ctx.schedule_activity("A", "1").into_activity().await;
        ctx.trace_info("after");
        r
    };
    let (hist, _actions, logs, _out) = run_turn(Vec::new(), orchestrator);
    assert_eq!(logs.len(), 1);
    let mut hist = hist;
    hist.push(completed(1, "ok"));
    let (_hist, _actions, logs, out) = run_turn(hist, orchestrator);
    assert_eq!(logs.len(), 2);
    assert_eq!(out, Some(Ok("ok".to_string())));
}

#[test]
fn drive_to_completion_runs_sequential_activities() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("Inc", "1").into_activity().await.unwrap();
        ctx.schedule_activity("Inc", a).into_activity().await.unwrap()
    };
    let (hist, out) = Executor::drive_to_completion(Vec::new(), orchestrator, |actions, hist| {
        for Action::CallActivity { id, input, attempt, .. } in actions {
            let n: u32 = input.parse().unwrap();
            hist.push(Event::ActivityCompleted {
                id,
                attempt,
                result: (n + 1).to_string(),
            });
        }
    });
    assert_eq!(out, "3");
    assert_eq!(hist.len(), 4);
}

#[test]
#[should_panic(expected = "nondeterministic: activity id=1")]
fn drive_to_completion_stops_on_replay_mismatch() {
    let history = vec![scheduled(1, "A", "1")];
    let orchestrator = |ctx: OrchestrationContext| async move { ctx.schedule_activity("B", "1").into_activity().await };
    let _ = Executor::drive_to_completion(history, orchestrator, |_actions, _hist| {});
}

async fn store_contract(store: &dyn HistoryStore) {
    store.create_instance("i1").await.unwrap();
    assert!(store.create_instance("i1").await.unwrap_err().contains("already exists"));
    store
        .append(
            "i1",
            vec![
                Event::OrchestrationStarted {
                    name: "O".into(),
                    input: "{}".into(),
                },
                scheduled(1, "A", "a"),
                completed(1, "x"),
            ],
        )
        .await
        .unwrap();
    // Redelivered completion is dropped on append
    store.append("i1", vec![completed(1, "x")]).await.unwrap();
    assert_eq!(store.read("i1").await.len(), 3);
    assert_eq!(store.list_instances().await, vec!["i1".to_string()]);

    let item = |id| WorkItem::ActivityExecute {
        instance: "i1".into(),
        id,
        attempt: 1,
        name: "A".into(),
        input: "a".into(),
        timeout_ms: None,
    };
    store.enqueue_work(QueueKind::Worker, item(1)).await.unwrap();
    store.enqueue_work(QueueKind::Worker, item(1)).await.unwrap();
    store.enqueue_work(QueueKind::Worker, item(2)).await.unwrap();
    assert_eq!(store.queued_items(QueueKind::Worker).await, vec![item(1), item(2)]);
    let (first, token) = store.dequeue_peek_lock(QueueKind::Worker).await.unwrap();
    assert_eq!(first, item(1));
    // Locked items are still owed to the queue
    assert_eq!(store.queued_items(QueueKind::Worker).await, vec![item(2), item(1)]);
    store.abandon(QueueKind::Worker, &token).await.unwrap();
    let (again, token) = store.dequeue_peek_lock(QueueKind::Worker).await.unwrap();
    assert_eq!(again, item(1), "abandoned item returns to the front");
    store.ack(QueueKind::Worker, &token).await.unwrap();
    let (second, token) = store.dequeue_peek_lock(QueueKind::Worker).await.unwrap();
    assert_eq!(second, item(2));
    store.ack(QueueKind::Worker, &token).await.unwrap();
    assert!(store.dequeue_peek_lock(QueueKind::Worker).await.is_none());
    assert!(store.dequeue_peek_lock(QueueKind::Orchestrator).await.is_none());

    assert!(store.dump_all_pretty().await.contains("instance=i1"));
    store.remove_instance("i1").await.unwrap();
    assert!(store.remove_instance("i1").await.is_err());
    assert!(store.read("i1").await.is_empty());

    store.create_instance("i2").await.unwrap();
    store.reset().await;
    assert!(store.list_instances().await.is_empty());
}

#[tokio::test]
async fn in_memory_store_contract() {
    let store = InMemoryHistoryStore::default();
    store_contract(&store).await;
}

#[tokio::test]
async fn fs_store_contract() {
    let td = tempfile::tempdir().unwrap();
    let store = FsHistoryStore::new(td.path(), true);
    store_contract(&store).await;
}

#[tokio::test]
async fn fs_store_recovers_locked_items_on_reopen() {
    let td = tempfile::tempdir().unwrap();
    let item = WorkItem::ActivityCompleted {
        instance: "i1".into(),
        id: 1,
        attempt: 1,
        result: "x".into(),
    };
    {
        let store = FsHistoryStore::new(td.path(), true);
        store.enqueue_work(QueueKind::Orchestrator, item.clone()).await.unwrap();
        let (taken, _token) = store.dequeue_peek_lock(QueueKind::Orchestrator).await.unwrap();
        assert_eq!(taken, item);
        assert!(store.dequeue_peek_lock(QueueKind::Orchestrator).await.is_none());
    }
    let reopened = FsHistoryStore::new(td.path(), false);
    let (recovered, token) = reopened.dequeue_peek_lock(QueueKind::Orchestrator).await.unwrap();
    assert_eq!(recovered, item);
    reopened.ack(QueueKind::Orchestrator, &token).await.unwrap();
}

#[tokio::test]
async fn fs_store_enforces_history_cap() {
    let td = tempfile::tempdir().unwrap();
    let store = FsHistoryStore::new_with_cap(td.path(), true, 2);
    store.create_instance("i1").await.unwrap();
    store
        .append("i1", vec![scheduled(1, "A", "a"), completed(1, "x")])
        .await
        .unwrap();
    let err = store.append("i1", vec![scheduled(2, "B", "b")]).await.unwrap_err();
    assert!(err.contains("history cap exceeded"), "{err}");
    assert_eq!(store.read("i1").await.len(), 2);
}
