use loan_broker::providers::HistoryStore;
use loan_broker::providers::fs::FsHistoryStore;
use loan_broker::runtime::registry::ActivityRegistry;
use loan_broker::runtime::{self};
use loan_broker::{Event, OrchestrationContext, OrchestrationRegistry, OrchestrationStatus, run_turn};
use std::sync::Arc;
use std::time::Duration;
mod common;

async fn fan_out_then_sum(ctx: OrchestrationContext, input: String) -> Result<String, String> {
    let n: u32 = input.parse().map_err(|e| format!("bad input: {e}"))?;
    ctx.trace_info(format!("fanning out to {n} branches"));
    let futs = (0..n).map(|i| ctx.schedule_activity("Square", i.to_string())).collect();
    let mut total = 0u32;
    for r in ctx.join(futs).await {
        total += r.map_err(|e| e.to_string())?.parse::<u32>().map_err(|e| e.to_string())?;
    }
    let echoed = ctx.schedule_activity("Echo", total.to_string()).into_activity().await;
    echoed.map_err(|e| e.to_string())
}

fn activities() -> ActivityRegistry {
    ActivityRegistry::builder()
        .register("Square", |input: String| async move {
            let n: u32 = input.parse().map_err(|_| "not a number".to_string())?;
            // Later branches finish first
            tokio::time::sleep(Duration::from_millis(u64::from(40 - n * 10))).await;
            Ok((n * n).to_string())
        })
        .register("Echo", |input: String| async move { Ok(input) })
        .build()
}

async fn orchestration_completes_and_replays_deterministically_with(store: Arc<dyn HistoryStore>) {
    let orchestration_registry = OrchestrationRegistry::builder()
        .register("FanOutSum", fan_out_then_sum)
        .build();
    let rt = runtime::Runtime::start_with_store(store.clone(), Arc::new(activities()), orchestration_registry).await;

    let handle = rt
        .clone()
        .start_orchestration("inst-det-1", "FanOutSum", "4")
        .await
        .unwrap();
    let (final_history, output) = handle.await.unwrap();
    assert_eq!(output.unwrap(), "14");
    // Started + 5 schedule/complete pairs + terminal
    assert_eq!(final_history.len(), 12);
    assert_eq!(store.read("inst-det-1").await, final_history);

    // Schedules were recorded in code order, with ids in the same order
    let ids: Vec<(u64, String)> = final_history
        .iter()
        .filter_map(|e| match e {
            Event::ActivityScheduled { id, input, .. } => Some((*id, input.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        ids,
        vec![
            (1, "0".to_string()),
            (2, "1".to_string()),
            (3, "2".to_string()),
            (4, "3".to_string()),
            (5, "14".to_string())
        ]
    );

    // Replaying the recorded history produces the same output and no new work
    let replay_history: Vec<Event> = final_history.into_iter().filter(|e| !e.is_terminal()).collect();
    let (_hist, actions, _logs, out) = run_turn(replay_history, |ctx| fan_out_then_sum(ctx, "4".to_string()));
    assert!(actions.is_empty());
    assert_eq!(out, Some(Ok("14".to_string())));

    rt.shutdown().await;
}

#[tokio::test]
async fn orchestration_completes_and_replays_deterministically_fs() {
    let td = tempfile::tempdir().unwrap();
    let store = Arc::new(FsHistoryStore::new(td.path(), true)) as Arc<dyn HistoryStore>;
    orchestration_completes_and_replays_deterministically_with(store).await;
}

#[tokio::test]
async fn orchestration_completes_and_replays_deterministically_in_memory() {
    let store = Arc::new(loan_broker::providers::in_memory::InMemoryHistoryStore::default()) as Arc<dyn HistoryStore>;
    orchestration_completes_and_replays_deterministically_with(store).await;
}

#[tokio::test]
async fn code_change_is_detected_as_nondeterminism_on_resume() {
    let td = tempfile::tempdir().unwrap();
    let store = Arc::new(FsHistoryStore::new(td.path(), true)) as Arc<dyn HistoryStore>;
    let inst = "inst-nondet";
    store.create_instance(inst).await.unwrap();
    store
        .append(
            inst,
            vec![
                Event::OrchestrationStarted {
                    name: "Changed".into(),
                    input: String::new(),
                },
                Event::ActivityScheduled {
                    id: 1,
                    name: "Old".into(),
                    input: String::new(),
                    attempt: 1,
                    timeout_ms: None,
                },
            ],
        )
        .await
        .unwrap();

    let orchestration_registry = OrchestrationRegistry::builder()
        .register("Changed", |ctx: OrchestrationContext, _input: String| async move {
            ctx.schedule_activity("New", "").into_activity().await.map_err(|e| e.to_string())
        })
        .build();
    let activity_registry = ActivityRegistry::builder()
        .register("New", |input: String| async move { Ok(input) })
        .build();
    let rt = runtime::Runtime::start_with_store(store.clone(), Arc::new(activity_registry), orchestration_registry).await;

    rt.resume(inst).await.unwrap();
    match rt.wait_for_orchestration(inst, Duration::from_secs(5)).await.unwrap() {
        OrchestrationStatus::Failed { error } => assert!(error.contains("nondeterministic"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(common::scheduled_names(&store.read(inst).await), vec!["Old".to_string()]);
    rt.shutdown().await;
}

#[tokio::test]
async fn unregistered_orchestration_fails_the_instance() {
    let rt = runtime::Runtime::start(Arc::new(ActivityRegistry::builder().build()), OrchestrationRegistry::builder().build()).await;
    let handle = rt.clone().start_orchestration("inst-unreg", "Nope", "").await.unwrap();
    let (_hist, out) = handle.await.unwrap();
    assert_eq!(out.unwrap_err(), "unregistered:Nope");
    assert!(matches!(
        rt.get_orchestration_status("inst-unreg").await,
        OrchestrationStatus::Failed { .. }
    ));
    rt.shutdown().await;
}
