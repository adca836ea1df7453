#![allow(dead_code)]
use loan_broker::Event;
use loan_broker::providers::HistoryStore;
use std::sync::Arc;

/// Poll `store` until `pred` holds for the instance history or `timeout_ms` elapses.
pub async fn wait_for_history<F>(store: Arc<dyn HistoryStore>, instance: &str, mut pred: F, timeout_ms: u64) -> bool
where
    F: FnMut(&Vec<Event>) -> bool,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        let hist = store.read(instance).await;
        if pred(&hist) {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Names of the activities scheduled in `hist`, in scheduling order.
pub fn scheduled_names(hist: &[Event]) -> Vec<String> {
    hist.iter()
        .filter_map(|e| match e {
            Event::ActivityScheduled { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}
