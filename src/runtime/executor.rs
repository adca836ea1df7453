use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::FailureReason;
use crate::futures::ActivityResult;
use crate::runtime::registry::ActivityRegistry;

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

/// Runs one activity attempt and folds every way it can go wrong into a
/// `FailureReason`. Never retries; the orchestrator decides on new attempts.
#[derive(Clone)]
pub struct ActivityExecutor {
    registry: Arc<ActivityRegistry>,
}

impl ActivityExecutor {
    pub fn new(registry: Arc<ActivityRegistry>) -> Self {
        Self { registry }
    }

    /// Execute `name` for the activity `id`. With a deadline the handler is
    /// aborted once it elapses and the attempt fails with `Timeout`.
    pub async fn execute(&self, id: u64, name: &str, input: String, timeout_ms: Option<u64>) -> ActivityResult {
        let Some(handler) = self.registry.get(name) else {
            warn!(id, name, "unregistered activity");
            return Err(FailureReason::Unregistered { name: name.to_string() });
        };
        let task = tokio::spawn(async move { handler.invoke(input).await });
        // Dropping this (deadline hit, or the caller itself aborted) stops the handler
        let _guard = AbortOnDrop(task.abort_handle());
        let joined = match timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(id, name, timeout_ms = ms, "activity deadline elapsed");
                    return Err(FailureReason::Timeout { after_ms: ms });
                }
            },
            None => task.await,
        };
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let msg = panic_message(e.into_panic());
                warn!(id, name, error = %msg, "activity panicked");
                Err(FailureReason::Panicked(msg))
            }
            Err(e) => Err(FailureReason::Panicked(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ActivityExecutor {
        let reg = ActivityRegistry::builder()
            .register("Echo", |input: String| async move { Ok(input) })
            .register("Reject", |_input: String| async move { Err("no".to_string()) })
            .register("Hang", |_input: String| async move {
                std::future::pending::<()>().await;
                Ok(String::new())
            })
            .register("Boom", |_input: String| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(String::new())
            })
            .build();
        ActivityExecutor::new(Arc::new(reg))
    }

    #[tokio::test]
    async fn maps_outcomes_to_failure_reasons() {
        let ex = executor();
        assert_eq!(ex.execute(1, "Echo", "hi".into(), Some(1_000)).await, Ok("hi".into()));
        assert_eq!(
            ex.execute(2, "Reject", String::new(), None).await,
            Err(FailureReason::Application("no".into()))
        );
        assert_eq!(
            ex.execute(3, "Hang", String::new(), Some(20)).await,
            Err(FailureReason::Timeout { after_ms: 20 })
        );
        assert_eq!(
            ex.execute(4, "Boom", String::new(), None).await,
            Err(FailureReason::Panicked("kaboom".into()))
        );
        assert_eq!(
            ex.execute(5, "Missing", String::new(), None).await,
            Err(FailureReason::Unregistered { name: "Missing".into() })
        );
    }
}
