use std::collections::HashMap;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::FailureReason;

/// Completion delivered to a live instance task, carrying the peek-lock token
/// to acknowledge once the completion is durable in history.
#[derive(Debug, Clone)]
pub enum OrchestratorMsg {
    ActivityCompleted {
        instance: String,
        id: u64,
        attempt: u32,
        result: String,
        ack_token: Option<String>,
    },
    ActivityFailed {
        instance: String,
        id: u64,
        attempt: u32,
        reason: FailureReason,
        ack_token: Option<String>,
    },
}

impl OrchestratorMsg {
    pub fn instance(&self) -> &str {
        match self {
            OrchestratorMsg::ActivityCompleted { instance, .. } | OrchestratorMsg::ActivityFailed { instance, .. } => {
                instance
            }
        }
    }

    pub fn ack_token(&self) -> Option<&str> {
        match self {
            OrchestratorMsg::ActivityCompleted { ack_token, .. } | OrchestratorMsg::ActivityFailed { ack_token, .. } => {
                ack_token.as_deref()
            }
        }
    }
}

/// Per-instance inboxes for live instance tasks.
#[derive(Default)]
pub struct InstanceRouter {
    pub(crate) inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<OrchestratorMsg>>>,
}

impl InstanceRouter {
    pub async fn register(&self, instance: &str) -> mpsc::UnboundedReceiver<OrchestratorMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().await.insert(instance.to_string(), tx);
        rx
    }

    pub async fn unregister(&self, instance: &str) {
        self.inboxes.lock().await.remove(instance);
    }

    pub async fn contains(&self, instance: &str) -> bool {
        self.inboxes.lock().await.contains_key(instance)
    }

    /// Deliver to the instance inbox. Hands the message back if no live task owns it.
    pub async fn try_send(&self, msg: OrchestratorMsg) -> Result<(), OrchestratorMsg> {
        let mut inboxes = self.inboxes.lock().await;
        let Some(tx) = inboxes.get(msg.instance()) else {
            return Err(msg);
        };
        match tx.send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(msg)) => {
                warn!(instance = %msg.instance(), "instance inbox closed; dropping route");
                inboxes.remove(msg.instance());
                Err(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(instance: &str) -> OrchestratorMsg {
        OrchestratorMsg::ActivityCompleted {
            instance: instance.to_string(),
            id: 1,
            attempt: 1,
            result: "ok".to_string(),
            ack_token: Some("t1".to_string()),
        }
    }

    #[tokio::test]
    async fn routes_to_live_inbox_and_hands_back_otherwise() {
        let router = InstanceRouter::default();
        assert!(router.try_send(completed("i1")).await.is_err());

        let mut rx = router.register("i1").await;
        assert!(router.contains("i1").await);
        router.try_send(completed("i1")).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.ack_token(), Some("t1"));

        drop(rx);
        let back = router.try_send(completed("i1")).await.unwrap_err();
        assert_eq!(back.instance(), "i1");
        assert!(!router.contains("i1").await, "closed inbox is dropped");

        router.register("i2").await;
        router.unregister("i2").await;
        assert!(!router.contains("i2").await);
    }
}
