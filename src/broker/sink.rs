use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::broker::error::SinkError;

/// Storage for finished aggregates, keyed by request id.
///
/// `write` must be idempotent: the publish activity may run more than once
/// for the same instance if the process dies between the write and the
/// durable record of its completion.
#[async_trait]
pub trait AggregateSink: Send + Sync {
    async fn write(&self, request_id: &str, payload: &str) -> Result<(), SinkError>;
    async fn read(&self, request_id: &str) -> Option<String>;
}

/// First write per request id wins; later writes are acknowledged and ignored.
#[derive(Default)]
pub struct InMemoryAggregateSink {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryAggregateSink {
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AggregateSink for InMemoryAggregateSink {
    async fn write(&self, request_id: &str, payload: &str) -> Result<(), SinkError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(request_id) {
            debug!(request_id, "aggregate already stored; ignoring rewrite");
            return Ok(());
        }
        entries.insert(request_id.to_string(), payload.to_string());
        Ok(())
    }

    async fn read(&self, request_id: &str) -> Option<String> {
        self.entries.lock().await.get(request_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_wins() {
        let sink = InMemoryAggregateSink::default();
        sink.write("R1", "one").await.unwrap();
        sink.write("R1", "two").await.unwrap();
        assert_eq!(sink.read("R1").await.as_deref(), Some("one"));
        assert_eq!(sink.len().await, 1);
        assert!(sink.read("R2").await.is_none());
    }
}
