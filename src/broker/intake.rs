use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::activities::build_activity_registry;
use crate::broker::config::BrokerConfig;
use crate::broker::error::BrokerError;
use crate::broker::gateway::ParticipantGateway;
use crate::broker::model::{LoanRequest, QuoteAggregate, WorkflowInput, credit_subject_is_valid};
use crate::broker::sink::AggregateSink;
use crate::broker::workflow::{LOAN_BROKER_ORCHESTRATION, build_orchestration_registry};
use crate::providers::HistoryStore;
use crate::providers::in_memory::InMemoryHistoryStore;
use crate::runtime::WaitError;
use crate::{InstanceSnapshot, OrchestrationStatus, Runtime};

/// Entry point for loan requests. Owns the runtime that drives every
/// brokering instance and the sink aggregates are published to.
pub struct LoanBroker {
    runtime: Arc<Runtime>,
    config: Arc<BrokerConfig>,
    sink: Arc<dyn AggregateSink>,
}

impl LoanBroker {
    /// Start on an in-memory history store.
    pub async fn start(
        config: BrokerConfig,
        gateway: Arc<dyn ParticipantGateway>,
        sink: Arc<dyn AggregateSink>,
    ) -> Result<Self, BrokerError> {
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::default());
        Self::start_with_store(store, config, gateway, sink).await
    }

    /// Start on `store` and resume every instance it holds that has not finished.
    pub async fn start_with_store(
        store: Arc<dyn HistoryStore>,
        config: BrokerConfig,
        gateway: Arc<dyn ParticipantGateway>,
        sink: Arc<dyn AggregateSink>,
    ) -> Result<Self, BrokerError> {
        config.validate()?;
        let config = Arc::new(config);
        let activities = Arc::new(build_activity_registry(config.clone(), gateway, sink.clone()));
        let orchestrations = build_orchestration_registry().map_err(BrokerError::Start)?;
        let runtime = Runtime::start_with_store(store, activities, orchestrations).await;
        let resumed = runtime.resume_all().await;
        info!(
            lenders = config.lenders.len(),
            resumed = resumed.len(),
            "loan broker started"
        );
        Ok(Self { runtime, config, sink })
    }

    /// Reject requests that must never reach an instance.
    pub fn validate(request: &LoanRequest) -> Result<(), BrokerError> {
        if request.request_id.trim().is_empty() {
            return Err(BrokerError::Validation("requestId must not be empty".to_string()));
        }
        if !credit_subject_is_valid(&request.credit_subject_id) {
            return Err(BrokerError::Validation(format!(
                "creditSubjectId must look like 123-45-6789, got {:?}",
                request.credit_subject_id
            )));
        }
        if request.amount == 0 {
            return Err(BrokerError::Validation("amount must be greater than 0".to_string()));
        }
        if request.term == 0 {
            return Err(BrokerError::Validation("term must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Start brokering under a fresh instance id and return it immediately.
    pub async fn submit(&self, request: LoanRequest) -> Result<String, BrokerError> {
        let instance_id = Uuid::new_v4().to_string();
        self.submit_with_instance_id(&instance_id, request).await
    }

    pub async fn submit_with_instance_id(&self, instance_id: &str, request: LoanRequest) -> Result<String, BrokerError> {
        Self::validate(&request)?;
        let input = WorkflowInput {
            request_id: request.request_id,
            credit_subject_id: request.credit_subject_id,
            amount: request.amount,
            term: request.term,
            lenders: self.config.routes(),
            score_max_attempts: self.config.score_max_attempts,
            score_timeout_ms: self.config.score_timeout_ms,
        };
        let request_id = input.request_id.clone();
        match self
            .runtime
            .clone()
            .start_orchestration_typed::<WorkflowInput, String>(instance_id, LOAN_BROKER_ORCHESTRATION, input)
            .await
        {
            Ok(_completion) => {
                info!(instance = instance_id, request_id = %request_id, "loan request accepted");
                Ok(instance_id.to_string())
            }
            Err(e) if e.contains("already exists") => Err(BrokerError::InstanceExists(instance_id.to_string())),
            Err(e) => Err(BrokerError::Start(e)),
        }
    }

    pub async fn status(&self, instance_id: &str) -> OrchestrationStatus {
        self.runtime.get_orchestration_status(instance_id).await
    }

    pub async fn instance(&self, instance_id: &str) -> Option<InstanceSnapshot> {
        self.runtime.get_instance(instance_id).await
    }

    /// Wait for the instance to finish and return what it published.
    pub async fn wait_for_aggregate(&self, instance_id: &str, timeout: Duration) -> Result<QuoteAggregate, BrokerError> {
        if self.status(instance_id).await == OrchestrationStatus::NotFound {
            return Err(BrokerError::NotFound(instance_id.to_string()));
        }
        match self
            .runtime
            .wait_for_orchestration_typed::<QuoteAggregate>(instance_id, timeout)
            .await
        {
            Ok(Ok(aggregate)) => Ok(aggregate),
            Ok(Err(error)) => Err(BrokerError::Failed(error)),
            Err(WaitError::Timeout) => Err(BrokerError::Timeout(instance_id.to_string())),
            Err(WaitError::Other(e)) => Err(BrokerError::Failed(e)),
        }
    }

    /// The stored aggregate for `request_id`, exactly as published.
    pub async fn aggregate_json(&self, request_id: &str) -> Option<String> {
        self.sink.read(request_id).await
    }

    pub async fn aggregate(&self, request_id: &str) -> Option<QuoteAggregate> {
        let raw = self.sink.read(request_id).await?;
        match serde_json::from_str(&raw) {
            Ok(aggregate) => Some(aggregate),
            Err(e) => {
                warn!(request_id, error = %e, "stored aggregate is unreadable");
                None
            }
        }
    }

    pub async fn resume(&self, instance_id: &str) -> Result<OrchestrationStatus, BrokerError> {
        self.runtime.resume(instance_id).await.map_err(|e| {
            if e.starts_with("instance not found") {
                BrokerError::NotFound(instance_id.to_string())
            } else {
                BrokerError::Start(e)
            }
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Stop driving instances. Durable state stays in the store for the next start.
    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(subject: &str, amount: u64, term: u32) -> LoanRequest {
        LoanRequest {
            request_id: "R1".into(),
            credit_subject_id: subject.into(),
            amount,
            term,
        }
    }

    #[test]
    fn validation_rules() {
        assert!(LoanBroker::validate(&request("123-45-6789", 1, 1)).is_ok());
        for bad in [
            request("123456789", 1, 1),
            request("123-45-6789", 0, 1),
            request("123-45-6789", 1, 0),
            LoanRequest {
                request_id: " ".into(),
                ..request("123-45-6789", 1, 1)
            },
        ] {
            assert!(matches!(LoanBroker::validate(&bad), Err(BrokerError::Validation(_))));
        }
    }
}
