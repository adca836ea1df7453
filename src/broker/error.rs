use crate::FailureReason;
use crate::broker::config::ConfigError;

/// Faults that abort a brokering instance. Anything here runs the
/// compensating handler and leaves the instance FAILED.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationFault {
    #[error("credit score unavailable: {0}")]
    ScoreUnavailable(FailureReason),
    #[error("aggregation invariant broken: expected {expected} outcomes, got {actual}")]
    Aggregation { expected: usize, actual: usize },
    #[error("publishing the aggregate failed: {0}")]
    Publish(FailureReason),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl OrchestrationFault {
    /// Step of the workflow the fault surfaced in.
    pub fn stage(&self) -> &'static str {
        match self {
            OrchestrationFault::ScoreUnavailable(_) => "score",
            OrchestrationFault::Aggregation { .. } => "aggregation",
            OrchestrationFault::Publish(_) => "publish",
            OrchestrationFault::Codec(_) => "codec",
        }
    }
}

/// Failure talking to a participant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("participant answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed participant payload: {0}")]
    Decode(String),
}

impl From<GatewayError> for FailureReason {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transport(msg) => FailureReason::Transport(msg),
            GatewayError::Status { .. } => FailureReason::Transport(e.to_string()),
            GatewayError::Decode(msg) => FailureReason::Decode(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("aggregate sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of `LoanBroker`.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid loan request: {0}")]
    Validation(String),
    #[error("instance already exists: {0}")]
    InstanceExists(String),
    #[error("failed to start instance: {0}")]
    Start(String),
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("instance failed: {0}")]
    Failed(String),
    #[error("timed out waiting for instance {0}")]
    Timeout(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
