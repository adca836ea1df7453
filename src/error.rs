use serde::{Deserialize, Serialize};

/// Terminal failure of one activity attempt, as recorded in `Event::ActivityFailed`.
///
/// Every fault the executor can observe is folded into one of these variants so
/// orchestration code handles failures uniformly regardless of where they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailureReason {
    /// The activity itself returned an error.
    #[error("{0}")]
    Application(String),
    /// A collaborator could not be reached or answered with a non-success status.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The activity did not finish within its deadline.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("unregistered activity: {name}")]
    Unregistered { name: String },
    #[error("activity panicked: {0}")]
    Panicked(String),
    /// Input or output could not be (de)serialized.
    #[error("decode failure: {0}")]
    Decode(String),
}

impl FailureReason {
    /// Faults worth scheduling another attempt for.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureReason::Transport(_) | FailureReason::Timeout { .. })
    }
}

impl From<String> for FailureReason {
    fn from(s: String) -> Self {
        FailureReason::Application(s)
    }
}

impl From<&str> for FailureReason {
    fn from(s: &str) -> Self {
        FailureReason::Application(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FailureReason::Timeout { after_ms: 5 }.is_transient());
        assert!(FailureReason::Transport("refused".into()).is_transient());
        assert!(!FailureReason::Application("bad ssn".into()).is_transient());
        assert!(!FailureReason::Unregistered { name: "X".into() }.is_transient());
        assert!(!FailureReason::Panicked("oops".into()).is_transient());
    }

    #[test]
    fn display_is_diagnostic() {
        assert_eq!(FailureReason::Timeout { after_ms: 250 }.to_string(), "timed out after 250ms");
        assert_eq!(FailureReason::from("boom").to_string(), "boom");
    }
}
