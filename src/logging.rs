//! Replay-aware logging support.
//!
//! Orchestration code never calls `tracing` directly: a turn is replayed
//! many times over the life of an instance. Messages are buffered on the
//! `OrchestrationContext` and the runtime flushes through `tracing` only the
//! lines that no earlier turn of the same instance produced.
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Severity attached to a buffered orchestration log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Install a global `fmt` subscriber honoring `RUST_LOG` (defaults to `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

/// Emit buffered orchestration logs for one instance.
pub(crate) fn flush(instance: &str, turn_index: u64, logs: Vec<(LogLevel, String)>) {
    for (level, msg) in logs {
        match level {
            LogLevel::Error => error!(instance, turn_index, message = %msg, "orchestration trace"),
            LogLevel::Warn => warn!(instance, turn_index, message = %msg, "orchestration trace"),
            LogLevel::Debug => debug!(instance, turn_index, message = %msg, "orchestration trace"),
            LogLevel::Info => info!(instance, turn_index, message = %msg, "orchestration trace"),
        }
    }
}
