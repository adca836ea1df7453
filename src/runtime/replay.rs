use std::sync::Arc;

use crate::logging::LogLevel;
use crate::runtime::OrchestrationHandler;
use crate::{Action, Event};

/// Decisions are the same as public Actions; we emit them directly from the replay core.
pub type Decision = Action;

/// Everything one replayed turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// History after the turn, including newly recorded schedules.
    pub history: Vec<Event>,
    pub decisions: Vec<Decision>,
    pub logs: Vec<(LogLevel, String)>,
    /// Set when the orchestration function returned during this turn.
    pub output: Option<Result<String, String>>,
    /// Set when the code diverged from the recorded history.
    pub nondeterminism: Option<String>,
}

pub trait ReplayEngine: Send + Sync {
    /// Replays the orchestration over `history` once and reports the result of the turn.
    fn replay(
        &self,
        history: Vec<Event>,
        turn_index: u64,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> TurnOutcome;
}

#[derive(Default)]
pub struct DefaultReplayEngine;

impl DefaultReplayEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ReplayEngine for DefaultReplayEngine {
    fn replay(
        &self,
        history: Vec<Event>,
        turn_index: u64,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> TurnOutcome {
        let orchestrator = |ctx: crate::OrchestrationContext| {
            let h = handler.clone();
            let inp = input.clone();
            async move { h.invoke(ctx, inp).await }
        };
        let (history, decisions, logs, output, nondeterminism) = crate::run_turn_with(history, turn_index, orchestrator);
        TurnOutcome {
            history,
            decisions,
            logs,
            output,
            nondeterminism,
        }
    }
}
