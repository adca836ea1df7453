use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Runtime;
use crate::{Event, FailureReason};

/// High-level orchestration status derived from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationStatus {
    NotFound,
    /// Started, nothing scheduled yet.
    Created,
    Running,
    Completed { output: String },
    Failed { error: String },
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationStatus::Completed { .. } | OrchestrationStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

/// One scheduled activity as reconstructed from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInvocation {
    pub id: u64,
    pub name: String,
    pub input: String,
    pub attempt: u32,
    pub timeout_ms: Option<u64>,
    pub state: ActivityState,
    pub result: Option<Result<String, FailureReason>>,
}

/// Point-in-time view of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub instance: String,
    pub orchestration: String,
    pub input: String,
    pub status: OrchestrationStatus,
    pub activities: Vec<ActivityInvocation>,
    pub history: Vec<Event>,
}

pub fn status_from_history(history: &[Event]) -> OrchestrationStatus {
    if history.is_empty() {
        return OrchestrationStatus::NotFound;
    }
    for e in history.iter().rev() {
        match e {
            Event::OrchestrationCompleted { output } => return OrchestrationStatus::Completed { output: output.clone() },
            Event::OrchestrationFailed { error } => return OrchestrationStatus::Failed { error: error.clone() },
            _ => {}
        }
    }
    if history.iter().any(|e| matches!(e, Event::ActivityScheduled { .. })) {
        OrchestrationStatus::Running
    } else {
        OrchestrationStatus::Created
    }
}

/// Activities in scheduling order with their state after replaying `history`.
pub fn invocations_from_history(history: &[Event]) -> Vec<ActivityInvocation> {
    let mut out: Vec<ActivityInvocation> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();
    for e in history {
        match e {
            Event::ActivityScheduled {
                id,
                name,
                input,
                attempt,
                timeout_ms,
            } => {
                index.insert(*id, out.len());
                out.push(ActivityInvocation {
                    id: *id,
                    name: name.clone(),
                    input: input.clone(),
                    attempt: *attempt,
                    timeout_ms: *timeout_ms,
                    state: ActivityState::Scheduled,
                    result: None,
                });
            }
            Event::ActivityCompleted { id, result, .. } => {
                if let Some(inv) = index.get(id).map(|&i| &mut out[i]) {
                    inv.state = ActivityState::Succeeded;
                    inv.result = Some(Ok(result.clone()));
                }
            }
            Event::ActivityFailed { id, reason, .. } => {
                if let Some(inv) = index.get(id).map(|&i| &mut out[i]) {
                    inv.state = ActivityState::Failed;
                    inv.result = Some(Err(reason.clone()));
                }
            }
            _ => {}
        }
    }
    out
}

impl Runtime {
    /// Return the current status of an orchestration instance by inspecting its history.
    pub async fn get_orchestration_status(&self, instance: &str) -> OrchestrationStatus {
        let hist = self.history_store.read(instance).await;
        status_from_history(&hist)
    }

    /// Activities of an instance. Those executing in this runtime right now report `Running`.
    pub async fn get_activity_invocations(&self, instance: &str) -> Vec<ActivityInvocation> {
        let hist = self.history_store.read(instance).await;
        let mut invocations = invocations_from_history(&hist);
        let running = self.running_activities_of(instance);
        for inv in invocations.iter_mut() {
            if inv.state == ActivityState::Scheduled && running.contains(&inv.id) {
                inv.state = ActivityState::Running;
            }
        }
        invocations
    }

    pub async fn get_instance(&self, instance: &str) -> Option<InstanceSnapshot> {
        let history = self.history_store.read(instance).await;
        let (orchestration, input) = history.iter().find_map(|e| match e {
            Event::OrchestrationStarted { name, input } => Some((name.clone(), input.clone())),
            _ => None,
        })?;
        Some(InstanceSnapshot {
            instance: instance.to_string(),
            orchestration,
            input,
            status: status_from_history(&history),
            activities: self.get_activity_invocations(instance).await,
            history,
        })
    }
}
