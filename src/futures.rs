use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;

use crate::_typed_codec::{Codec, Json};
use crate::{Action, ActivityOptions, Event, FailureReason, OrchestrationContext};

/// Terminal outcome of one activity as seen by orchestration code.
pub type ActivityResult = Result<String, FailureReason>;

/// A deterministic future for one scheduled activity.
///
/// The first poll records `ActivityScheduled` (unless replay finds it already
/// recorded under the same id) and emits an `Action::CallActivity`. Later polls
/// look up the matching completion in history.
pub struct DurableFuture {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) input: String,
    pub(crate) options: ActivityOptions,
    pub(crate) scheduled: Cell<bool>,
    // Deterministic local failure (e.g. input that could not be encoded); never scheduled
    pub(crate) preset: Option<FailureReason>,
    pub(crate) ctx: OrchestrationContext,
}

impl DurableFuture {
    pub(crate) fn new(
        id: u64,
        name: String,
        input: String,
        options: ActivityOptions,
        preset: Option<FailureReason>,
        ctx: OrchestrationContext,
    ) -> Self {
        Self {
            id,
            name,
            input,
            options,
            scheduled: Cell::new(false),
            preset,
            ctx,
        }
    }

    /// Await the activity's raw string result.
    pub async fn into_activity(self) -> ActivityResult {
        self.await
    }

    /// Await the activity and decode its output; a decode error becomes `FailureReason::Decode`.
    pub async fn into_activity_typed<Out: DeserializeOwned>(self) -> Result<Out, FailureReason> {
        let raw = self.await?;
        Json::decode::<Out>(&raw).map_err(FailureReason::Decode)
    }
}

impl Future for DurableFuture {
    type Output = ActivityResult;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(reason) = &this.preset {
            return Poll::Ready(Err(reason.clone()));
        }
        let mut inner = this.ctx.inner.lock().unwrap();
        if !this.scheduled.get() {
            let recorded = inner.history.iter().find_map(|e| match e {
                Event::ActivityScheduled { id, name, input, .. } if *id == this.id => Some((name.clone(), input.clone())),
                _ => None,
            });
            match recorded {
                Some((name, input)) if name != this.name || input != this.input => {
                    let msg = format!(
                        "nondeterministic: activity id={} recorded as '{}' but code scheduled '{}' (turn {})",
                        this.id, name, this.name, inner.turn_index
                    );
                    inner.flag_nondeterminism(msg);
                    return Poll::Pending;
                }
                Some(_) => {}
                None => {
                    inner.history.push(Event::ActivityScheduled {
                        id: this.id,
                        name: this.name.clone(),
                        input: this.input.clone(),
                        attempt: this.options.attempt,
                        timeout_ms: this.options.timeout_ms,
                    });
                    inner.record_action(Action::CallActivity {
                        id: this.id,
                        name: this.name.clone(),
                        input: this.input.clone(),
                        attempt: this.options.attempt,
                        timeout_ms: this.options.timeout_ms,
                    });
                }
            }
            this.scheduled.set(true);
        }
        match inner.completion_for(this.id) {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Resolves once every child is terminal, yielding results in the order the
/// children were given. Never short-circuits on a failed child.
pub struct JoinFuture {
    children: Vec<DurableFuture>,
    results: Vec<Option<ActivityResult>>,
}

impl JoinFuture {
    pub(crate) fn new(children: Vec<DurableFuture>) -> Self {
        let results = children.iter().map(|_| None).collect();
        Self { children, results }
    }
}

impl Future for JoinFuture {
    type Output = Vec<ActivityResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Every pending child is polled each time so all schedules land in the same turn
        for (child, slot) in this.children.iter_mut().zip(this.results.iter_mut()) {
            if slot.is_none()
                && let Poll::Ready(r) = Pin::new(child).poll(cx)
            {
                *slot = Some(r);
            }
        }
        if this.results.iter().all(Option::is_some) {
            Poll::Ready(std::mem::take(&mut this.results).into_iter().flatten().collect())
        } else {
            Poll::Pending
        }
    }
}
