//! The brokering orchestration: score, fan out to every lender, gather, publish.
//!
//! Runs under replay, so everything here must be deterministic. Lender routes
//! and the score retry budget come from the frozen `WorkflowInput`, never from
//! live configuration.
use crate::broker::activities::{GET_CREDIT_SCORE, HANDLE_BROKER_FAULT, PUBLISH_QUOTE_AGGREGATE, REQUEST_LENDER_QUOTE};
use crate::broker::aggregator;
use crate::broker::error::OrchestrationFault;
use crate::broker::model::{
    Credit, CreditScore, FaultReport, LenderQuoteRequest, LenderQuoteTask, ScoreRequest, WorkflowInput,
};
use crate::runtime::OrchestrationRegistry;
use crate::{ActivityOptions, OrchestrationContext};

pub const LOAN_BROKER_ORCHESTRATION: &str = "LoanBroker";

pub fn build_orchestration_registry() -> Result<OrchestrationRegistry, String> {
    OrchestrationRegistry::builder()
        .register_typed(LOAN_BROKER_ORCHESTRATION, loan_broker)
        .build_result()
}

/// Returns the published aggregate as JSON text. On any fault the
/// compensating handler runs first and the instance ends failed.
pub async fn loan_broker(ctx: OrchestrationContext, input: WorkflowInput) -> Result<String, String> {
    match broker_flow(&ctx, &input).await {
        Ok(payload) => Ok(payload),
        Err(fault) => {
            ctx.trace_error(format!("request {} faulted at {}: {fault}", input.request_id, fault.stage()));
            let report = FaultReport {
                request_id: input.request_id.clone(),
                stage: fault.stage().to_string(),
                error: fault.to_string(),
            };
            // The handler's own failure must not mask the fault
            if let Err(e) = ctx.schedule_activity_typed(HANDLE_BROKER_FAULT, &report).into_activity().await {
                ctx.trace_warn(format!("fault handler failed: {e}"));
            }
            Err(fault.to_string())
        }
    }
}

async fn broker_flow(ctx: &OrchestrationContext, input: &WorkflowInput) -> Result<String, OrchestrationFault> {
    ctx.trace_info(format!(
        "brokering request {} for {} lenders",
        input.request_id,
        input.lenders.len()
    ));
    let score = credit_score(ctx, input).await?;

    let request = LenderQuoteRequest {
        amount: input.amount,
        term: input.term,
        credit: Credit { score: score.score },
    };
    let quotes = input
        .lenders
        .iter()
        .map(|route| {
            let task = LenderQuoteTask {
                provider_id: route.provider_id.clone(),
                request,
            };
            let options = ActivityOptions::default().with_timeout_ms(route.timeout_ms);
            ctx.schedule_activity_typed_with(REQUEST_LENDER_QUOTE, &task, options)
        })
        .collect();
    let results = ctx.join(quotes).await;
    if results.len() != input.lenders.len() {
        return Err(OrchestrationFault::Aggregation {
            expected: input.lenders.len(),
            actual: results.len(),
        });
    }

    let providers = input.lenders.iter().map(|r| r.provider_id.clone());
    let aggregate = aggregator::aggregate(&input.request_id, providers.zip(results).collect());
    if aggregate.results.len() != input.lenders.len() {
        return Err(OrchestrationFault::Aggregation {
            expected: input.lenders.len(),
            actual: aggregate.results.len(),
        });
    }
    let payload = serde_json::to_string(&aggregate).map_err(|e| OrchestrationFault::Codec(e.to_string()))?;

    ctx.schedule_activity(PUBLISH_QUOTE_AGGREGATE, payload.clone())
        .into_activity()
        .await
        .map_err(OrchestrationFault::Publish)?;
    ctx.trace_info(format!("published aggregate for request {}", input.request_id));
    Ok(payload)
}

/// Each retry is a fresh activity with its own id and attempt number.
async fn credit_score(ctx: &OrchestrationContext, input: &WorkflowInput) -> Result<CreditScore, OrchestrationFault> {
    let request = ScoreRequest {
        request_id: input.request_id.clone(),
        credit_subject_id: input.credit_subject_id.clone(),
    };
    let max_attempts = input.score_max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let options = ActivityOptions::default()
            .with_attempt(attempt)
            .with_timeout_ms(input.score_timeout_ms);
        match ctx
            .schedule_activity_typed_with(GET_CREDIT_SCORE, &request, options)
            .into_activity_typed::<CreditScore>()
            .await
        {
            Ok(score) => return Ok(score),
            Err(reason) if reason.is_transient() && attempt < max_attempts => {
                ctx.trace_warn(format!("credit score attempt {attempt} failed: {reason}"));
                attempt += 1;
            }
            Err(reason) => return Err(OrchestrationFault::ScoreUnavailable(reason)),
        }
    }
}
