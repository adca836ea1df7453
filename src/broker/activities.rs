//! Activity handlers for the broker. Each talks to one collaborator and
//! reports transport problems as transient `FailureReason`s.
use std::sync::Arc;

use tracing::{error, info};

use crate::FailureReason;
use crate::broker::config::BrokerConfig;
use crate::broker::gateway::ParticipantGateway;
use crate::broker::model::{CreditBureauResponse, CreditScore, FaultReport, LenderQuoteTask, QuoteAggregate, ScoreRequest};
use crate::broker::sink::AggregateSink;
use crate::runtime::ActivityRegistry;

pub const GET_CREDIT_SCORE: &str = "GetCreditScore";
pub const REQUEST_LENDER_QUOTE: &str = "RequestLenderQuote";
pub const PUBLISH_QUOTE_AGGREGATE: &str = "PublishQuoteAggregate";
pub const HANDLE_BROKER_FAULT: &str = "HandleBrokerFault";

fn decode_err(e: serde_json::Error) -> FailureReason {
    FailureReason::Decode(e.to_string())
}

pub fn build_activity_registry(
    config: Arc<BrokerConfig>,
    gateway: Arc<dyn ParticipantGateway>,
    sink: Arc<dyn AggregateSink>,
) -> ActivityRegistry {
    let score_cfg = config.clone();
    let score_gw = gateway.clone();
    let lender_cfg = config;
    let lender_gw = gateway;

    ActivityRegistry::builder()
        .register_typed(GET_CREDIT_SCORE, move |req: ScoreRequest| {
            let config = score_cfg.clone();
            let gateway = score_gw.clone();
            async move {
                let bureau = config.credit_bureau_participant();
                let payload = serde_json::to_value(&req).map_err(decode_err)?;
                let raw = gateway
                    .invoke(&bureau, &config.credit_bureau.method, payload)
                    .await
                    .map_err(FailureReason::from)?;
                let response: CreditBureauResponse = serde_json::from_value(raw).map_err(decode_err)?;
                let score: CreditScore = response.into_score(&req.request_id)?;
                info!(request_id = %req.request_id, score = score.score, "credit score obtained");
                Ok::<_, FailureReason>(score)
            }
        })
        .register_typed(REQUEST_LENDER_QUOTE, move |task: LenderQuoteTask| {
            let config = lender_cfg.clone();
            let gateway = lender_gw.clone();
            async move {
                let Some(lender) = config.lender_participant(&task.provider_id) else {
                    return Err(FailureReason::Application(format!("unknown lender: {}", task.provider_id)));
                };
                let payload = serde_json::to_value(task.request).map_err(decode_err)?;
                let answer = gateway
                    .invoke(&lender, &config.lender_method, payload)
                    .await
                    .map_err(FailureReason::from)?;
                Ok::<_, FailureReason>(answer)
            }
        })
        .register_fallible(PUBLISH_QUOTE_AGGREGATE, move |payload: String| {
            let sink = sink.clone();
            async move {
                let aggregate: QuoteAggregate = serde_json::from_str(&payload).map_err(decode_err)?;
                sink.write(&aggregate.request_id, &payload)
                    .await
                    .map_err(|e| FailureReason::Transport(e.to_string()))?;
                info!(request_id = %aggregate.request_id, outcomes = aggregate.results.len(), "aggregate published");
                Ok::<_, FailureReason>(aggregate.request_id)
            }
        })
        .register_typed(HANDLE_BROKER_FAULT, |report: FaultReport| async move {
            error!(
                request_id = %report.request_id,
                stage = %report.stage,
                error = %report.error,
                "loan brokering failed"
            );
            Ok::<_, FailureReason>("error".to_string())
        })
        .build()
}
