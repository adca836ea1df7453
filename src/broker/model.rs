//! Wire and domain types for loan brokering.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::FailureReason;

static CREDIT_SUBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").expect("credit subject pattern is valid"));

/// True for ids shaped like `123-45-6789`.
pub fn credit_subject_is_valid(id: &str) -> bool {
    CREDIT_SUBJECT_ID.is_match(id)
}

/// Loan request accepted at intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRequest {
    #[serde(alias = "request_id", alias = "id")]
    pub request_id: String,
    #[serde(alias = "SSN", alias = "credit_subject_id")]
    pub credit_subject_id: String,
    pub amount: u64,
    pub term: u32,
}

/// A lender to solicit and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderRoute {
    pub provider_id: String,
    pub timeout_ms: u64,
}

/// Instance input. Routes and retry budget are frozen here at submit time,
/// so replays after a configuration change make the same decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub request_id: String,
    pub credit_subject_id: String,
    pub amount: u64,
    pub term: u32,
    pub lenders: Vec<LenderRoute>,
    pub score_max_attempts: u32,
    pub score_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub request_id: String,
    pub credit_subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditScore {
    pub request_id: String,
    pub score: u32,
    pub history_months: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BureauBody {
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub history: Option<u32>,
}

/// Credit bureau answer, either flat or wrapped in a status envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CreditBureauResponse {
    Envelope {
        #[serde(rename = "statusCode")]
        status_code: u16,
        #[serde(default)]
        request_id: Option<String>,
        body: BureauBody,
    },
    Flat(CreditScore),
}

impl CreditBureauResponse {
    pub fn into_score(self, request_id: &str) -> Result<CreditScore, FailureReason> {
        match self {
            CreditBureauResponse::Flat(score) => Ok(score),
            CreditBureauResponse::Envelope { status_code: 400, .. } => Err(FailureReason::Application(
                "credit bureau rejected the credit subject id".to_string(),
            )),
            CreditBureauResponse::Envelope {
                status_code,
                request_id: echoed,
                body,
            } if (200..300).contains(&status_code) => match body.score {
                Some(score) => Ok(CreditScore {
                    request_id: echoed.unwrap_or_else(|| request_id.to_string()),
                    score,
                    history_months: body.history.unwrap_or(0),
                }),
                None => Err(FailureReason::Decode("credit bureau response has no score".to_string())),
            },
            CreditBureauResponse::Envelope { status_code, .. } => Err(FailureReason::Transport(format!(
                "credit bureau answered {status_code}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderQuoteRequest {
    pub amount: u64,
    pub term: u32,
    pub credit: Credit,
}

/// Input of one lender activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderQuoteTask {
    pub provider_id: String,
    pub request: LenderQuoteRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LenderDecision {
    #[serde(rename = "APPROVED", alias = "APROVED")]
    Approved,
    #[serde(rename = "DENIED")]
    Denied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<String>,
}

/// What a lender answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderResponse {
    pub status: LenderDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<Quote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Approved,
    Denied,
    Error,
}

/// One entry of the aggregate. `rate` is set iff approved, `message` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteOutcome {
    pub provider_id: String,
    pub status: QuoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteAggregate {
    pub request_id: String,
    pub results: Vec<QuoteOutcome>,
}

/// Handed to the compensating handler when an instance faults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultReport {
    pub request_id: String,
    pub stage: String,
    pub error: String,
}
