//! In-process stand-ins for the credit bureau and lender services.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::broker::config::BrokerConfig;
use crate::broker::error::GatewayError;
use crate::broker::gateway::{Participant, ParticipantGateway};
use crate::broker::model::{
    LenderDecision, LenderQuoteRequest, LenderResponse, Quote, ScoreRequest, credit_subject_is_valid,
};

const MIN_SCORE: u32 = 300;
const MAX_SCORE: u32 = 900;

/// Lending rules of one bank.
#[derive(Debug, Clone, PartialEq)]
pub struct LenderPolicy {
    pub bank_id: String,
    pub min_credit_score: u32,
    pub max_loan_amount: u64,
    pub base_rate: f64,
}

impl LenderPolicy {
    /// Approve with `base + jitter * (1000 - score) / 100`, or deny with "Loan Rejected".
    /// `jitter` is expected in `[0, 1)`.
    pub fn quote(&self, request: &LenderQuoteRequest, jitter: f64) -> LenderResponse {
        let score = request.credit.score;
        if request.amount > self.max_loan_amount || score < self.min_credit_score {
            return LenderResponse {
                status: LenderDecision::Denied,
                quote: None,
                bank_id: Some(self.bank_id.clone()),
                message: Some("Loan Rejected".to_string()),
            };
        }
        let rate = self.base_rate + jitter * (1000.0 - f64::from(score)) / 100.0;
        LenderResponse {
            status: LenderDecision::Approved,
            quote: Some(Quote {
                rate,
                bank_id: Some(self.bank_id.clone()),
            }),
            bank_id: None,
            message: None,
        }
    }
}

/// A `ParticipantGateway` answering from memory. Scores and jitter are random
/// unless fixed; latency and outages can be injected per app id.
pub struct SimulatedParticipants {
    bureau_app_id: String,
    lenders: HashMap<String, LenderPolicy>,
    fixed_score: Option<u32>,
    fixed_jitter: Option<f64>,
    delays: HashMap<String, Duration>,
    unavailable: HashSet<String>,
    flaky: HashMap<String, usize>,
    calls: Mutex<HashMap<String, usize>>,
}

impl SimulatedParticipants {
    pub fn from_config(config: &BrokerConfig) -> Self {
        let lenders = config
            .lenders
            .iter()
            .map(|l| (l.app_id().to_string(), l.policy()))
            .collect();
        Self {
            bureau_app_id: config.credit_bureau.app_id.clone(),
            lenders,
            fixed_score: None,
            fixed_jitter: None,
            delays: HashMap::new(),
            unavailable: HashSet::new(),
            flaky: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fixed_score(mut self, score: u32) -> Self {
        self.fixed_score = Some(score);
        self
    }

    pub fn with_fixed_jitter(mut self, jitter: f64) -> Self {
        self.fixed_jitter = Some(jitter);
        self
    }

    /// Delay every answer from `app_id`.
    pub fn with_delay(mut self, app_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(app_id.into(), delay);
        self
    }

    /// Refuse every connection to `app_id`.
    pub fn with_unavailable(mut self, app_id: impl Into<String>) -> Self {
        self.unavailable.insert(app_id.into());
        self
    }

    /// Refuse the first `failures` connections to `app_id`.
    pub fn with_transient_failures(mut self, app_id: impl Into<String>, failures: usize) -> Self {
        self.flaky.insert(app_id.into(), failures);
        self
    }

    /// Number of invocations `app_id` has received.
    pub fn calls(&self, app_id: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(app_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_call(&self, app_id: &str) -> usize {
        let Ok(mut calls) = self.calls.lock() else {
            return 0;
        };
        let n = calls.entry(app_id.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    fn credit_score(&self, payload: Value) -> Result<Value, GatewayError> {
        let req: ScoreRequest = serde_json::from_value(payload).map_err(|e| GatewayError::Decode(e.to_string()))?;
        if !credit_subject_is_valid(&req.credit_subject_id) {
            info!(request_id = %req.request_id, "credit bureau rejected malformed subject id");
            return Ok(json!({
                "statusCode": 400,
                "request_id": req.request_id,
                "body": { "SSN": req.credit_subject_id },
            }));
        }
        let score = self
            .fixed_score
            .unwrap_or_else(|| rand::thread_rng().gen_range(MIN_SCORE..=MAX_SCORE));
        let history = rand::thread_rng().gen_range(1..=30u32);
        Ok(json!({
            "statusCode": 200,
            "request_id": req.request_id,
            "body": { "SSN": req.credit_subject_id, "score": score, "history": history },
        }))
    }

    fn lender_quote(&self, policy: &LenderPolicy, payload: Value) -> Result<Value, GatewayError> {
        let req: LenderQuoteRequest =
            serde_json::from_value(payload).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let jitter = self.fixed_jitter.unwrap_or_else(|| rand::thread_rng().r#gen::<f64>());
        let response = policy.quote(&req, jitter);
        debug!(bank_id = %policy.bank_id, status = ?response.status, "lender answered");
        serde_json::to_value(response).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ParticipantGateway for SimulatedParticipants {
    async fn invoke(&self, participant: &Participant, method: &str, payload: Value) -> Result<Value, GatewayError> {
        let app_id = participant.app_id.as_str();
        let n = self.record_call(app_id);
        if let Some(delay) = self.delays.get(app_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.unavailable.contains(app_id) || self.flaky.get(app_id).is_some_and(|f| n <= *f) {
            return Err(GatewayError::Transport(format!("connection refused: {app_id}")));
        }
        debug!(app_id, method, "simulated invocation");
        if app_id == self.bureau_app_id {
            return self.credit_score(payload);
        }
        match self.lenders.get(app_id) {
            Some(policy) => self.lender_quote(policy, payload),
            None => Err(GatewayError::Transport(format!("no participant registered for app id {app_id}"))),
        }
    }
}
