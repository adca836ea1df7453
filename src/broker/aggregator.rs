use crate::ActivityResult;
use crate::broker::model::{LenderDecision, LenderResponse, QuoteAggregate, QuoteOutcome, QuoteStatus};

/// Fold lender results into the aggregate, one entry per provider in the
/// order given. Never fails: anything unusable becomes an `ERROR` entry.
pub fn aggregate(request_id: &str, results: Vec<(String, ActivityResult)>) -> QuoteAggregate {
    let results = results
        .into_iter()
        .map(|(provider_id, result)| outcome(provider_id, result))
        .collect();
    QuoteAggregate {
        request_id: request_id.to_string(),
        results,
    }
}

fn outcome(provider_id: String, result: ActivityResult) -> QuoteOutcome {
    let payload = match result {
        Ok(payload) => payload,
        Err(reason) => return error(provider_id, reason.to_string()),
    };
    let response: LenderResponse = match serde_json::from_str(&payload) {
        Ok(r) => r,
        Err(e) => return error(provider_id, format!("malformed lender payload: {e}")),
    };
    match response.status {
        LenderDecision::Approved => match response.quote.map(|q| q.rate).filter(|r| r.is_finite()) {
            Some(rate) => QuoteOutcome {
                provider_id,
                status: QuoteStatus::Approved,
                rate: Some(rate),
                message: None,
            },
            None => error(provider_id, "approval without a rate".to_string()),
        },
        LenderDecision::Denied => QuoteOutcome {
            provider_id,
            status: QuoteStatus::Denied,
            rate: None,
            message: Some(response.message.unwrap_or_else(|| "Loan Rejected".to_string())),
        },
    }
}

fn error(provider_id: String, message: String) -> QuoteOutcome {
    QuoteOutcome {
        provider_id,
        status: QuoteStatus::Error,
        rate: None,
        message: Some(message),
    }
}
