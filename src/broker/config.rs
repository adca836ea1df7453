use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::broker::gateway::Participant;
use crate::broker::model::LenderRoute;
use crate::broker::simulator::LenderPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config as YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBureauConfig {
    pub app_id: String,
    pub method: String,
}

impl Default for CreditBureauConfig {
    fn default() -> Self {
        Self {
            app_id: "credit-bureau".to_string(),
            method: "credit-score".to_string(),
        }
    }
}

/// One registered lender. `app_id` defaults to `id`; `timeout_ms` to the broker-wide lender timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenderConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub min_credit_score: u32,
    pub max_loan_amount: u64,
    pub base_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LenderConfig {
    fn new(id: &str, min_credit_score: u32, max_loan_amount: u64, base_rate: f64) -> Self {
        Self {
            id: id.to_string(),
            app_id: None,
            min_credit_score,
            max_loan_amount,
            base_rate,
            timeout_ms: None,
        }
    }

    pub fn app_id(&self) -> &str {
        self.app_id.as_deref().unwrap_or(&self.id)
    }

    pub fn policy(&self) -> LenderPolicy {
        LenderPolicy {
            bank_id: self.id.clone(),
            min_credit_score: self.min_credit_score,
            max_loan_amount: self.max_loan_amount,
            base_rate: self.base_rate,
        }
    }
}

/// Broker configuration. Lenders are solicited in the order listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub dapr_http_endpoint: String,
    pub dapr_api_token: String,
    pub credit_bureau: CreditBureauConfig,
    pub lender_method: String,
    pub lender_timeout_ms: u64,
    pub score_timeout_ms: u64,
    pub score_max_attempts: u32,
    pub lenders: Vec<LenderConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dapr_http_endpoint: "http://localhost:3500".to_string(),
            dapr_api_token: String::new(),
            credit_bureau: CreditBureauConfig::default(),
            lender_method: "loan/request".to_string(),
            lender_timeout_ms: 5_000,
            score_timeout_ms: 5_000,
            score_max_attempts: 3,
            lenders: vec![
                LenderConfig::new("riverstone-bank", 600, 900_000, 3.0),
                LenderConfig::new("titanium-trust", 500, 700_000, 4.0),
                LenderConfig::new("union-vault", 400, 900_000, 3.0),
            ],
        }
    }
}

impl BrokerConfig {
    /// Parse YAML, apply environment overrides, and validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Override connection settings from `DAPR_HTTP_ENDPOINT` / `DAPR_API_TOKEN`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("DAPR_HTTP_ENDPOINT").filter(|v| !v.is_empty()) {
            self.dapr_http_endpoint = endpoint;
        }
        if let Some(token) = lookup("DAPR_API_TOKEN") {
            self.dapr_api_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lender_timeout_ms == 0 || self.score_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".to_string()));
        }
        if self.score_max_attempts == 0 {
            return Err(ConfigError::Invalid("score_max_attempts must be greater than 0".to_string()));
        }
        let mut seen = HashSet::new();
        for lender in &self.lenders {
            if lender.id.trim().is_empty() {
                return Err(ConfigError::Invalid("lender id must not be empty".to_string()));
            }
            if !seen.insert(lender.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate lender id: {}", lender.id)));
            }
            if lender.timeout_ms == Some(0) {
                return Err(ConfigError::Invalid(format!("lender {} has a zero timeout", lender.id)));
            }
            if !lender.base_rate.is_finite() {
                return Err(ConfigError::Invalid(format!("lender {} has a non-finite base rate", lender.id)));
            }
        }
        Ok(())
    }

    /// Lender routes in registration order, each with its effective deadline.
    pub fn routes(&self) -> Vec<LenderRoute> {
        self.lenders
            .iter()
            .map(|l| LenderRoute {
                provider_id: l.id.clone(),
                timeout_ms: l.timeout_ms.unwrap_or(self.lender_timeout_ms),
            })
            .collect()
    }

    pub fn lender(&self, provider_id: &str) -> Option<&LenderConfig> {
        self.lenders.iter().find(|l| l.id == provider_id)
    }

    pub fn credit_bureau_participant(&self) -> Participant {
        Participant {
            id: "credit-bureau".to_string(),
            app_id: self.credit_bureau.app_id.clone(),
        }
    }

    pub fn lender_participant(&self, provider_id: &str) -> Option<Participant> {
        self.lender(provider_id).map(|l| Participant {
            id: l.id.clone(),
            app_id: l.app_id().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_three_lenders_in_order() {
        let cfg = BrokerConfig::default();
        cfg.validate().unwrap();
        let ids: Vec<_> = cfg.routes().into_iter().map(|r| r.provider_id).collect();
        assert_eq!(ids, vec!["riverstone-bank", "titanium-trust", "union-vault"]);
        assert!(cfg.routes().iter().all(|r| r.timeout_ms == 5_000));
    }

    #[test]
    fn yaml_overrides_lenders_and_per_lender_timeouts() {
        let yaml = r#"
lender_timeout_ms: 800
lenders:
  - id: a
    min_credit_score: 600
    max_loan_amount: 1000
    base_rate: 3.0
  - id: b
    app_id: bank-b
    min_credit_score: 500
    max_loan_amount: 1000
    base_rate: 4.0
    timeout_ms: 50
"#;
        let cfg: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.routes(),
            vec![
                LenderRoute {
                    provider_id: "a".into(),
                    timeout_ms: 800
                },
                LenderRoute {
                    provider_id: "b".into(),
                    timeout_ms: 50
                },
            ]
        );
        assert_eq!(cfg.lender_participant("b").unwrap().app_id, "bank-b");
        assert_eq!(cfg.score_max_attempts, 3);
    }

    #[test]
    fn rejects_duplicate_lenders() {
        let mut cfg = BrokerConfig::default();
        cfg.lenders.push(cfg.lenders[0].clone());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = BrokerConfig::default();
        cfg.apply_overrides(|k| match k {
            "DAPR_HTTP_ENDPOINT" => Some("http://dapr:3500".to_string()),
            "DAPR_API_TOKEN" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(cfg.dapr_http_endpoint, "http://dapr:3500");
        assert_eq!(cfg.dapr_api_token, "secret");
    }
}
