//! Invocation of external participants (credit bureau, lenders).
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::broker::config::BrokerConfig;
use crate::broker::error::GatewayError;

/// Identity of a remote participant. `app_id` is what the sidecar routes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    pub id: String,
    pub app_id: String,
}

/// Stateless client for participants. Implementations must not retry;
/// retry policy belongs to the orchestration.
#[async_trait]
pub trait ParticipantGateway: Send + Sync {
    async fn invoke(&self, participant: &Participant, method: &str, payload: Value) -> Result<Value, GatewayError>;
}

/// Service-invocation over a Dapr sidecar's HTTP API.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpGateway {
    pub fn new(endpoint: &str, api_token: Option<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self, GatewayError> {
        Self::new(&config.dapr_http_endpoint, Some(config.dapr_api_token.clone()))
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method.trim_start_matches('/'))
    }
}

#[async_trait]
impl ParticipantGateway for HttpGateway {
    async fn invoke(&self, participant: &Participant, method: &str, payload: Value) -> Result<Value, GatewayError> {
        let url = self.url(method);
        debug!(participant = %participant.id, app_id = %participant.app_id, %url, "invoking participant");
        let mut request = self
            .client
            .post(&url)
            .header("dapr-app-id", &participant.app_id)
            .json(&payload);
        if let Some(token) = &self.api_token {
            request = request.header("dapr-api-token", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}
