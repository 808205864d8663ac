//! Injected transport capability and single-attempt execution.
//!
//! [`Transport`] is the seam between the client and the network: tests and
//! embedders supply their own implementation, production code uses
//! [`ReqwestTransport`]. [`perform_call`] runs exactly one bounded exchange
//! and classifies every possible outcome into a [`ClientError`].

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::error::{ClientError, retryable_status};
use crate::request::Payload;

const ERROR_MESSAGE_LIMIT: usize = 500;

/// One outbound provider request, ready to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub bearer_token: String,
    /// JSON-encoded request body.
    pub body: String,
}

/// Raw transport outcome: status plus readable text body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure, split by retryability.
#[derive(Debug, Clone)]
pub enum TransportFailure {
    /// Connectivity, DNS, or socket-layer failure.
    Network(String),
    /// Everything else; surfaced as-is, never retried.
    Other(String),
}

/// The injected HTTP capability. Cancellation is by dropping the returned
/// future; [`perform_call`] does so when the deadline fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &TransportRequest)
    -> Result<TransportResponse, TransportFailure>;
}

/// Default [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ClientError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportFailure> {
        let response = self
            .client
            .post(&request.url)
            .header("authorization", format!("Bearer {}", request.bearer_token))
            .header("content-type", "application/json")
            .body(request.body.clone())
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportFailure {
    if err.is_connect() || err.is_timeout() {
        TransportFailure::Network(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}

/// Performs one request/response exchange bounded by the configured
/// deadline and classifies the outcome.
pub(crate) async fn perform_call(
    transport: &dyn Transport,
    config: &Config,
    api_key: &str,
    payload: &Payload,
) -> Result<Value, ClientError> {
    let body = serde_json::to_string(payload)
        .map_err(|err| ClientError::Transport(format!("failed to encode request: {err}")))?;
    let request = TransportRequest {
        url: config.endpoint.clone(),
        bearer_token: api_key.to_string(),
        body,
    };

    // Deadline elapsing drops the in-flight future; the next attempt gets
    // a fresh full deadline.
    let response = match tokio::time::timeout(config.timeout, transport.fetch(&request)).await {
        Err(_) => {
            return Err(ClientError::Timeout {
                timeout_ms: config.timeout.as_millis() as u64,
            });
        }
        Ok(Err(TransportFailure::Network(message))) => return Err(ClientError::Network(message)),
        Ok(Err(TransportFailure::Other(message))) => return Err(ClientError::Transport(message)),
        Ok(Ok(response)) => response,
    };

    if !(200..300).contains(&response.status) {
        return Err(ClientError::Http {
            status: response.status,
            message: provider_message(&response.body),
            retryable: retryable_status(response.status),
        });
    }

    serde_json::from_str(&response.body)
        .map_err(|err| ClientError::MalformedResponse(err.to_string()))
}

/// Extracts a human-readable message from a provider error body: the JSON
/// error envelope when present, otherwise the raw text collapsed and
/// truncated.
fn provider_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            return message.to_string();
        }
    }

    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "provider returned an empty error body".to_string();
    }
    if collapsed.chars().count() > ERROR_MESSAGE_LIMIT {
        collapsed.chars().take(ERROR_MESSAGE_LIMIT).collect()
    } else {
        collapsed
    }
}
