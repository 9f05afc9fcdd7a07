//! # Azure REST Plumbing
//!
//! Thin wrapper over `reqwest` for ARM and Graph calls: bearer auth, error
//! classification and long-running operation polling.

use crate::observability::metrics;
use crate::provider::{JsonOperationCodec, OperationCodec, OperationPoll, OperationToken, ProviderError};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response of a successful (or 404) call
#[derive(Debug)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl HttpReply {
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

/// Map a failed HTTP status to a provider error
pub fn classify(status: StatusCode, message: &str) -> ProviderError {
    let detail = format!("HTTP {status}: {message}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::UNAUTHORIZED
        || status.is_server_error()
    {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Rejected(detail)
    }
}

/// Extract `error.message` from an ARM or Graph error body
pub fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// `code: message` of an error body, or just the message without a code
pub fn error_detail(body: &Value) -> String {
    let message = error_message(body);
    match body.pointer("/error/code").and_then(Value::as_str) {
        Some(code) => format!("{code}: {message}"),
        None => message,
    }
}

/// Shared HTTP client for Azure calls
#[derive(Debug, Clone)]
pub struct AzureHttp {
    client: reqwest::Client,
}

impl AzureHttp {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Send a request. 2xx and 404 replies are returned, everything else is classified.
    pub async fn send(
        &self,
        provider: &str,
        operation: &str,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<HttpReply, ProviderError> {
        let start = Instant::now();
        metrics::increment_provider_operations(provider, operation);

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }

        let result: Result<HttpReply, ProviderError> = async {
            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::Transient(format!("{method} {url} failed: {e}")))?;
            let status = response.status();
            let headers = response.headers().clone();
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::Transient(format!("{method} {url}: failed to read body: {e}")))?;
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };

            if status.is_success() || status == StatusCode::NOT_FOUND {
                debug!("{} {} -> {}", method, url, status);
                Ok(HttpReply { status, headers, body })
            } else {
                Err(classify(status, &error_detail(&body)))
            }
        }
        .await;

        metrics::observe_provider_operation_duration(provider, operation, start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::increment_provider_operation_errors(provider, operation);
            warn!("{} {} ({}) failed: {}", provider, operation, url, e);
        }
        result
    }
}

/// How a long-running ARM operation reports progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollingStyle {
    /// `Azure-AsyncOperation` header, status in the body
    AsyncOperation,
    /// `Location` header, status in the HTTP code
    Location,
}

/// Handle of a long-running ARM operation, persisted as the operation token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperation {
    /// `None` when the call completed synchronously
    pub polling_url: Option<String>,
    pub style: PollingStyle,
}

impl AsyncOperation {
    /// Build the handle from the reply to a PUT/DELETE
    pub fn from_reply(reply: &HttpReply) -> Self {
        let header = |name: &str| {
            reply
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(url) = header("Azure-AsyncOperation") {
            Self {
                polling_url: Some(url),
                style: PollingStyle::AsyncOperation,
            }
        } else if let Some(url) = header("Location") {
            Self {
                polling_url: Some(url),
                style: PollingStyle::Location,
            }
        } else {
            Self {
                polling_url: None,
                style: PollingStyle::Location,
            }
        }
    }

    pub fn encode(&self) -> Result<OperationToken, ProviderError> {
        JsonOperationCodec::<Self>::default().encode(self)
    }

    pub fn decode(token: &OperationToken) -> Result<Self, ProviderError> {
        JsonOperationCodec::<Self>::default().decode(token)
    }

    /// Interpret a polling reply
    pub fn interpret(&self, reply: &HttpReply) -> OperationPoll {
        match self.style {
            PollingStyle::AsyncOperation => {
                match reply.body.get("status").and_then(Value::as_str).unwrap_or_default() {
                    "Succeeded" => OperationPoll::Succeeded,
                    "Failed" | "Canceled" => OperationPoll::Failed(error_message(&reply.body)),
                    _ if reply.is_not_found() => OperationPoll::Succeeded,
                    _ => OperationPoll::InProgress,
                }
            }
            PollingStyle::Location => {
                if reply.status == StatusCode::ACCEPTED {
                    OperationPoll::InProgress
                } else {
                    OperationPoll::Succeeded
                }
            }
        }
    }

    /// Poll the operation once
    pub async fn poll(&self, http: &AzureHttp, provider: &str, token: &str) -> Result<OperationPoll, ProviderError> {
        let Some(url) = &self.polling_url else {
            return Ok(OperationPoll::Succeeded);
        };
        let reply = http
            .send(provider, "poll_operation", Method::GET, url, token, None)
            .await?;
        Ok(self.interpret(&reply))
    }
}
