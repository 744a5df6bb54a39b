use crate::batch::cleaning::clean_response_text;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum EndpointError {
    InvalidUrl(String),
    Transport(String),
    Timeout(Duration),
    Status { status: u16, body: String },
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::InvalidUrl(msg) => write!(f, "invalid endpoint URL: {}", msg),
            EndpointError::Transport(msg) => write!(f, "request failed: {}", msg),
            EndpointError::Timeout(after) => {
                write!(f, "no response within {}s", after.as_secs())
            }
            EndpointError::Status { status, body } if body.is_empty() => {
                write!(f, "endpoint returned HTTP {}", status)
            }
            EndpointError::Status { status, body } => {
                write!(f, "endpoint returned HTTP {}: {}", status, body)
            }
        }
    }
}

impl Error for EndpointError {}

/// One call to the inference endpoint, returning the cleaned response text.
#[async_trait]
pub trait InferenceEndpoint: Send + Sync {
    async fn call(&self, payload: &Value) -> Result<String, EndpointError>;
}

/// Extracts the generated text from a response body and cleans it.
///
/// JSON objects carrying a `response` key yield that value; any other JSON is
/// serialized back; anything unparsable is used as-is.
pub fn get_response_text(content_type: Option<&str>, body: &str) -> String {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);

    let raw = if is_json {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) if map.contains_key("response") => match &map["response"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Ok(other) => other.to_string(),
            Err(_) => body.to_string(),
        }
    } else {
        body.to_string()
    };

    clean_response_text(&raw)
}

/// HTTP client for one endpoint URL with a fixed per-call timeout.
pub struct EndpointClient {
    client: reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
}

impl EndpointClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, EndpointError> {
        let url = reqwest::Url::parse(url.trim())
            .map_err(|e| EndpointError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EndpointError::InvalidUrl(format!(
                "{}: only http and https are supported",
                url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl InferenceEndpoint for EndpointClient {
    async fn call(&self, payload: &Value) -> Result<String, EndpointError> {
        debug!("POST {} {}", self.url, payload);

        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EndpointError::Timeout(self.timeout)
                } else {
                    EndpointError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EndpointError::Timeout(self.timeout)
            } else {
                EndpointError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(get_response_text(content_type.as_deref(), &body))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedText {
    pub text: String,
    /// Calls made, 1..=max_retries + 1.
    pub attempts: u32,
    /// Every attempt came back empty.
    pub degraded: bool,
}

/// Calls the endpoint, retrying only while the cleaned text is empty.
///
/// Transport errors and non-2xx statuses are returned at once. No backoff.
pub async fn fetch_response_text(
    endpoint: &dyn InferenceEndpoint,
    payload: &Value,
    max_retries: u32,
) -> Result<FetchedText, EndpointError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let text = endpoint.call(payload).await?;

        if !text.trim().is_empty() {
            return Ok(FetchedText {
                text,
                attempts,
                degraded: false,
            });
        }

        if attempts > max_retries {
            warn!("Endpoint returned empty text after {} attempts", attempts);
            return Ok(FetchedText {
                text,
                attempts,
                degraded: true,
            });
        }

        debug!("Empty response, retrying ({}/{})", attempts, max_retries);
    }
}
