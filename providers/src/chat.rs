//! OpenAI-compatible chat completions gateway.
//!
//! Each [`Role`] is served by its own [`Endpoint`] (base URL, model, key,
//! temperature), so propose and verify can run on different models or even
//! different servers. The role input is sent as a single user message.
//!
//! Streaming responses are read as SSE `delta.content` fragments; reasoning
//! deltas (`reasoning_content`) are not part of the answer and are dropped.

use std::collections::HashMap;
use std::time::Duration;

use lemmaloop_types::Role;
use serde_json::{Value, json};
use url::{Host, Url};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry, should_retry};
use crate::sse_types::chat as typed;
use crate::{
    DEFAULT_STREAM_IDLE_TIMEOUT_SECS, Gateway, GatewayError, GatewayRequest, SseParseAction,
    SseParser, collect_sse_stream, http_client, read_capped_error_body,
};

const COMPLETIONS_PATH: &str = "chat/completions";

/// Secret bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint URL {url:?} must use https (plain http is only allowed for loopback hosts)")]
    Insecure { url: String },
    #[error("endpoint model must not be empty")]
    EmptyModel,
}

/// Where and how one role's requests are sent.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: Url,
    model: String,
    api_key: Option<ApiKey>,
    temperature: Option<f32>,
}

impl Endpoint {
    /// `base_url` is the API root (for example `https://api.openai.com/v1`);
    /// `/chat/completions` is appended unless already present.
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, EndpointError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(EndpointError::EmptyModel);
        }

        let trimmed = base_url.trim().trim_end_matches('/');
        let full = if trimmed.ends_with(COMPLETIONS_PATH) {
            trimmed.to_string()
        } else {
            format!("{trimmed}/{COMPLETIONS_PATH}")
        };
        let url = Url::parse(&full).map_err(|source| EndpointError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => is_loopback(&url),
            _ => false,
        };
        if !secure {
            return Err(EndpointError::Insecure {
                url: base_url.to_string(),
            });
        }

        Ok(Self {
            url,
            model,
            api_key: None,
            temperature: None,
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, key: ApiKey) -> Self {
        self.api_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatGatewayError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`Gateway`] over OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct ChatGateway {
    client: reqwest::Client,
    endpoints: HashMap<Role, Endpoint>,
    retry: RetryConfig,
    idle_timeout: Duration,
}

impl ChatGateway {
    pub fn new(endpoints: HashMap<Role, Endpoint>) -> Result<Self, ChatGatewayError> {
        Ok(Self {
            client: http_client(None)?,
            endpoints,
            retry: RetryConfig::default(),
            idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn endpoint(&self, role: Role) -> Option<&Endpoint> {
        self.endpoints.get(&role)
    }

    async fn complete(
        &self,
        endpoint: &Endpoint,
        input: &str,
        streaming: bool,
    ) -> Result<String, GatewayError> {
        let body = build_request_body(endpoint, input, streaming);
        let bearer = endpoint
            .api_key
            .as_ref()
            .map(|key| format!("Bearer {}", key.expose_secret()));

        let outcome = send_with_retry(
            || {
                let request = self
                    .client
                    .post(endpoint.url.clone())
                    .header("content-type", "application/json")
                    .json(&body);
                match &bearer {
                    Some(bearer) => request.header("Authorization", bearer),
                    None => request,
                }
            },
            None,
            &self.retry,
        )
        .await;

        let response = classify_outcome(outcome).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if streaming && is_event_stream {
            let mut parser = ChatParser::default();
            let text = collect_sse_stream(response, &mut parser, self.idle_timeout).await?;
            if parser.reasoning_bytes > 0 {
                tracing::debug!(
                    reasoning_bytes = parser.reasoning_bytes,
                    "Discarded reasoning deltas"
                );
            }
            Ok(text)
        } else {
            read_completion(response).await
        }
    }
}

impl Gateway for ChatGateway {
    async fn call(&self, request: GatewayRequest<'_>) -> Result<String, GatewayError> {
        let Some(endpoint) = self.endpoints.get(&request.role) else {
            return Err(GatewayError::Fatal(format!(
                "no endpoint configured for role {}",
                request.role
            )));
        };

        tracing::debug!(
            role = %request.role,
            model = %endpoint.model,
            streaming = request.streaming,
            input_bytes = request.input.len(),
            "Gateway call"
        );
        let result = self
            .complete(endpoint, request.input, request.streaming)
            .await;
        match &result {
            Ok(text) => {
                tracing::debug!(role = %request.role, output_bytes = text.len(), "Gateway reply");
            }
            Err(e) => tracing::warn!(role = %request.role, error = %e, "Gateway call failed"),
        }
        result
    }
}

fn build_request_body(endpoint: &Endpoint, input: &str, streaming: bool) -> Value {
    let mut body = json!({
        "model": endpoint.model,
        "messages": [{"role": "user", "content": input}],
        "stream": streaming,
    });
    if let Some(temperature) = endpoint.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

async fn classify_outcome(outcome: RetryOutcome) -> Result<reqwest::Response, GatewayError> {
    match outcome {
        RetryOutcome::Success(response) => Ok(response),
        RetryOutcome::HttpError(response) => {
            let status = response.status();
            let retryable = should_retry(status, response.headers());
            let body = read_capped_error_body(response).await;
            let message = format!("API error {status}: {body}");
            if retryable {
                Err(GatewayError::Transient(message))
            } else {
                Err(GatewayError::Fatal(message))
            }
        }
        RetryOutcome::ConnectionError { attempts, source } => Err(GatewayError::Transient(
            format!("request failed after {attempts} attempts: {source}"),
        )),
        RetryOutcome::NonRetryable(e) if e.is_builder() => {
            Err(GatewayError::Fatal(format!("invalid request: {e}")))
        }
        RetryOutcome::NonRetryable(e) => {
            Err(GatewayError::Transient(format!("request failed: {e}")))
        }
    }
}

async fn read_completion(response: reqwest::Response) -> Result<String, GatewayError> {
    let completion: typed::Completion = response
        .json()
        .await
        .map_err(|e| GatewayError::Transient(format!("invalid completion body: {e}")))?;

    if let Some(error) = completion.error {
        return Err(GatewayError::Transient(format!(
            "completion error: {}",
            error.message_or_default()
        )));
    }

    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| GatewayError::Transient("completion had no choices".to_string()))
}

#[derive(Default)]
struct ChatParser {
    reasoning_bytes: usize,
}

impl SseParser for ChatParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let chunk: typed::Chunk = match serde_json::from_value(json.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Failed to parse chat completion chunk: {e}");
                return SseParseAction::Continue;
            }
        };

        if let Some(error) = chunk.error {
            return SseParseAction::Error(format!(
                "stream error: {}",
                error.message_or_default()
            ));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return SseParseAction::Continue;
        };

        if let Some(reasoning) = &choice.delta.reasoning_content {
            self.reasoning_bytes += reasoning.len();
        }

        let content = choice.delta.content.filter(|s| !s.is_empty());
        match choice.finish_reason {
            Some(reason) => {
                if reason == "length" {
                    tracing::warn!("Completion truncated at the model's output limit");
                }
                SseParseAction::Finish(content)
            }
            None => content.map_or(SseParseAction::Continue, SseParseAction::Append),
        }
    }

    fn provider_name(&self) -> &'static str {
        "chat-completions"
    }
}
