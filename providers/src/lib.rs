//! Gateway to the external reasoning service.
//!
//! # Architecture
//!
//! - [`Gateway`] - the capability the engine depends on: one call per
//!   (role, rendered input), returning text or a classified error
//! - [`chat`] - [`ChatGateway`], an OpenAI-compatible `/chat/completions`
//!   client with per-role endpoints
//! - [`retry`] - HTTP-level retry policy with exponential backoff
//!
//! # Error Handling
//!
//! Every failure is classified as [`GatewayError::Transient`] (worth retrying
//! with a fresh request) or [`GatewayError::Fatal`] (retrying cannot help).
//! The caller owns the retry budget for transient failures.

pub mod chat;
pub mod retry;
pub mod sse_types;

pub use chat::{ApiKey, ChatGateway, ChatGatewayError, Endpoint, EndpointError};
pub use lemmaloop_types;

use lemmaloop_types::Role;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;

const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

// ============================================================================
// Gateway capability
// ============================================================================

/// One request to the reasoning service.
#[derive(Debug, Clone, Copy)]
pub struct GatewayRequest<'a> {
    pub role: Role,
    pub input: &'a str,
    pub streaming: bool,
}

impl<'a> GatewayRequest<'a> {
    #[must_use]
    pub fn new(role: Role, input: &'a str) -> Self {
        Self {
            role,
            input,
            streaming: true,
        }
    }

    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, interrupted stream, idle timeout, retryable status or
    /// deadline. A fresh request may succeed.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// Authentication, bad request, missing endpoint. Retrying cannot help.
    #[error("fatal gateway failure: {0}")]
    Fatal(String),
}

impl GatewayError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Capability to turn a rendered role input into the service's text output.
///
/// Implementations must not keep partial output between calls: every call is
/// a fresh request.
pub trait Gateway: Send + Sync {
    fn call(
        &self,
        request: GatewayRequest<'_>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

impl<G: Gateway> Gateway for Arc<G> {
    fn call(
        &self,
        request: GatewayRequest<'_>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send {
        (**self).call(request)
    }
}

impl<G: Gateway> Gateway for &G {
    fn call(
        &self,
        request: GatewayRequest<'_>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send {
        (**self).call(request)
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Build the shared HTTP client.
///
/// `https_only` is off because loopback endpoints (local inference servers)
/// are allowed over plain http; [`Endpoint::new`] rejects any other http URL.
pub fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client, reqwest::Error> {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        "X-Client-Name",
        HeaderValue::from_static(env!("CARGO_PKG_NAME")),
    );
    default_headers.insert("X-Client-OS", HeaderValue::from_static(std::env::consts::OS));

    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

// ============================================================================
// SSE
// ============================================================================

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event: Vec<u8> = buffer.drain(..pos + delim_len).take(pos).collect();
    Some(event)
}

fn extract_sse_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// What a parser wants done with one decoded SSE payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseParseAction {
    Continue,
    /// Append answer text and keep reading.
    Append(String),
    /// Completion signal, with any text carried by the final payload.
    Finish(Option<String>),
    Error(String),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;
    fn provider_name(&self) -> &'static str;
}

/// Read an SSE response to completion and return the accumulated answer.
///
/// The response and its byte stream are dropped on every return path. Any
/// interruption (idle timeout, oversized buffer, invalid UTF-8, repeated bad
/// payloads, EOF before a completion signal) is transient.
pub(crate) async fn collect_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    idle_timeout: Duration,
) -> Result<String, GatewayError> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut text = String::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            return Err(GatewayError::Transient("stream idle timeout".to_string()));
        };

        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| GatewayError::Transient(format!("stream read failed: {e}")))?;
        buffer.extend_from_slice(&chunk);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            return Err(GatewayError::Transient(
                "SSE buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                return Err(GatewayError::Transient(
                    "received invalid UTF-8 from SSE stream".to_string(),
                ));
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                return Ok(text);
            }

            let json = match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => json,
                Err(e) => {
                    parse_errors += 1;
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        provider = parser.provider_name(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        return Err(GatewayError::Transient(format!(
                            "invalid stream payload: {e}"
                        )));
                    }
                    continue;
                }
            };

            parse_errors = 0;
            match parser.parse(&json) {
                SseParseAction::Continue => {}
                SseParseAction::Append(delta) => text.push_str(&delta),
                SseParseAction::Finish(tail) => {
                    if let Some(tail) = tail {
                        text.push_str(&tail);
                    }
                    return Ok(text);
                }
                SseParseAction::Error(msg) => return Err(GatewayError::Transient(msg)),
            }
        }
    }

    Err(GatewayError::Transient(
        "connection closed before stream completed".to_string(),
    ))
}
