//! HTTP retry policy with exponential backoff.
//!
//! This layer sits under the engine's call-level retry: it absorbs short
//! blips (rate limits, 5xx, refused connections) inside one gateway call, and
//! whatever survives it is classified as transient or fatal for the caller.
//!
//! # Retry Policy
//!
//! - Max retries: 2 (3 total attempts)
//! - Initial delay: 500ms, doubled per retry, capped at 8 seconds
//! - Jitter: down-jitter up to 25% (multiplier in [0.75, 1.0])
//! - `Retry-After-Ms` / `Retry-After` override the computed delay when in (0, 60s)
//!
//! # Retryable Conditions
//!
//! - HTTP 408, 409, 429, 5xx
//! - Connection errors
//! - `x-should-retry: true` forces retry, `x-should-retry: false` forbids it
//!
//! # Headers
//!
//! - `X-Retry-Count`: 0 for the initial attempt, 1+ for retries
//! - `Idempotency-Key`: `lemmaloop-{uuid}`, identical across all attempts
//! - `X-Request-Timeout`: request timeout in seconds (non-streaming only)

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use uuid::Uuid;

const MAX_HONORED_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial request.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no HTTP-level retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

fn honored(duration: Duration) -> Option<Duration> {
    (duration > Duration::ZERO && duration < MAX_HONORED_RETRY_AFTER).then_some(duration)
}

/// Parse `Retry-After-Ms` (float milliseconds) or `Retry-After` (integer seconds).
///
/// Values outside (0, 60s) are ignored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let from_ms = header("retry-after-ms")
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .and_then(|ms| honored(Duration::from_secs_f64(ms / 1000.0)));
    if from_ms.is_some() {
        return from_ms;
    }

    header("retry-after")
        .and_then(|s| s.parse::<u64>().ok())
        .and_then(|secs| honored(Duration::from_secs(secs)))
}

/// Whether a non-success status is worth another attempt.
///
/// An explicit `x-should-retry` header wins over the status table.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    let forced = headers
        .get("x-should-retry")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        });
    if let Some(forced) = forced {
        return forced;
    }

    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

/// Delay before the retry following `backoff_step` (0 before the first retry).
#[must_use]
pub fn calculate_retry_delay(
    backoff_step: u32,
    config: &RetryConfig,
    headers: Option<&HeaderMap>,
) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay;
    }

    let exponent = backoff_step.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

pub fn add_retry_headers(
    builder: RequestBuilder,
    retry_count: u32,
    idempotency_key: &str,
    timeout: Option<Duration>,
) -> RequestBuilder {
    let builder = builder
        .header("X-Retry-Count", retry_count.to_string())
        .header("Idempotency-Key", idempotency_key);

    match timeout {
        Some(t) => builder.header("X-Request-Timeout", t.as_secs().to_string()),
        None => builder,
    }
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("lemmaloop-{}", Uuid::new_v4())
}

/// Result of [`send_with_retry`]. Success and failure are distinct variants so
/// an error response cannot be mistaken for a completion.
#[derive(Debug)]
pub enum RetryOutcome {
    /// 2xx response.
    Success(Response),
    /// Non-2xx response: either not retryable or the last attempt.
    HttpError(Response),
    /// Transport failure on the last attempt.
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
    /// Transport failure that retrying cannot fix (for example a malformed request).
    NonRetryable(reqwest::Error),
}

impl RetryOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Send a request, retrying retryable failures per `config`.
///
/// `build_request` is invoked once per attempt so every retry is a fresh
/// request. The idempotency key is shared by all attempts.
pub async fn send_with_retry<F>(
    build_request: F,
    timeout: Option<Duration>,
    config: &RetryConfig,
) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let idempotency_key = generate_idempotency_key();
    let mut retry_count = 0u32;

    loop {
        let last_attempt = retry_count >= config.max_retries;
        let request = add_retry_headers(build_request(), retry_count, &idempotency_key, timeout);

        let delay = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return RetryOutcome::Success(response);
                }
                if last_attempt || !should_retry(status, response.headers()) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = calculate_retry_delay(retry_count, config, Some(response.headers()));
                tracing::debug!(
                    status = %status,
                    retry_count = retry_count + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after error status"
                );
                delay
            }
            Err(e) if !is_retryable_error(&e) => {
                if retry_count == 0 {
                    return RetryOutcome::NonRetryable(e);
                }
                return RetryOutcome::ConnectionError {
                    attempts: retry_count + 1,
                    source: e,
                };
            }
            Err(e) => {
                if last_attempt {
                    return RetryOutcome::ConnectionError {
                        attempts: retry_count + 1,
                        source: e,
                    };
                }
                let delay = calculate_retry_delay(retry_count, config, None);
                tracing::debug!(
                    error = %e,
                    retry_count = retry_count + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after connection error"
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
        retry_count += 1;
    }
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}
