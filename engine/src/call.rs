//! Gateway calls with a deadline and bounded retry of transient failures.

use std::time::Duration;

use lemmaloop_providers::retry::{RetryConfig, calculate_retry_delay};
use lemmaloop_providers::{Gateway, GatewayError, GatewayRequest};
use lemmaloop_types::Role;

use crate::error::FatalError;

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 1800;

/// How one role call is bounded.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Retries after the first attempt for transient failures.
    pub retries: u32,
    /// Deadline for one attempt, including the whole response stream.
    pub timeout: Duration,
    pub streaming: bool,
    /// Delay schedule between attempts. `max_retries` is ignored.
    pub backoff: RetryConfig,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            streaming: true,
            backoff: RetryConfig {
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                ..RetryConfig::default()
            },
        }
    }
}

/// Call `role` until it answers, a fatal error occurs, or the retries run out.
///
/// Each attempt is a fresh request; nothing from a failed attempt is reused.
pub async fn call_with_retry<G: Gateway>(
    gateway: &G,
    policy: &CallPolicy,
    role: Role,
    input: &str,
) -> Result<String, FatalError> {
    let request = GatewayRequest::new(role, input).with_streaming(policy.streaming);
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(policy.timeout, gateway.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transient(format!(
                "no answer within {:?}",
                policy.timeout
            ))),
        };

        match result {
            Ok(text) => return Ok(text),
            Err(source @ GatewayError::Fatal(_)) => {
                return Err(FatalError::Gateway { role, source });
            }
            Err(source) if attempt >= policy.retries => {
                return Err(FatalError::RetriesExhausted {
                    role,
                    attempts: attempt + 1,
                    source,
                });
            }
            Err(source) => {
                let delay = calculate_retry_delay(attempt, &policy.backoff, None);
                tracing::warn!(
                    role = %role,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    error = %source,
                    "Retrying gateway call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
