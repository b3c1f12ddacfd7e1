//! Test-time scaling for verification.
//!
//! N independent verify calls run concurrently against the same input, are
//! joined, and are reduced to one [`VerificationVerdict`] by a
//! [`ReductionPolicy`]. Output that cannot be parsed into a verdict counts as
//! an invalid attempt.

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use lemmaloop_providers::Gateway;
use lemmaloop_types::{Role, ScalingFactor, Verdict, VerificationAttempt, VerificationVerdict};
use serde::{Deserialize, Serialize};

use crate::call::{CallPolicy, call_with_retry};
use crate::error::FatalError;
use crate::parser::{RoleParser, VerifyParser};

/// Decides whether a set of attempts accepts the candidate.
pub trait ReductionPolicy: fmt::Debug + Send + Sync {
    fn accepts(&self, attempts: &[VerificationAttempt]) -> bool;

    fn name(&self) -> &'static str;
}

/// Valid iff every attempt is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unanimous;

impl ReductionPolicy for Unanimous {
    fn accepts(&self, attempts: &[VerificationAttempt]) -> bool {
        !attempts.is_empty() && attempts.iter().all(|a| a.verdict == Verdict::Valid)
    }

    fn name(&self) -> &'static str {
        "unanimous"
    }
}

/// Valid iff strictly more than half of the attempts are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Majority;

impl ReductionPolicy for Majority {
    fn accepts(&self, attempts: &[VerificationAttempt]) -> bool {
        let valid = attempts
            .iter()
            .filter(|a| a.verdict == Verdict::Valid)
            .count();
        valid * 2 > attempts.len()
    }

    fn name(&self) -> &'static str {
        "majority"
    }
}

/// Configuration-level selector for the built-in policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Unanimous,
    Majority,
}

impl PolicyKind {
    #[must_use]
    pub fn policy(self) -> Arc<dyn ReductionPolicy> {
        match self {
            PolicyKind::Unanimous => Arc::new(Unanimous),
            PolicyKind::Majority => Arc::new(Majority),
        }
    }
}

const UNPARSABLE: &str = "unparsable verifier output";

/// Reduce attempts to a verdict; feedback joins every invalid rationale in
/// attempt order.
#[must_use]
pub fn reduce(policy: &dyn ReductionPolicy, attempts: &[VerificationAttempt]) -> VerificationVerdict {
    if policy.accepts(attempts) {
        return VerificationVerdict::Accepted;
    }
    let feedback = attempts
        .iter()
        .filter(|a| a.verdict == Verdict::Invalid)
        .map(|a| a.rationale.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    VerificationVerdict::Rejected { feedback }
}

pub struct VerificationAggregator<'a, G> {
    gateway: &'a G,
    calls: &'a CallPolicy,
    policy: &'a dyn ReductionPolicy,
    scaling: ScalingFactor,
}

impl<'a, G: Gateway> VerificationAggregator<'a, G> {
    pub fn new(
        gateway: &'a G,
        calls: &'a CallPolicy,
        policy: &'a dyn ReductionPolicy,
        scaling: ScalingFactor,
    ) -> Self {
        Self {
            gateway,
            calls,
            policy,
            scaling,
        }
    }

    /// Run all attempts against `input` and reduce them.
    ///
    /// A gateway failure that survives call-level retry aborts the whole
    /// verification, since a missing attempt cannot be reduced.
    pub async fn verify(&self, input: &str) -> Result<(VerificationVerdict, Vec<VerificationAttempt>), FatalError> {
        let calls = (0..self.scaling.get()).map(|index| async move {
            let text = call_with_retry(self.gateway, self.calls, Role::Verify, input).await?;
            let attempt = VerifyParser.parse(&text).unwrap_or_else(|e| {
                tracing::warn!(attempt = index, error = %e, "Verifier output unparsable");
                VerificationAttempt::invalid(format!("{UNPARSABLE}: {}", e.reason))
            });
            Ok::<_, FatalError>(attempt)
        });

        let attempts = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let verdict = reduce(self.policy, &attempts);
        tracing::info!(
            attempts = attempts.len(),
            valid = attempts.iter().filter(|a| a.verdict == Verdict::Valid).count(),
            policy = self.policy.name(),
            accepted = verdict.is_accepted(),
            "Verification reduced"
        );
        Ok((verdict, attempts))
    }
}
