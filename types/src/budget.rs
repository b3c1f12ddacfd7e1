//! Run budget invariant types.
//!
//! These types guarantee valid quota configurations by construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("verification scaling factor must be at least 1")]
    ZeroScalingFactor,
}

/// Number of independent verification attempts per candidate.
///
/// Zero attempts would make every candidate vacuously valid under a
/// unanimous policy, so it is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ScalingFactor(u32);

impl ScalingFactor {
    pub const SINGLE: ScalingFactor = ScalingFactor(1);

    pub fn new(attempts: u32) -> Result<Self, BudgetError> {
        if attempts == 0 {
            return Err(BudgetError::ZeroScalingFactor);
        }
        Ok(Self(attempts))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ScalingFactor {
    type Error = BudgetError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScalingFactor> for u32 {
    fn from(value: ScalingFactor) -> Self {
        value.0
    }
}

/// All quota and retry limits for one run.
///
/// Retry budgets count *retries*, not attempts: a budget of 2 allows the
/// initial attempt plus two more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    /// Maximum lemmas accepted during one run.
    pub lemma_budget: u32,
    /// Independent verification attempts per candidate.
    pub verification_scaling: ScalingFactor,
    /// Verify/refine cycles allowed for one lineage.
    pub verify_refine_rounds: u32,
    /// Retries for malformed refine output within one refine attempt.
    pub refiner_retries: u32,
    /// Retries for malformed propose output within one propose round.
    pub propose_retries: u32,
    /// Retries for transient gateway failures within one call.
    pub call_retries: u32,
    /// Propose rounds allowed for the whole run.
    pub solver_rounds: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            lemma_budget: 10,
            verification_scaling: ScalingFactor(3),
            verify_refine_rounds: 3,
            refiner_retries: 3,
            propose_retries: 3,
            call_retries: 3,
            solver_rounds: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_factor_rejects_zero() {
        assert_eq!(ScalingFactor::new(0), Err(BudgetError::ZeroScalingFactor));
        assert_eq!(ScalingFactor::new(4).map(ScalingFactor::get), Ok(4));
    }

    #[test]
    fn budgets_deserialize_with_defaults() {
        let budgets: Budgets =
            serde_json::from_str(r#"{"lemma_budget": 2, "verification_scaling": 5}"#).unwrap();
        assert_eq!(budgets.lemma_budget, 2);
        assert_eq!(budgets.verification_scaling.get(), 5);
        assert_eq!(budgets.verify_refine_rounds, Budgets::default().verify_refine_rounds);
    }

    #[test]
    fn budgets_reject_zero_scaling_on_deserialize() {
        let parsed: Result<Budgets, _> = serde_json::from_str(r#"{"verification_scaling": 0}"#);
        assert!(parsed.is_err());
    }
}
