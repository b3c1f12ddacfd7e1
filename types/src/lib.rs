//! Core domain types for lemmaloop.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod budget;
mod ids;
mod proofs;
mod report;

pub use budget::{BudgetError, Budgets, ScalingFactor};
pub use ids::LemmaId;
pub use proofs::{EmptyStringError, NonEmptyString};
pub use report::{FinalReport, ReportEntry, RunStats, TerminationReason};

use serde::{Deserialize, Serialize};

// ============================================================================
// Roles
// ============================================================================

/// Logical role a gateway call is made for.
///
/// Each role may be served by a different model and renders its input from a
/// different template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Propose,
    Verify,
    Refine,
    /// Judges a finished report against a gold answer (benchmarks only).
    Evaluate,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Propose, Role::Verify, Role::Refine, Role::Evaluate];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Propose => "propose",
            Role::Verify => "verify",
            Role::Refine => "refine",
            Role::Evaluate => "evaluate",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Candidates & Lemmas
// ============================================================================

/// Whether a claim is a stepping stone or the answer to the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Intermediate,
    Final,
}

impl CandidateKind {
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, CandidateKind::Final)
    }
}

/// An unverified proposal.
///
/// Dependencies form an ordered set: construction drops repeated ids while
/// keeping the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    statement: NonEmptyString,
    proof: NonEmptyString,
    dependencies: Vec<LemmaId>,
    kind: CandidateKind,
}

impl Candidate {
    #[must_use]
    pub fn new(
        statement: NonEmptyString,
        proof: NonEmptyString,
        dependencies: impl IntoIterator<Item = LemmaId>,
        kind: CandidateKind,
    ) -> Self {
        Self {
            statement,
            proof,
            dependencies: dedup_ids(dependencies),
            kind,
        }
    }

    #[must_use]
    pub fn statement(&self) -> &NonEmptyString {
        &self.statement
    }

    #[must_use]
    pub fn proof(&self) -> &NonEmptyString {
        &self.proof
    }

    #[must_use]
    pub fn dependencies(&self) -> &[LemmaId] {
        &self.dependencies
    }

    #[must_use]
    pub const fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// Replace statement and proof after a refinement, keeping the kind.
    ///
    /// Dependencies are replaced only when the refinement declares its own.
    #[must_use]
    pub fn refined(
        self,
        statement: NonEmptyString,
        proof: NonEmptyString,
        dependencies: Option<Vec<LemmaId>>,
    ) -> Self {
        Self {
            statement,
            proof,
            dependencies: dependencies.map_or(self.dependencies, dedup_ids),
            kind: self.kind,
        }
    }
}

fn dedup_ids(ids: impl IntoIterator<Item = LemmaId>) -> Vec<LemmaId> {
    let mut out: Vec<LemmaId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// An accepted claim. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lemma {
    id: LemmaId,
    statement: NonEmptyString,
    proof: NonEmptyString,
    dependencies: Vec<LemmaId>,
    kind: CandidateKind,
    round: u32,
}

impl Lemma {
    #[must_use]
    pub fn new(id: LemmaId, candidate: Candidate, round: u32) -> Self {
        Self {
            id,
            statement: candidate.statement,
            proof: candidate.proof,
            dependencies: candidate.dependencies,
            kind: candidate.kind,
            round,
        }
    }

    #[must_use]
    pub const fn id(&self) -> LemmaId {
        self.id
    }

    #[must_use]
    pub fn statement(&self) -> &NonEmptyString {
        &self.statement
    }

    #[must_use]
    pub fn proof(&self) -> &NonEmptyString {
        &self.proof
    }

    #[must_use]
    pub fn dependencies(&self) -> &[LemmaId] {
        &self.dependencies
    }

    #[must_use]
    pub const fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// Solver round in which the lemma was accepted.
    #[must_use]
    pub const fn round(&self) -> u32 {
        self.round
    }
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Valid,
    Invalid,
}

/// One verifier's opinion. Consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub verdict: Verdict,
    pub rationale: String,
}

impl VerificationAttempt {
    #[must_use]
    pub fn valid(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Valid,
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub fn invalid(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Invalid,
            rationale: rationale.into(),
        }
    }
}

/// Reduced decision over all attempts for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationVerdict {
    Accepted,
    /// Feedback handed to the refine role.
    Rejected { feedback: String },
}

impl VerificationVerdict {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, VerificationVerdict::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> NonEmptyString {
        NonEmptyString::new(s).unwrap()
    }

    #[test]
    fn candidate_dedups_dependencies_keeping_order() {
        let c = Candidate::new(
            text("s"),
            text("p"),
            [3, 1, 3, 2, 1].map(LemmaId::new),
            CandidateKind::Intermediate,
        );
        assert_eq!(c.dependencies(), &[3, 1, 2].map(LemmaId::new));
    }

    #[test]
    fn refined_keeps_kind_and_optionally_dependencies() {
        let c = Candidate::new(text("s"), text("p"), [LemmaId::new(1)], CandidateKind::Final);
        let kept = c.clone().refined(text("s2"), text("p2"), None);
        assert_eq!(kept.kind(), CandidateKind::Final);
        assert_eq!(kept.dependencies(), &[LemmaId::new(1)]);
        assert_eq!(kept.statement().as_str(), "s2");

        let replaced = c.refined(text("s3"), text("p3"), Some(vec![LemmaId::new(2)]));
        assert_eq!(replaced.dependencies(), &[LemmaId::new(2)]);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Verify).unwrap(), "\"verify\"");
        assert_eq!(Role::Refine.to_string(), "refine");
    }
}
