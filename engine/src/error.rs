//! Error taxonomy for a run.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`GatewayError::Transient`] | gateway | retried at the call boundary |
//! | [`MalformedOutput`] | parser | retried with a per-role counter |
//! | [`DependencyError`] | store | lineage dropped, never retried |
//! | [`EngineError`] | controller | run aborted without a report |
//!
//! Budget exhaustion is not an error: it ends the run with
//! [`TerminationReason::Exhausted`](lemmaloop_types::TerminationReason).

use lemmaloop_providers::GatewayError;
use lemmaloop_types::{LemmaId, Role};
use thiserror::Error;

use crate::state::Node;

/// The parser could not extract the fields a role must produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {role} output: {reason}")]
pub struct MalformedOutput {
    pub role: Role,
    pub reason: String,
}

impl MalformedOutput {
    pub(crate) fn new(role: Role, reason: impl Into<String>) -> Self {
        Self {
            role,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("dependency {missing} is not an accepted lemma")]
    Unknown { missing: LemmaId },
    #[error("lemma {id} depends on {dependency}, which was not accepted before it")]
    NotEarlier { id: LemmaId, dependency: LemmaId },
    #[error("lemma ids must be strictly increasing: {id} follows {previous}")]
    OutOfOrder { id: LemmaId, previous: LemmaId },
    #[error("lemma {id} is already stored")]
    Duplicate { id: LemmaId },
    #[error("no lemma id left after {last}")]
    IdSpaceExhausted { last: LemmaId },
}

/// Conditions that end a run without a report.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("{role} call failed: {source}")]
    Gateway {
        role: Role,
        #[source]
        source: GatewayError,
    },
    #[error("{role} call still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        role: Role,
        attempts: u32,
        #[source]
        source: GatewayError,
    },
    #[error("{role} output malformed {attempts} times in a row: {last}")]
    MalformedExhausted {
        role: Role,
        attempts: u32,
        last: MalformedOutput,
    },
    #[error("no candidate in flight while {node}")]
    MissingCandidate { node: Node },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run aborted: {0}")]
    Fatal(#[from] FatalError),
    #[error("invalid initial memory: {0}")]
    Memory(#[from] DependencyError),
}

impl EngineError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}
