//! Workflow state machine.
//!
//! ```text
//!              BudgetExhausted
//!   Solving ─────────────────────────────────────────────┐
//!     │  ▲ ▲                                             │
//!     │  │ └─ Committed(intermediate) / DropLineage ─┐   │
//!     │  │                                           │   │
//!  Proposed                                          │   ▼
//!     │  └── ProposeMalformed (retry)          Summarizing ──► Done
//!     ▼                                              ▲
//!   Verifying ─── Committed(final) ──────────────────┘
//!     │   ▲
//!  Rejected  Refined
//!     ▼   │
//!   Refining ◄── RefineMalformed (retry)
//! ```
//!
//! [`WorkflowState::advance`] is pure: the controller performs one effectful
//! step, describes its result as an [`Outcome`], and the state decides the
//! next node. Every counter lives here so budgets can be tested without a
//! gateway.

use std::fmt;

use lemmaloop_types::{Budgets, CandidateKind, LemmaId, Role, RunStats};

use crate::error::{FatalError, MalformedOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Node {
    #[default]
    Solving,
    Verifying,
    Refining,
    Summarizing,
    Done,
}

impl Node {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Node::Solving => "solving",
            Node::Verifying => "verifying",
            Node::Refining => "refining",
            Node::Summarizing => "summarizing",
            Node::Done => "done",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the effectful step performed in the current node.
#[derive(Debug)]
pub enum Outcome {
    /// Lemma or solver-round budget is used up; no propose call was made.
    BudgetExhausted,
    Proposed,
    ProposeMalformed(MalformedOutput),
    Committed { id: LemmaId, kind: CandidateKind },
    /// The store refused the verified candidate.
    CommitFailed,
    Rejected,
    Refined,
    RefineMalformed(MalformedOutput),
    /// The refine role declared the candidate false.
    Disproved,
    Summarized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    VerifyRefineExhausted,
    RefinerRetriesExhausted,
    Disproved,
    DependencyRejected,
}

impl DropReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DropReason::VerifyRefineExhausted => "verify_refine_exhausted",
            DropReason::RefinerRetriesExhausted => "refiner_retries_exhausted",
            DropReason::Disproved => "disproved",
            DropReason::DependencyRejected => "dependency_rejected",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum Transition {
    To(Node),
    /// The current lineage is discarded and control returns to Solving.
    DropLineage(DropReason),
    Abort(FatalError),
}

/// Counters and position of one run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    node: Node,
    solver_rounds: u32,
    verify_refine_rounds: u32,
    refiner_retries: u32,
    propose_retries: u32,
    accepted: u32,
    terminal: Option<LemmaId>,
    dropped_lineages: u32,
    verification_attempts: u32,
}

impl WorkflowState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn node(&self) -> Node {
        self.node
    }

    #[must_use]
    pub const fn solver_rounds(&self) -> u32 {
        self.solver_rounds
    }

    #[must_use]
    pub const fn accepted(&self) -> u32 {
        self.accepted
    }

    #[must_use]
    pub const fn terminal(&self) -> Option<LemmaId> {
        self.terminal
    }

    /// Lemmas that may still be accepted in this run.
    #[must_use]
    pub fn remaining_lemmas(&self, budgets: &Budgets) -> u32 {
        budgets.lemma_budget.saturating_sub(self.accepted)
    }

    /// Whether another propose round may start.
    #[must_use]
    pub fn has_budget(&self, budgets: &Budgets) -> bool {
        self.accepted < budgets.lemma_budget && self.solver_rounds < budgets.solver_rounds
    }

    pub fn note_verification(&mut self, attempts: usize) {
        self.verification_attempts = self
            .verification_attempts
            .saturating_add(u32::try_from(attempts).unwrap_or(u32::MAX));
    }

    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            solver_rounds: self.solver_rounds,
            accepted: self.accepted,
            dropped_lineages: self.dropped_lineages,
            verification_attempts: self.verification_attempts,
        }
    }

    /// Apply `outcome` to the counters and move to the next node.
    pub fn advance(&mut self, outcome: Outcome, budgets: &Budgets) -> Transition {
        let transition = match outcome {
            Outcome::BudgetExhausted => Transition::To(Node::Summarizing),
            Outcome::Proposed => {
                self.solver_rounds += 1;
                self.propose_retries = 0;
                self.verify_refine_rounds = 0;
                self.refiner_retries = 0;
                Transition::To(Node::Verifying)
            }
            Outcome::ProposeMalformed(last) => {
                self.propose_retries += 1;
                if self.propose_retries > budgets.propose_retries {
                    Transition::Abort(FatalError::MalformedExhausted {
                        role: Role::Propose,
                        attempts: self.propose_retries,
                        last,
                    })
                } else {
                    Transition::To(Node::Solving)
                }
            }
            Outcome::Committed { id, kind } => {
                self.accepted += 1;
                self.verify_refine_rounds = 0;
                if kind.is_final() {
                    self.terminal = Some(id);
                    Transition::To(Node::Summarizing)
                } else {
                    Transition::To(Node::Solving)
                }
            }
            Outcome::CommitFailed => Transition::DropLineage(DropReason::DependencyRejected),
            Outcome::Rejected => {
                self.verify_refine_rounds += 1;
                if self.verify_refine_rounds > budgets.verify_refine_rounds {
                    Transition::DropLineage(DropReason::VerifyRefineExhausted)
                } else {
                    self.refiner_retries = 0;
                    Transition::To(Node::Refining)
                }
            }
            Outcome::Refined => Transition::To(Node::Verifying),
            Outcome::RefineMalformed(_) => {
                self.refiner_retries += 1;
                if self.refiner_retries > budgets.refiner_retries {
                    Transition::DropLineage(DropReason::RefinerRetriesExhausted)
                } else {
                    Transition::To(Node::Refining)
                }
            }
            Outcome::Disproved => Transition::DropLineage(DropReason::Disproved),
            Outcome::Summarized => Transition::To(Node::Done),
        };

        match &transition {
            Transition::To(node) => self.node = *node,
            Transition::DropLineage(_) => {
                self.dropped_lineages += 1;
                self.node = Node::Solving;
            }
            Transition::Abort(_) => {}
        }
        transition
    }
}
