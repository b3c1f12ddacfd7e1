//! The round controller: one sequential async state machine per run.

use std::sync::Arc;

use chrono::Utc;
use lemmaloop_providers::Gateway;
use lemmaloop_types::{
    Budgets, Candidate, FinalReport, Lemma, ReportEntry, Role, TerminationReason,
    VerificationVerdict,
};

use crate::aggregator::{ReductionPolicy, Unanimous, VerificationAggregator};
use crate::call::{CallPolicy, call_with_retry};
use crate::error::{EngineError, FatalError};
use crate::parser::{ProposeParser, RefineOutcome, RefineParser, RoleParser};
use crate::prompts::PromptTemplates;
use crate::state::{Node, Outcome, Transition, WorkflowState};
use crate::store::LemmaStore;

/// Everything a run needs besides the gateway.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub budgets: Budgets,
    pub calls: CallPolicy,
    pub policy: Arc<dyn ReductionPolicy>,
    pub templates: PromptTemplates,
    /// Free text appended to every propose input.
    pub hint: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            budgets: Budgets::default(),
            calls: CallPolicy::default(),
            policy: Arc::new(Unanimous),
            templates: PromptTemplates::default(),
            hint: None,
        }
    }
}

impl EngineSettings {
    /// Call policy with the retry count taken from the budgets.
    #[must_use]
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            retries: self.budgets.call_retries,
            ..self.calls.clone()
        }
    }
}

/// The candidate being verified or refined, with the latest rejection.
#[derive(Debug)]
struct Lineage {
    candidate: Candidate,
    feedback: String,
}

pub struct RoundController<'a, G> {
    gateway: &'a G,
    settings: &'a EngineSettings,
    calls: CallPolicy,
}

impl<'a, G: Gateway> RoundController<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a EngineSettings) -> Self {
        Self {
            gateway,
            settings,
            calls: settings.call_policy(),
        }
    }

    /// Drive one run from Solving to Done.
    ///
    /// `initial_memory` seeds the store; the lemma budget only counts lemmas
    /// accepted during this run.
    pub async fn run(&self, problem: &str, initial_memory: Vec<Lemma>) -> Result<FinalReport, EngineError> {
        let budgets = &self.settings.budgets;
        let mut store = LemmaStore::seed(initial_memory)?;
        let mut state = WorkflowState::new();
        let mut lineage: Option<Lineage> = None;

        tracing::info!(
            event = "run_started",
            seeded = store.len(),
            lemma_budget = budgets.lemma_budget,
            solver_rounds = budgets.solver_rounds,
            scaling = budgets.verification_scaling.get(),
            "Run started"
        );

        while state.node() != Node::Summarizing {
            let node = state.node();
            let outcome = match node {
                Node::Solving => self.solve(problem, &store, &state, &mut lineage).await?,
                Node::Verifying => self.verify(&mut store, &mut state, &mut lineage).await?,
                Node::Refining => self.refine(&store, &mut lineage).await?,
                Node::Summarizing | Node::Done => break,
            };

            match state.advance(outcome, budgets) {
                Transition::To(next) => {
                    tracing::debug!(event = node.as_str(), next = %next, "Transition");
                }
                Transition::DropLineage(reason) => {
                    lineage = None;
                    tracing::info!(
                        event = "lineage_dropped",
                        from = node.as_str(),
                        reason = %reason,
                        round = state.solver_rounds(),
                        "Lineage dropped"
                    );
                }
                Transition::Abort(err) => {
                    tracing::error!(event = "aborted", from = node.as_str(), error = %err, "Run aborted");
                    return Err(err.into());
                }
            }
        }

        let report = summarize(problem, &store, &state);
        state.advance(Outcome::Summarized, budgets);
        tracing::info!(
            event = "summarizing",
            termination = report.termination.as_str(),
            lemmas = report.lemmas.len(),
            accepted = state.accepted(),
            rounds = state.solver_rounds(),
            "Run finished"
        );
        Ok(report)
    }

    async fn solve(
        &self,
        problem: &str,
        store: &LemmaStore,
        state: &WorkflowState,
        lineage: &mut Option<Lineage>,
    ) -> Result<Outcome, FatalError> {
        let budgets = &self.settings.budgets;
        if !state.has_budget(budgets) {
            return Ok(Outcome::BudgetExhausted);
        }

        let input = self.settings.templates.render_propose(
            problem,
            &store.full_path(),
            state.remaining_lemmas(budgets),
            self.settings.hint.as_deref(),
        );
        let text = call_with_retry(self.gateway, &self.calls, Role::Propose, &input).await?;

        match ProposeParser::new(|id| store.contains(id)).parse(&text) {
            Ok(candidate) => {
                tracing::info!(
                    event = "solving",
                    round = state.solver_rounds() + 1,
                    kind = ?candidate.kind(),
                    dependencies = candidate.dependencies().len(),
                    "Candidate proposed"
                );
                *lineage = Some(Lineage {
                    candidate,
                    feedback: String::new(),
                });
                Ok(Outcome::Proposed)
            }
            Err(malformed) => {
                tracing::warn!(event = "solving", error = %malformed, "Propose output malformed");
                Ok(Outcome::ProposeMalformed(malformed))
            }
        }
    }

    async fn verify(
        &self,
        store: &mut LemmaStore,
        state: &mut WorkflowState,
        lineage: &mut Option<Lineage>,
    ) -> Result<Outcome, FatalError> {
        let current = lineage.as_mut().ok_or(FatalError::MissingCandidate {
            node: Node::Verifying,
        })?;

        let input = self.settings.templates.render_verify(
            &current.candidate,
            &store.transitive_closure(current.candidate.dependencies()),
        );
        let aggregator = VerificationAggregator::new(
            self.gateway,
            &self.calls,
            self.settings.policy.as_ref(),
            self.settings.budgets.verification_scaling,
        );
        let (verdict, attempts) = aggregator.verify(&input).await?;
        state.note_verification(attempts.len());

        match verdict {
            VerificationVerdict::Accepted => {
                let Some(Lineage { candidate, .. }) = lineage.take() else {
                    return Err(FatalError::MissingCandidate {
                        node: Node::Verifying,
                    });
                };
                let kind = candidate.kind();
                match store.accept(candidate, state.solver_rounds()) {
                    Ok(lemma) => {
                        tracing::info!(
                            event = "verifying",
                            lemma_id = %lemma.id(),
                            kind = ?kind,
                            "Lemma committed"
                        );
                        Ok(Outcome::Committed {
                            id: lemma.id(),
                            kind,
                        })
                    }
                    Err(err) => {
                        tracing::warn!(event = "verifying", error = %err, "Commit refused");
                        Ok(Outcome::CommitFailed)
                    }
                }
            }
            VerificationVerdict::Rejected { feedback } => {
                tracing::info!(event = "verifying", "Candidate rejected");
                current.feedback = feedback;
                Ok(Outcome::Rejected)
            }
        }
    }

    async fn refine(&self, store: &LemmaStore, lineage: &mut Option<Lineage>) -> Result<Outcome, FatalError> {
        let current = lineage.as_mut().ok_or(FatalError::MissingCandidate {
            node: Node::Refining,
        })?;

        let input = self.settings.templates.render_refine(
            &current.candidate,
            &current.feedback,
            &store.transitive_closure(current.candidate.dependencies()),
        );
        let text = call_with_retry(self.gateway, &self.calls, Role::Refine, &input).await?;

        match RefineParser::new(|id| store.contains(id)).parse(&text) {
            Ok(RefineOutcome::Refined {
                statement,
                proof,
                dependencies,
            }) => {
                let Some(previous) = lineage.take() else {
                    return Err(FatalError::MissingCandidate {
                        node: Node::Refining,
                    });
                };
                *lineage = Some(Lineage {
                    candidate: previous.candidate.refined(statement, proof, dependencies),
                    feedback: String::new(),
                });
                tracing::info!(event = "refining", "Candidate refined");
                Ok(Outcome::Refined)
            }
            Ok(RefineOutcome::Disproved { rationale }) => {
                tracing::info!(event = "refining", rationale = %rationale, "Candidate declared false");
                Ok(Outcome::Disproved)
            }
            Err(malformed) => {
                tracing::warn!(event = "refining", error = %malformed, "Refine output malformed");
                Ok(Outcome::RefineMalformed(malformed))
            }
        }
    }
}

/// Build the report from the terminal lemma's path, or from every accepted
/// lemma when the run exhausted its budgets.
fn summarize(problem: &str, store: &LemmaStore, state: &WorkflowState) -> FinalReport {
    let (termination, path) = match state.terminal() {
        Some(id) => (TerminationReason::Solved, store.path_from(id)),
        None => (TerminationReason::Exhausted, store.full_path()),
    };
    FinalReport {
        problem: problem.to_string(),
        termination,
        terminal: state.terminal(),
        lemmas: path.into_iter().map(ReportEntry::from).collect(),
        stats: state.stats(),
        generated_at: Utc::now(),
    }
}
