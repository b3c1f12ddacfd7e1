//! Final report produced at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CandidateKind, Lemma, LemmaId};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationReason {
    /// A final candidate was verified.
    Solved,
    /// A budget ran out before a final candidate was verified.
    Exhausted,
}

impl TerminationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Solved => "solved",
            TerminationReason::Exhausted => "exhausted",
        }
    }
}

/// One lemma as it appears in the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: LemmaId,
    pub statement: String,
    pub proof: String,
    pub dependencies: Vec<LemmaId>,
    pub kind: CandidateKind,
}

impl From<&Lemma> for ReportEntry {
    fn from(lemma: &Lemma) -> Self {
        Self {
            id: lemma.id(),
            statement: lemma.statement().as_str().to_string(),
            proof: lemma.proof().as_str().to_string(),
            dependencies: lemma.dependencies().to_vec(),
            kind: lemma.kind(),
        }
    }
}

/// Counters observed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub solver_rounds: u32,
    pub accepted: u32,
    pub dropped_lineages: u32,
    pub verification_attempts: u32,
}

/// Dependency-first certificate plus termination reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub problem: String,
    pub termination: TerminationReason,
    /// The verified final lemma, when the run was solved.
    pub terminal: Option<LemmaId>,
    pub lemmas: Vec<ReportEntry>,
    pub stats: RunStats,
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.termination == TerminationReason::Solved
    }

    /// Statement of the terminal lemma, if any.
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        let terminal = self.terminal?;
        self.lemmas
            .iter()
            .find(|entry| entry.id == terminal)
            .map(|entry| entry.statement.as_str())
    }

    /// Render the certificate as plain text, dependency-first.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.lemmas {
            let label = if entry.kind.is_final() { "Theorem" } else { "Lemma" };
            out.push_str(&format!("{label} {}: {}\n", entry.id, entry.statement));
            if !entry.dependencies.is_empty() {
                let deps: Vec<String> = entry.dependencies.iter().map(ToString::to_string).collect();
                out.push_str(&format!("Uses: {}\n", deps.join(", ")));
            }
            out.push_str(&format!("Proof. {}\n\n", entry.proof));
        }
        out
    }
}
