//! Per-role extraction of structured fields from reasoning-service output.
//!
//! | Role | Fields |
//! |------|--------|
//! | propose | exactly one of `<conjecture>` / `<final_conjecture>`, `<proof>`, optional `<dependency>` |
//! | verify | `\boxed{valid}` or `\boxed{invalid}`; the rest of the text is the rationale |
//! | refine | `\begin{conjecture}`, `\begin{proof}`, optional `<dependency>`; or `\boxed{false}` |
//! | evaluate | last of `[[VERDICT:CORRECT]]` / `[[VERDICT:INCORRECT]]` |
//!
//! A delimited field must appear at most once with its opening marker before
//! its closing marker. Nothing is repaired: any deviation is a
//! [`MalformedOutput`].

use lemmaloop_types::{
    Candidate, CandidateKind, LemmaId, NonEmptyString, Role, VerificationAttempt,
};

use crate::error::MalformedOutput;

/// A field enclosed by an opening and a closing marker.
#[derive(Debug, Clone, Copy)]
pub struct Delimited {
    pub open: &'static str,
    pub close: &'static str,
}

impl Delimited {
    const fn new(open: &'static str, close: &'static str) -> Self {
        Self { open, close }
    }

    /// Content between the markers, `Ok(None)` when neither marker is present.
    fn extract<'t>(&self, text: &'t str) -> Result<Option<&'t str>, String> {
        let opens = text.matches(self.open).count();
        let closes = text.matches(self.close).count();
        match (opens, closes) {
            (0, 0) => return Ok(None),
            (1, 1) => {}
            _ => {
                return Err(format!(
                    "{} / {} must appear exactly once (found {opens} / {closes})",
                    self.open, self.close
                ));
            }
        }

        let (Some(begin), Some(end)) = (text.find(self.open), text.find(self.close)) else {
            return Ok(None);
        };
        let start = begin + self.open.len();
        if start > end {
            return Err(format!("{} closes before it opens", self.open));
        }
        Ok(Some(&text[start..end]))
    }

    fn require<'t>(&self, text: &'t str) -> Result<&'t str, String> {
        self.extract(text)?
            .ok_or_else(|| format!("missing {}", self.open))
    }
}

pub const CONJECTURE: Delimited = Delimited::new("<conjecture>", "</conjecture>");
pub const FINAL_CONJECTURE: Delimited = Delimited::new("<final_conjecture>", "</final_conjecture>");
pub const PROOF: Delimited = Delimited::new("<proof>", "</proof>");
pub const DEPENDENCY: Delimited = Delimited::new("<dependency>", "</dependency>");

pub const REFINED_CONJECTURE: Delimited =
    Delimited::new(r"\begin{conjecture}", r"\end{conjecture}");
pub const REFINED_PROOF: Delimited = Delimited::new(r"\begin{proof}", r"\end{proof}");

pub const VERDICT_VALID: &str = r"\boxed{valid}";
pub const VERDICT_INVALID: &str = r"\boxed{invalid}";
pub const VERDICT_FALSE: &str = r"\boxed{false}";

pub const EVAL_CORRECT: &str = "[[VERDICT:CORRECT]]";
pub const EVAL_INCORRECT: &str = "[[VERDICT:INCORRECT]]";

/// One parser per role, each with its own field schema.
pub trait RoleParser {
    type Output;

    const ROLE: Role;

    fn parse(&self, text: &str) -> Result<Self::Output, MalformedOutput>;

    fn malformed(reason: impl Into<String>) -> MalformedOutput {
        MalformedOutput::new(Self::ROLE, reason)
    }
}

fn field(role: Role, name: &str, raw: &str) -> Result<NonEmptyString, MalformedOutput> {
    NonEmptyString::trimmed(raw).map_err(|_| MalformedOutput::new(role, format!("empty {name}")))
}

/// Parse an optional `<dependency>` field: a JSON array of ids the caller
/// considers valid.
fn dependencies(
    role: Role,
    text: &str,
    known: &impl Fn(LemmaId) -> bool,
) -> Result<Option<Vec<LemmaId>>, MalformedOutput> {
    let Some(raw) = DEPENDENCY
        .extract(text)
        .map_err(|reason| MalformedOutput::new(role, reason))?
    else {
        return Ok(None);
    };

    let ids: Vec<u64> = serde_json::from_str(raw.trim()).map_err(|e| {
        MalformedOutput::new(
            role,
            format!("<dependency> is not a JSON array of integers: {e}"),
        )
    })?;

    let ids: Vec<LemmaId> = ids.into_iter().map(LemmaId::new).collect();
    if let Some(unknown) = ids.iter().find(|id| !known(**id)) {
        return Err(MalformedOutput::new(
            role,
            format!("<dependency> references unknown lemma {unknown}"),
        ));
    }
    Ok(Some(ids))
}

// ============================================================================
// Propose
// ============================================================================

pub struct ProposeParser<F> {
    known: F,
}

impl<F: Fn(LemmaId) -> bool> ProposeParser<F> {
    /// `known` decides which dependency ids may be referenced.
    pub fn new(known: F) -> Self {
        Self { known }
    }
}

impl<F: Fn(LemmaId) -> bool> RoleParser for ProposeParser<F> {
    type Output = Candidate;

    const ROLE: Role = Role::Propose;

    fn parse(&self, text: &str) -> Result<Candidate, MalformedOutput> {
        let intermediate = CONJECTURE.extract(text).map_err(Self::malformed)?;
        let last = FINAL_CONJECTURE.extract(text).map_err(Self::malformed)?;

        let (statement, kind) = match (intermediate, last) {
            (Some(s), None) => (s, CandidateKind::Intermediate),
            (None, Some(s)) => (s, CandidateKind::Final),
            (Some(_), Some(_)) => {
                return Err(Self::malformed(
                    "both <conjecture> and <final_conjecture> present",
                ));
            }
            (None, None) => {
                return Err(Self::malformed(
                    "missing <conjecture> or <final_conjecture>",
                ));
            }
        };

        let proof = PROOF.require(text).map_err(Self::malformed)?;
        let deps = dependencies(Self::ROLE, text, &self.known)?.unwrap_or_default();

        Ok(Candidate::new(
            field(Self::ROLE, "statement", statement)?,
            field(Self::ROLE, "proof", proof)?,
            deps,
            kind,
        ))
    }
}

// ============================================================================
// Verify
// ============================================================================

pub struct VerifyParser;

impl RoleParser for VerifyParser {
    type Output = VerificationAttempt;

    const ROLE: Role = Role::Verify;

    fn parse(&self, text: &str) -> Result<VerificationAttempt, MalformedOutput> {
        let valid = text.contains(VERDICT_VALID);
        let invalid = text.contains(VERDICT_INVALID);
        let rationale = text
            .replace(VERDICT_VALID, "")
            .replace(VERDICT_INVALID, "")
            .trim()
            .to_string();

        match (valid, invalid) {
            (true, false) => Ok(VerificationAttempt::valid(rationale)),
            (false, true) => Ok(VerificationAttempt::invalid(rationale)),
            (true, true) => Err(Self::malformed("conflicting verdicts")),
            (false, false) => Err(Self::malformed("no verdict")),
        }
    }
}

// ============================================================================
// Refine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefineOutcome {
    Refined {
        statement: NonEmptyString,
        proof: NonEmptyString,
        /// `None` keeps the candidate's previous dependencies.
        dependencies: Option<Vec<LemmaId>>,
    },
    /// The service declared the claim false; the lineage cannot be saved.
    Disproved { rationale: String },
}

pub struct RefineParser<F> {
    known: F,
}

impl<F: Fn(LemmaId) -> bool> RefineParser<F> {
    pub fn new(known: F) -> Self {
        Self { known }
    }
}

impl<F: Fn(LemmaId) -> bool> RoleParser for RefineParser<F> {
    type Output = RefineOutcome;

    const ROLE: Role = Role::Refine;

    fn parse(&self, text: &str) -> Result<RefineOutcome, MalformedOutput> {
        let statement = REFINED_CONJECTURE.extract(text).map_err(Self::malformed)?;

        if text.contains(VERDICT_FALSE) {
            if statement.is_some() {
                return Err(Self::malformed(
                    "declares the claim false and also refines it",
                ));
            }
            let rationale = text.replace(VERDICT_FALSE, "").trim().to_string();
            return Ok(RefineOutcome::Disproved { rationale });
        }

        let statement = statement
            .ok_or_else(|| Self::malformed(format!("missing {}", REFINED_CONJECTURE.open)))?;
        let proof = REFINED_PROOF.require(text).map_err(Self::malformed)?;

        Ok(RefineOutcome::Refined {
            statement: field(Self::ROLE, "statement", statement)?,
            proof: field(Self::ROLE, "proof", proof)?,
            dependencies: dependencies(Self::ROLE, text, &self.known)?,
        })
    }
}

// ============================================================================
// Evaluate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Correct,
    Incorrect,
}

pub struct EvaluateParser;

impl RoleParser for EvaluateParser {
    type Output = Evaluation;

    const ROLE: Role = Role::Evaluate;

    fn parse(&self, text: &str) -> Result<Evaluation, MalformedOutput> {
        match (text.rfind(EVAL_CORRECT), text.rfind(EVAL_INCORRECT)) {
            (Some(c), Some(i)) if c > i => Ok(Evaluation::Correct),
            (Some(_), Some(_)) | (None, Some(_)) => Ok(Evaluation::Incorrect),
            (Some(_), None) => Ok(Evaluation::Correct),
            (None, None) => Err(Self::malformed("no verdict token")),
        }
    }
}
