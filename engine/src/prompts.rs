//! Role input rendering.
//!
//! Templates use `{name}` placeholders that are substituted in a single pass,
//! so braces inside substituted text (LaTeX, JSON) are never re-expanded and
//! unknown names such as `\boxed{valid}` are left untouched.

use lemmaloop_types::{Candidate, Lemma};

const PROPOSE_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/propose.md"));
const VERIFY_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/verify.md"));
const REFINE_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/refine.md"));
const EVALUATE_TEMPLATE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/evaluate.md"));

const CONTEXT_HEADER: &str = "## Context and History Explorations\n\n\
Here is a list of lemmas that we have collected for this problem or our history findings \
during exploration. They serve as the background of the conjecture and proof and can be \
accepted without controversy as correct.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub propose: String,
    pub verify: String,
    pub refine: String,
    pub evaluate: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            propose: PROPOSE_TEMPLATE.to_string(),
            verify: VERIFY_TEMPLATE.to_string(),
            refine: REFINE_TEMPLATE.to_string(),
            evaluate: EVALUATE_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    #[must_use]
    pub fn render_propose(
        &self,
        problem: &str,
        context: &[&Lemma],
        remaining: u32,
        hint: Option<&str>,
    ) -> String {
        let remaining = remaining.to_string();
        let context = render_context(context);
        let mut prompt = fill(
            &self.propose,
            &[
                ("problem_content", problem),
                ("remaining_lemma_quota", remaining.as_str()),
                ("context_content", context.as_str()),
            ],
        );
        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(hint);
        }
        prompt
    }

    #[must_use]
    pub fn render_verify(&self, candidate: &Candidate, context: &[&Lemma]) -> String {
        let context = render_context(context);
        fill(
            &self.verify,
            &[
                ("conjecture_content", candidate.statement().as_str()),
                ("proof_content", candidate.proof().as_str()),
                ("context_content", context.as_str()),
            ],
        )
    }

    #[must_use]
    pub fn render_refine(&self, candidate: &Candidate, feedback: &str, context: &[&Lemma]) -> String {
        let context = render_context(context);
        fill(
            &self.refine,
            &[
                ("conjecture_content", candidate.statement().as_str()),
                ("proof_content", candidate.proof().as_str()),
                ("review_content", feedback),
                ("context_content", context.as_str()),
            ],
        )
    }

    #[must_use]
    pub fn render_evaluate(&self, problem: &str, gold: &str, candidate: &str) -> String {
        fill(
            &self.evaluate,
            &[
                ("problem_content", problem),
                ("gold_content", gold),
                ("candidate_content", candidate),
            ],
        )
    }
}

/// Lemmas listed under their store ids so `<dependency>` can reference them.
fn render_context(lemmas: &[&Lemma]) -> String {
    if lemmas.is_empty() {
        return String::new();
    }
    let mut out = String::from(CONTEXT_HEADER);
    out.push_str("\n<memory>\n");
    for lemma in lemmas {
        out.push_str(&format!(" ** Lemma-{} **\n {}\n", lemma.id(), lemma.statement()));
    }
    out.push_str("</memory>");
    out
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replacement = after.find('}').and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (end, *value))
        });
        match replacement {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
