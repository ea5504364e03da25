//! Single-rule evaluation.
//!
//! Scopes a diff to one rule, asks the generation service for a verdict,
//! and degrades every failure to a not-relevant verdict. Nothing here
//! returns an error.

use std::sync::Arc;
use std::time::Duration;

use threadline_core::{Outcome, RuleDocument, Verdict};
use threadline_difflens::parser::filter_by_files;
use threadline_difflens::pattern::PatternSet;

use crate::llm::{GenerationRequest, GenerationService};
use crate::prompt::{build_system_instruction, build_user_prompt, parse_verdict_response};

/// Reasoning attached to rules whose patterns match no touched file.
pub const NO_FILES_MATCH: &str = "no files match";

/// A verdict plus how it came about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// The verdict for the rule.
    pub verdict: Verdict,
    /// Settlement kind, used for the check counters.
    pub kind: Outcome,
}

impl Evaluation {
    fn completed(verdict: Verdict) -> Self {
        Self {
            verdict: verdict.with_outcome(Outcome::Completed),
            kind: Outcome::Completed,
        }
    }

    /// An evaluation that failed with `reason`.
    pub fn errored(rule_id: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::not_relevant(rule_id, reason).with_outcome(Outcome::Errored),
            kind: Outcome::Errored,
        }
    }

    /// An evaluation abandoned after `budget`.
    pub fn timed_out(rule_id: &str, budget: Duration) -> Self {
        Self {
            verdict: Verdict::not_relevant(
                rule_id,
                format!("evaluation timed out after {}s", budget.as_secs_f64()),
            )
            .with_outcome(Outcome::TimedOut),
            kind: Outcome::TimedOut,
        }
    }
}

/// Evaluates one rule against one diff.
///
/// Cheap to clone; clones share the generation service.
#[derive(Clone)]
pub struct RuleEvaluator {
    service: Arc<dyn GenerationService>,
}

impl RuleEvaluator {
    /// Create an evaluator backed by `service`.
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    /// Evaluate `rule` against `diff`, whose touched files are `touched`.
    ///
    /// A rule with no in-scope files gets a not-relevant verdict without
    /// calling the service. Service and parse failures become errored
    /// not-relevant verdicts carrying the error message.
    pub async fn evaluate(&self, rule: &RuleDocument, diff: &str, touched: &[String]) -> Evaluation {
        let patterns = PatternSet::new(&rule.patterns);
        if !patterns.invalid().is_empty() {
            tracing::warn!(rule = %rule.id, invalid = ?patterns.invalid(), "ignoring invalid patterns");
        }

        let in_scope = patterns.in_scope(touched);
        if in_scope.is_empty() {
            tracing::debug!(rule = %rule.id, "no files in scope");
            return Evaluation::completed(Verdict::not_relevant(&rule.id, NO_FILES_MATCH));
        }

        let scoped_diff = filter_by_files(diff, &in_scope);
        let request = GenerationRequest {
            system_instruction: build_system_instruction(),
            user_prompt: build_user_prompt(rule, &scoped_diff, &in_scope),
        };

        let response = match self.service.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(rule = %rule.id, error = %e, "generation failed");
                return Evaluation::errored(&rule.id, format!("evaluation failed: {e}"));
            }
        };

        let parsed = match parse_verdict_response(&response) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(rule = %rule.id, error = %e, "malformed verdict");
                return Evaluation::errored(&rule.id, format!("malformed verdict: {e}"));
            }
        };

        let file_references =
            ground_references(&parsed.file_references, parsed.reasoning.as_deref(), &in_scope);
        tracing::debug!(rule = %rule.id, status = %parsed.status, "rule evaluated");

        Evaluation::completed(Verdict {
            rule_id: rule.id.clone(),
            status: parsed.status,
            reasoning: parsed.reasoning,
            file_references,
            line_references: parsed.line_references,
            outcome: Outcome::Completed,
        })
    }
}

/// Pick the in-scope files a verdict rests on: those the response cites
/// explicitly, else those its reasoning names, else all of them.
fn ground_references(cited: &[String], reasoning: Option<&str>, in_scope: &[String]) -> Vec<String> {
    let explicit: Vec<String> = in_scope
        .iter()
        .filter(|file| {
            cited
                .iter()
                .any(|c| c.trim_start_matches("./") == file.as_str())
        })
        .cloned()
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }

    if let Some(text) = reasoning {
        let mentioned: Vec<String> = in_scope
            .iter()
            .filter(|file| text.contains(file.as_str()))
            .cloned()
            .collect();
        if !mentioned.is_empty() {
            return mentioned;
        }
    }

    in_scope.to_vec()
}
