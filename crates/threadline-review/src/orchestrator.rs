//! Concurrent check orchestration.
//!
//! Dispatches one evaluation per rule, bounds each by a wall-clock budget,
//! waits for every evaluation to settle, and aggregates the verdicts in rule
//! input order.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadline_core::{CheckMetadata, CheckReport, Outcome, RuleDocument};

use crate::evaluator::{Evaluation, RuleEvaluator};
use crate::llm::GenerationService;

/// Default per-rule budget.
pub const DEFAULT_RULE_TIMEOUT: Duration = Duration::from_secs(40);

/// Lifecycle of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    /// Rules accepted, nothing dispatched yet.
    Pending,
    /// Evaluations in flight.
    Running,
    /// Every evaluation settled; counting.
    Aggregating,
    /// Report finalized.
    Done,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckPhase::Pending => write!(f, "PENDING"),
            CheckPhase::Running => write!(f, "RUNNING"),
            CheckPhase::Aggregating => write!(f, "AGGREGATING"),
            CheckPhase::Done => write!(f, "DONE"),
        }
    }
}

/// Runs every rule of a check concurrently against one diff.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use threadline_core::LlmConfig;
/// use threadline_review::llm::LlmClient;
/// use threadline_review::orchestrator::{CheckOrchestrator, DEFAULT_RULE_TIMEOUT};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Arc::new(LlmClient::new(&LlmConfig::default())?);
/// let orchestrator = CheckOrchestrator::new(client, DEFAULT_RULE_TIMEOUT);
/// let report = orchestrator.run(Vec::new(), "", &[]).await;
/// assert_eq!(report.metadata.total_threadlines, 0);
/// # Ok(())
/// # }
/// ```
pub struct CheckOrchestrator {
    evaluator: RuleEvaluator,
    timeout: Duration,
}

impl CheckOrchestrator {
    /// Create an orchestrator sharing `service` across all evaluations, each
    /// bounded by `timeout`.
    pub fn new(service: Arc<dyn GenerationService>, timeout: Duration) -> Self {
        Self {
            evaluator: RuleEvaluator::new(service),
            timeout,
        }
    }

    /// Evaluate every rule against `diff` (touching `files`) and aggregate.
    ///
    /// Never fails: each rule yields exactly one verdict, and the call
    /// returns once all evaluations have settled or hit the budget.
    pub async fn run(&self, rules: Vec<RuleDocument>, diff: &str, files: &[String]) -> CheckReport {
        let started = Instant::now();
        let total = rules.len();
        tracing::info!(phase = %CheckPhase::Pending, rules = total, files = files.len(), "check accepted");

        let diff: Arc<str> = Arc::from(diff);
        let files: Arc<[String]> = Arc::from(files);

        let mut handles = Vec::with_capacity(total);
        for rule in rules {
            let evaluator = self.evaluator.clone();
            let diff = Arc::clone(&diff);
            let files = Arc::clone(&files);
            let budget = self.timeout;
            let rule_id = rule.id.clone();

            // Dropping the timed-out future aborts the in-flight request.
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(budget, evaluator.evaluate(&rule, &diff, &files)).await {
                    Ok(evaluation) => evaluation,
                    Err(_) => {
                        tracing::warn!(rule = %rule.id, budget_secs = budget.as_secs_f64(), "evaluation timed out");
                        Evaluation::timed_out(&rule.id, budget)
                    }
                }
            });
            handles.push((rule_id, handle));
        }
        tracing::info!(phase = %CheckPhase::Running, dispatched = handles.len(), "evaluations dispatched");

        let mut evaluations = Vec::with_capacity(total);
        for (rule_id, handle) in handles {
            let evaluation = match handle.await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    tracing::error!(rule = %rule_id, error = %e, "evaluation task failed");
                    Evaluation::errored(&rule_id, format!("evaluation task failed: {e}"))
                }
            };
            evaluations.push(evaluation);
        }

        tracing::info!(phase = %CheckPhase::Aggregating, "all evaluations settled");
        let report = aggregate(evaluations);
        tracing::info!(
            phase = %CheckPhase::Done,
            completed = report.metadata.completed,
            timed_out = report.metadata.timed_out,
            errors = report.metadata.errors,
            visible = report.visible().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "check finished"
        );
        report
    }
}

/// Fold settled evaluations, already in rule order, into a report.
fn aggregate(evaluations: Vec<Evaluation>) -> CheckReport {
    let mut metadata = CheckMetadata {
        total_threadlines: evaluations.len(),
        ..CheckMetadata::default()
    };
    let mut verdicts = Vec::with_capacity(evaluations.len());
    for evaluation in evaluations {
        match evaluation.kind {
            Outcome::Completed => metadata.completed += 1,
            Outcome::TimedOut => metadata.timed_out += 1,
            Outcome::Errored => metadata.errors += 1,
        }
        verdicts.push(evaluation.verdict);
    }
    CheckReport { verdicts, metadata }
}
