use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use threadline_core::{Outcome, RuleDocument, ThreadlineError, VerdictStatus};
use threadline_difflens::parser::files_touched;
use threadline_review::llm::{GenerationRequest, GenerationService};
use threadline_review::orchestrator::CheckOrchestrator;
use threadline_review::request::CheckResponse;

const DIFF: &str = "\
diff --git a/src/a.ts b/src/a.ts
index 1111111..2222222 100644
--- a/src/a.ts
+++ b/src/a.ts
@@ -1,2 +1,2 @@
 import { db } from './db';
-db.query('SELECT 1');
+db.raw('SELECT * FROM users');
diff --git a/docs/b.md b/docs/b.md
index 3333333..4444444 100644
--- a/docs/b.md
+++ b/docs/b.md
@@ -1 +1,2 @@
 # Guide
+New section.
";

fn rule(id: &str, pattern: &str) -> RuleDocument {
    RuleDocument {
        id: id.into(),
        version: "1".into(),
        patterns: vec![pattern.into()],
        body: format!("marker:{id}"),
        context_files: vec![],
    }
}

/// Answers per rule (found via the rule body marker), optionally after a
/// delay; rules with no script never settle.
struct Scripted {
    replies: HashMap<String, (Duration, Result<String, String>)>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(replies: Vec<(&str, u64, Result<&str, &str>)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .into_iter()
                .map(|(id, delay_ms, reply)| {
                    (
                        id.to_string(),
                        (
                            Duration::from_millis(delay_ms),
                            reply.map(str::to_string).map_err(str::to_string),
                        ),
                    )
                })
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for Scripted {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ThreadlineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .replies
            .iter()
            .find(|(id, _)| request.user_prompt.contains(&format!("marker:{id}")));
        match script {
            Some((_, (delay, reply))) => {
                tokio::time::sleep(*delay).await;
                reply.clone().map_err(ThreadlineError::Llm)
            }
            None => std::future::pending().await,
        }
    }
}

#[tokio::test]
async fn per_rule_scoping_end_to_end() {
    let service = Scripted::new(vec![
        ("ts", 0, Ok(r#"{"status":"attention","reasoning":"raw SQL"}"#)),
        ("md", 0, Ok(r#"{"status":"compliant"}"#)),
    ]);
    let orchestrator = CheckOrchestrator::new(service.clone(), Duration::from_secs(5));
    let files = files_touched(DIFF);
    assert_eq!(files, vec!["src/a.ts", "docs/b.md"]);

    let report = orchestrator
        .run(vec![rule("ts", "**/*.ts"), rule("md", "**/*.md")], DIFF, &files)
        .await;

    assert_eq!(report.verdicts[0].file_references, vec!["src/a.ts"]);
    assert_eq!(report.verdicts[1].file_references, vec!["docs/b.md"]);
    assert_eq!(report.verdicts[0].status, VerdictStatus::Attention);
    assert_eq!(report.verdicts[1].status, VerdictStatus::Compliant);
    assert!(report.visible().count() <= 2);
    assert_eq!(report.metadata.completed, 2);
    assert_eq!(service.calls(), 2);
}

#[tokio::test]
async fn zero_scope_rule_is_hidden_counted_and_never_called() {
    let service = Scripted::new(vec![("ts", 0, Ok(r#"{"status":"compliant"}"#))]);
    let orchestrator = CheckOrchestrator::new(service.clone(), Duration::from_secs(5));
    let files = files_touched(DIFF);

    let report = orchestrator
        .run(vec![rule("ts", "**/*.ts"), rule("rs", "**/*.rs")], DIFF, &files)
        .await;

    assert_eq!(service.calls(), 1);
    assert_eq!(report.metadata.total_threadlines, 2);
    assert_eq!(report.metadata.completed, 2);
    let visible: Vec<_> = report.visible().map(|v| v.rule_id.as_str()).collect();
    assert_eq!(visible, vec!["ts"]);
    assert_eq!(report.verdicts[1].reasoning.as_deref(), Some("no files match"));
}

#[tokio::test]
async fn hung_evaluation_times_out_without_blocking_the_check() {
    let service = Scripted::new(vec![("md", 0, Ok(r#"{"status":"compliant"}"#))]);
    let orchestrator = CheckOrchestrator::new(service, Duration::from_millis(50));
    let files = files_touched(DIFF);

    let started = Instant::now();
    let report = orchestrator
        .run(vec![rule("ts", "**/*.ts"), rule("md", "**/*.md")], DIFF, &files)
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    let hung = &report.verdicts[0];
    assert_eq!(hung.status, VerdictStatus::NotRelevant);
    assert_eq!(hung.outcome, Outcome::TimedOut);
    assert!(hung.reasoning.as_deref().unwrap().contains("timed out"));
    assert_eq!(report.metadata.timed_out, 1);
    assert_eq!(report.metadata.completed, 1);
    assert_eq!(report.metadata.errors, 0);
}

#[tokio::test]
async fn failures_are_counted_as_errors_not_timeouts() {
    let service = Scripted::new(vec![
        ("ts", 0, Err("connection reset")),
        ("md", 0, Ok("definitely not json")),
    ]);
    let orchestrator = CheckOrchestrator::new(service, Duration::from_secs(5));
    let files = files_touched(DIFF);

    let report = orchestrator
        .run(vec![rule("ts", "**/*.ts"), rule("md", "**/*.md")], DIFF, &files)
        .await;

    assert_eq!(report.metadata.errors, 2);
    assert_eq!(report.metadata.timed_out, 0);
    assert_eq!(report.visible().count(), 0);
    assert!(report.verdicts[0]
        .reasoning
        .as_deref()
        .unwrap()
        .contains("connection reset"));
}

#[tokio::test]
async fn output_follows_input_order_not_completion_order() {
    let service = Scripted::new(vec![
        ("slow", 150, Ok(r#"{"status":"compliant"}"#)),
        ("mid", 75, Ok(r#"{"status":"attention"}"#)),
        ("fast", 0, Ok(r#"{"status":"compliant"}"#)),
    ]);
    let orchestrator = CheckOrchestrator::new(service, Duration::from_secs(5));
    let files = files_touched(DIFF);

    let started = Instant::now();
    let report = orchestrator
        .run(
            vec![rule("slow", "**/*"), rule("mid", "**/*"), rule("fast", "**/*")],
            DIFF,
            &files,
        )
        .await;

    let ids: Vec<_> = report.verdicts.iter().map(|v| v.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["slow", "mid", "fast"]);
    // Concurrent dispatch: total is close to the slowest, not the sum.
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn empty_rule_set_yields_empty_report() {
    let service = Scripted::new(vec![]);
    let orchestrator = CheckOrchestrator::new(service, Duration::from_secs(1));
    let report = orchestrator.run(Vec::new(), DIFF, &[]).await;
    assert!(report.verdicts.is_empty());
    assert_eq!(report.metadata.total_threadlines, 0);
}

#[tokio::test]
async fn wire_response_matches_report() {
    let service = Scripted::new(vec![(
        "ts",
        0,
        Ok(r#"{"status":"attention","reasoning":"src/a.ts uses raw SQL","lineReferences":[2]}"#),
    )]);
    let orchestrator = CheckOrchestrator::new(service, Duration::from_secs(5));
    let files = files_touched(DIFF);
    let report = orchestrator
        .run(vec![rule("ts", "**/*.ts"), rule("rs", "**/*.rs")], DIFF, &files)
        .await;

    let json = serde_json::to_value(CheckResponse::from(&report)).unwrap();
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["results"][0]["expertId"], "ts");
    assert_eq!(json["results"][0]["lineReferences"][0], 2);
    assert_eq!(json["results"][0]["fileReferences"][0], "src/a.ts");
    assert_eq!(json["metadata"]["totalThreadlines"], 2);
    assert_eq!(json["metadata"]["completed"], 2);
}

/// Panics while evaluating the rule whose body carries `marker:boom`.
struct Panicking;

#[async_trait]
impl GenerationService for Panicking {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ThreadlineError> {
        if request.user_prompt.contains("marker:boom") {
            panic!("boom");
        }
        Ok(r#"{"status":"compliant"}"#.to_string())
    }
}

#[tokio::test]
async fn panicking_evaluation_becomes_an_errored_verdict_in_place() {
    let orchestrator = CheckOrchestrator::new(Arc::new(Panicking), Duration::from_secs(5));
    let files = files_touched(DIFF);

    let report = orchestrator
        .run(vec![rule("boom", "**/*.ts"), rule("md", "**/*.md")], DIFF, &files)
        .await;

    let ids: Vec<_> = report.verdicts.iter().map(|v| v.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["boom", "md"]);
    assert_eq!(report.metadata.total_threadlines, 2);
    assert_eq!(report.metadata.errors, 1);
    assert_eq!(report.metadata.completed, 1);
    assert_eq!(report.metadata.timed_out, 0);

    let failed = &report.verdicts[0];
    assert_eq!(failed.status, VerdictStatus::NotRelevant);
    assert_eq!(failed.outcome, Outcome::Errored);
    assert!(failed.reasoning.as_deref().unwrap().contains("panicked"));
    assert_eq!(report.verdicts[1].status, VerdictStatus::Compliant);
}
