use serde::Deserialize;
use threadline_core::{RuleDocument, ThreadlineError, VerdictStatus};

const SYSTEM_INSTRUCTION: &str = "\
You are a code-review assistant that checks a code change against one team \
standard. Judge only the standard you are given, and only the lines the diff \
changes.

Statuses:
- compliant: the change follows the standard
- attention: the change appears to violate the standard
- not_relevant: the standard does not apply to this change

Rules:
- Cite the files and line numbers (new side of the diff) your verdict rests on
- Do not speculate about code you cannot see
- Reference files are background, not part of the change

Respond with a JSON object:
{
  \"status\": \"compliant\" | \"attention\" | \"not_relevant\",
  \"reasoning\": \"One or two sentences explaining the verdict\",
  \"file_references\": [\"path/to/file.ts\"],
  \"line_references\": [42]
}";

/// Build the system instruction for rule grading.
///
/// # Examples
///
/// ```
/// use threadline_review::prompt::build_system_instruction;
///
/// let instruction = build_system_instruction();
/// assert!(instruction.contains("not_relevant"));
/// ```
pub fn build_system_instruction() -> String {
    SYSTEM_INSTRUCTION.to_string()
}

/// Build the user prompt for one rule: the rule body, every context file
/// verbatim, the (already filtered) diff, and the in-scope file list.
///
/// # Examples
///
/// ```
/// use threadline_core::RuleDocument;
/// use threadline_review::prompt::build_user_prompt;
///
/// let rule = RuleDocument {
///     id: "tests".into(),
///     version: "1".into(),
///     patterns: vec!["**/*.ts".into()],
///     body: "Every module needs a test.".into(),
///     context_files: vec![],
/// };
/// let prompt = build_user_prompt(&rule, "+export const x = 1;", &["a.ts".to_string()]);
/// assert!(prompt.contains("Every module needs a test."));
/// assert!(prompt.contains("- a.ts"));
/// ```
pub fn build_user_prompt(rule: &RuleDocument, diff: &str, in_scope: &[String]) -> String {
    let mut prompt = format!(
        "## Standard: {} (version {})\n\n{}\n",
        rule.id, rule.version, rule.body
    );

    if !rule.context_files.is_empty() {
        prompt.push_str("\n## Reference files\n");
        for ctx in &rule.context_files {
            prompt.push_str(&format!("\n### {}\n```\n{}\n```\n", ctx.path, ctx.content));
        }
    }

    prompt.push_str("\n## Files in scope\n");
    for file in in_scope {
        prompt.push_str(&format!("- {file}\n"));
    }

    prompt.push_str(&format!("\n## Change\n\n```diff\n{diff}\n```\n"));
    prompt
}

/// The validated shape of a generation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVerdict {
    /// Verdict status.
    pub status: VerdictStatus,
    /// Model explanation.
    pub reasoning: Option<String>,
    /// Files the model cited, unfiltered.
    pub file_references: Vec<String>,
    /// Positive line numbers the model cited.
    pub line_references: Option<Vec<u32>>,
}

#[derive(Deserialize)]
struct RawVerdict {
    status: Option<serde_json::Value>,
    reasoning: Option<serde_json::Value>,
    #[serde(alias = "lineReferences")]
    line_references: Option<serde_json::Value>,
    #[serde(alias = "fileReferences")]
    file_references: Option<serde_json::Value>,
}

/// Parse a generation response into a [`ParsedVerdict`].
///
/// Handles markdown code fences around JSON. Unknown optional fields are
/// ignored; non-numeric line references are skipped.
///
/// # Errors
///
/// Returns [`ThreadlineError::Parse`] when the response is not a JSON object
/// or its `status` is missing or unknown.
///
/// # Examples
///
/// ```
/// use threadline_core::VerdictStatus;
/// use threadline_review::prompt::parse_verdict_response;
///
/// let parsed = parse_verdict_response(r#"{"status":"attention","reasoning":"raw SQL"}"#).unwrap();
/// assert_eq!(parsed.status, VerdictStatus::Attention);
/// assert!(parse_verdict_response(r#"{"status":"maybe"}"#).is_err());
/// ```
pub fn parse_verdict_response(response: &str) -> Result<ParsedVerdict, ThreadlineError> {
    let cleaned = strip_code_fences(response);
    let raw: RawVerdict = serde_json::from_str(cleaned)
        .map_err(|e| ThreadlineError::Parse(format!("response is not a verdict object: {e}")))?;

    let status = match raw.status {
        Some(serde_json::Value::String(s)) => s
            .parse::<VerdictStatus>()
            .map_err(ThreadlineError::Parse)?,
        Some(other) => {
            return Err(ThreadlineError::Parse(format!(
                "verdict status is not a string: {other}"
            )))
        }
        None => return Err(ThreadlineError::Parse("verdict has no status".into())),
    };

    let reasoning = match raw.reasoning {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    let file_references = match raw.file_references {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let line_references = match raw.line_references {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_u64())
                .filter(|&l| l > 0)
                .filter_map(|l| u32::try_from(l).ok())
                .collect(),
        ),
        _ => None,
    };

    Ok(ParsedVerdict {
        status,
        reasoning,
        file_references,
        line_references,
    })
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::ContextFile;

    fn rule() -> RuleDocument {
        RuleDocument {
            id: "no-raw-sql".into(),
            version: "2".into(),
            patterns: vec!["src/**/*.ts".into()],
            body: "Use the query builder.".into(),
            context_files: vec![ContextFile {
                path: "docs/db.md".into(),
                content: "The builder lives in src/db.".into(),
            }],
        }
    }

    #[test]
    fn user_prompt_includes_every_part() {
        let prompt = build_user_prompt(&rule(), "+db.raw('x')", &["src/a.ts".into()]);
        assert!(prompt.contains("no-raw-sql (version 2)"));
        assert!(prompt.contains("Use the query builder."));
        assert!(prompt.contains("### docs/db.md"));
        assert!(prompt.contains("The builder lives in src/db."));
        assert!(prompt.contains("- src/a.ts"));
        assert!(prompt.contains("```diff\n+db.raw('x')"));
    }

    #[test]
    fn parse_full_response() {
        let json = r#"{
            "status": "attention",
            "reasoning": "Raw SQL in the handler.",
            "file_references": ["src/a.ts"],
            "line_references": [12, 0, "x", 30]
        }"#;
        let parsed = parse_verdict_response(json).unwrap();
        assert_eq!(parsed.status, VerdictStatus::Attention);
        assert_eq!(parsed.reasoning.as_deref(), Some("Raw SQL in the handler."));
        assert_eq!(parsed.file_references, vec!["src/a.ts"]);
        assert_eq!(parsed.line_references, Some(vec![12, 30]));
    }

    #[test]
    fn parse_camel_case_aliases() {
        let json = r#"{"status":"Compliant","fileReferences":["b.ts"],"lineReferences":[1]}"#;
        let parsed = parse_verdict_response(json).unwrap();
        assert_eq!(parsed.status, VerdictStatus::Compliant);
        assert_eq!(parsed.file_references, vec!["b.ts"]);
        assert_eq!(parsed.line_references, Some(vec![1]));
    }

    #[test]
    fn parse_accepts_both_not_relevant_spellings() {
        for raw in [r#"{"status":"not_relevant"}"#, r#"{"status":"not-relevant"}"#] {
            let parsed = parse_verdict_response(raw).unwrap();
            assert_eq!(parsed.status, VerdictStatus::NotRelevant);
        }
    }

    #[test]
    fn parse_with_code_fences() {
        let fenced = "```json\n{\"status\":\"compliant\"}\n```";
        assert_eq!(
            parse_verdict_response(fenced).unwrap().status,
            VerdictStatus::Compliant
        );
    }

    #[test]
    fn parse_rejects_malformed_responses() {
        assert!(parse_verdict_response("this is not json at all").is_err());
        assert!(parse_verdict_response("[1, 2]").is_err());
        assert!(parse_verdict_response(r#"{"reasoning":"no status"}"#).is_err());
        assert!(parse_verdict_response(r#"{"status":3}"#).is_err());
        assert!(parse_verdict_response(r#"{"status":"unsure"}"#).is_err());
    }
}
