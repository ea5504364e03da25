//! Inbound check requests and outbound check responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use threadline_core::{
    CheckMetadata, CheckReport, ContextFile, RuleDocument, ThreadlineError, VerdictStatus,
};

/// A validated request to run one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Rules to evaluate, in order.
    pub threadlines: Vec<RuleDocument>,
    /// Unified diff text.
    pub diff: String,
    /// Files the diff touches.
    pub files: Vec<String>,
    /// Credential for the generation service.
    pub api_key: String,
}

impl CheckRequest {
    /// Parse and validate a request from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Serialization`] for invalid JSON and
    /// [`ThreadlineError::Validation`] for a missing or mistyped field.
    pub fn from_json_str(text: &str) -> Result<Self, ThreadlineError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// Validate a request object. All four top-level fields must be present
    /// with the right type, though they may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Validation`] naming the offending field
    /// path, e.g. `threadlines[2].patterns`.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline_review::request::CheckRequest;
    ///
    /// let ok = serde_json::json!({"threadlines": [], "diff": "", "files": [], "apiKey": "k"});
    /// assert!(CheckRequest::from_json(&ok).is_ok());
    ///
    /// let missing = serde_json::json!({"threadlines": [], "diff": "", "files": []});
    /// let err = CheckRequest::from_json(&missing).unwrap_err();
    /// assert!(err.to_string().contains("apiKey"));
    /// ```
    pub fn from_json(value: &Value) -> Result<Self, ThreadlineError> {
        let root = value
            .as_object()
            .ok_or_else(|| invalid("request", "an object"))?;

        let threadlines = required(root, "threadlines", "threadlines")?
            .as_array()
            .ok_or_else(|| invalid("threadlines", "an array"))?
            .iter()
            .enumerate()
            .map(|(i, item)| parse_threadline(item, &format!("threadlines[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        let diff = string_field(root, "diff", "diff")?;
        let files = string_array(required(root, "files", "files")?, "files")?;
        let api_key = string_field(root, "apiKey", "apiKey")?;

        Ok(Self {
            threadlines,
            diff,
            files,
            api_key,
        })
    }
}

fn parse_threadline(value: &Value, path: &str) -> Result<RuleDocument, ThreadlineError> {
    let obj = value.as_object().ok_or_else(|| invalid(path, "an object"))?;

    let id = string_field(obj, "id", &format!("{path}.id"))?;
    let version = string_field(obj, "version", &format!("{path}.version"))?;
    let patterns_path = format!("{path}.patterns");
    let patterns = string_array(required(obj, "patterns", &patterns_path)?, &patterns_path)?;
    let body = string_field(obj, "content", &format!("{path}.content"))?;

    let context_paths = match obj.get("contextFiles") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => string_array(v, &format!("{path}.contextFiles"))?,
    };
    let context_content = match obj.get("contextContent") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(invalid(&format!("{path}.contextContent"), "an object")),
    };

    let context_files = context_paths
        .into_iter()
        .map(|file| {
            let content = context_content
                .and_then(|m| m.get(&file))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ContextFile {
                path: file,
                content,
            }
        })
        .collect();

    Ok(RuleDocument {
        id,
        version,
        patterns,
        body,
        context_files,
    })
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Value, ThreadlineError> {
    obj.get(key)
        .ok_or_else(|| ThreadlineError::Validation(format!("missing required field `{path}`")))
}

fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, ThreadlineError> {
    required(obj, key, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(path, "a string"))
}

fn string_array(value: &Value, path: &str) -> Result<Vec<String>, ThreadlineError> {
    let items = value.as_array().ok_or_else(|| invalid(path, "an array"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(&format!("{path}[{i}]"), "a string"))
        })
        .collect()
}

fn invalid(path: &str, expected: &str) -> ThreadlineError {
    ThreadlineError::Validation(format!("`{path}` must be {expected}"))
}

/// One visible verdict on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    /// Rule identifier.
    pub expert_id: String,
    /// Verdict status.
    pub status: VerdictStatus,
    /// Model explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Cited line numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_references: Option<Vec<u32>>,
    /// Grounding files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_references: Option<Vec<String>>,
}

/// The outbound report: visible verdicts plus settlement counters.
///
/// # Examples
///
/// ```
/// use threadline_core::{CheckMetadata, CheckReport, Verdict};
/// use threadline_review::request::CheckResponse;
///
/// let report = CheckReport {
///     verdicts: vec![Verdict::not_relevant("a", "no files match")],
///     metadata: CheckMetadata { total_threadlines: 1, completed: 1, ..Default::default() },
/// };
/// let json = serde_json::to_value(CheckResponse::from(&report)).unwrap();
/// assert_eq!(json["results"].as_array().unwrap().len(), 0);
/// assert_eq!(json["metadata"]["totalThreadlines"], 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Visible verdicts in rule order.
    pub results: Vec<CheckResult>,
    /// Settlement counters over every rule.
    pub metadata: CheckMetadata,
}

impl From<&CheckReport> for CheckResponse {
    fn from(report: &CheckReport) -> Self {
        Self {
            results: report
                .visible()
                .map(|v| CheckResult {
                    expert_id: v.rule_id.clone(),
                    status: v.status,
                    reasoning: v.reasoning.clone(),
                    line_references: v.line_references.clone(),
                    file_references: (!v.file_references.is_empty())
                        .then(|| v.file_references.clone()),
                })
                .collect(),
            metadata: report.metadata,
        }
    }
}
