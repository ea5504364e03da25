use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which invocation context a diff comes from.
///
/// # Examples
///
/// ```
/// use threadline_core::TargetKind;
///
/// assert_eq!(TargetKind::PullRequest.to_string(), "pull-request");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// GitHub-style pull request.
    PullRequest,
    /// GitLab-style merge request.
    MergeRequest,
    /// A branch push.
    Branch,
    /// A single commit.
    Commit,
    /// Uncommitted changes in a working tree.
    Local,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::PullRequest => write!(f, "pull-request"),
            TargetKind::MergeRequest => write!(f, "merge-request"),
            TargetKind::Branch => write!(f, "branch"),
            TargetKind::Commit => write!(f, "commit"),
            TargetKind::Local => write!(f, "local"),
        }
    }
}

/// The resolved reference pair defining which diff to compute.
///
/// Resolved once per invocation and never mutated. For request targets
/// `primary_ref` is the target branch and `secondary_ref` the source branch;
/// for local targets both are `None`.
///
/// # Examples
///
/// ```
/// use threadline_core::{ReviewTarget, TargetKind};
///
/// let target = ReviewTarget::pull_request("main", "feature/auth", Some("Add auth".into()));
/// assert_eq!(target.kind, TargetKind::PullRequest);
/// assert_eq!(target.primary_ref.as_deref(), Some("main"));
/// assert_eq!(target.secondary_ref.as_deref(), Some("feature/auth"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTarget {
    /// Invocation context.
    pub kind: TargetKind,
    /// Target branch, branch name, or commit SHA depending on `kind`.
    pub primary_ref: Option<String>,
    /// Source branch for pull/merge requests.
    pub secondary_ref: Option<String>,
    /// Pull/merge request title, when known.
    pub title: Option<String>,
}

impl ReviewTarget {
    /// A pull request from `source` into `target`.
    pub fn pull_request(target: &str, source: &str, title: Option<String>) -> Self {
        Self {
            kind: TargetKind::PullRequest,
            primary_ref: Some(target.to_string()),
            secondary_ref: Some(source.to_string()),
            title,
        }
    }

    /// A merge request from `source` into `target`.
    pub fn merge_request(target: &str, source: &str, title: Option<String>) -> Self {
        Self {
            kind: TargetKind::MergeRequest,
            ..Self::pull_request(target, source, title)
        }
    }

    /// A branch push.
    pub fn branch(name: &str) -> Self {
        Self {
            kind: TargetKind::Branch,
            primary_ref: Some(name.to_string()),
            secondary_ref: None,
            title: None,
        }
    }

    /// A single commit.
    pub fn commit(sha: &str) -> Self {
        Self {
            kind: TargetKind::Commit,
            primary_ref: Some(sha.to_string()),
            secondary_ref: None,
            title: None,
        }
    }

    /// Local uncommitted changes.
    pub fn local() -> Self {
        Self {
            kind: TargetKind::Local,
            primary_ref: None,
            secondary_ref: None,
            title: None,
        }
    }

    /// Whether this target is the local sentinel.
    pub fn is_local(&self) -> bool {
        self.kind == TargetKind::Local
    }

    /// Branch name used for the check lineage, if the target has one.
    ///
    /// Requests use their source branch, branch pushes use the branch itself.
    pub fn lineage_branch(&self) -> Option<&str> {
        match self.kind {
            TargetKind::PullRequest | TargetKind::MergeRequest => self.secondary_ref.as_deref(),
            TargetKind::Branch => self.primary_ref.as_deref(),
            TargetKind::Commit | TargetKind::Local => None,
        }
    }
}

impl fmt::Display for ReviewTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.primary_ref, &self.secondary_ref) {
            (TargetKind::Local, _, _) => write!(f, "local changes"),
            (_, Some(primary), Some(secondary)) => {
                write!(f, "{} {secondary} -> {primary}", self.kind)?;
                if let Some(title) = &self.title {
                    write!(f, " ({title})")?;
                }
                Ok(())
            }
            (_, Some(primary), None) => write!(f, "{} {primary}", self.kind),
            (_, None, _) => write!(f, "{}", self.kind),
        }
    }
}

/// A reference file attached to a rule, always included verbatim in the
/// grounding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    /// Path relative to the repository root.
    pub path: String,
    /// File content, empty when unavailable.
    pub content: String,
}

/// A user-authored rule ("threadline") scoped to files by glob patterns.
///
/// Identity is `(id, version)`; [`RuleDocument::identity_hash`] gives the
/// cross-version lineage key.
///
/// # Examples
///
/// ```
/// use threadline_core::RuleDocument;
///
/// let rule = RuleDocument {
///     id: "no-raw-sql".into(),
///     version: "2".into(),
///     patterns: vec!["src/**/*.rs".into()],
///     body: "Use the query builder.".into(),
///     context_files: vec![],
/// };
/// let v3 = RuleDocument { version: "3".into(), ..rule.clone() };
/// assert_eq!(rule.identity_hash("acme/api"), v3.identity_hash("acme/api"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    /// Stable rule identifier.
    pub id: String,
    /// Rule version string.
    pub version: String,
    /// Ordered glob patterns selecting the files this rule applies to.
    pub patterns: Vec<String>,
    /// The rule text the generation service grades against.
    pub body: String,
    /// Reference files included with every evaluation.
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
}

impl RuleDocument {
    /// Content hash identifying this rule across version bumps within `repo`.
    pub fn identity_hash(&self, repo: &str) -> String {
        rule_identity_hash(repo, &self.id)
    }
}

/// Hex SHA-256 over `(repo, rule_id)`.
pub fn rule_identity_hash(repo: &str, rule_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update([0u8]);
    hasher.update(rule_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The externally visible three-valued verdict status.
///
/// # Examples
///
/// ```
/// use threadline_core::VerdictStatus;
///
/// let s: VerdictStatus = "not-relevant".parse().unwrap();
/// assert_eq!(s, VerdictStatus::NotRelevant);
/// assert_eq!(serde_json::to_string(&s).unwrap(), "\"not_relevant\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// The change follows the rule.
    Compliant,
    /// The change appears to violate the rule.
    Attention,
    /// The rule does not apply, or could not be evaluated.
    NotRelevant,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Compliant => write!(f, "compliant"),
            VerdictStatus::Attention => write!(f, "attention"),
            VerdictStatus::NotRelevant => write!(f, "not_relevant"),
        }
    }
}

/// How a rule evaluation settled.
///
/// Kept apart from [`VerdictStatus`]: a timed-out or failed evaluation still
/// surfaces as not-relevant, but it says nothing about the code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A verdict was produced, including scope misses.
    #[default]
    Completed,
    /// The per-rule budget elapsed first.
    TimedOut,
    /// The generation service failed or answered outside the contract.
    Errored,
}

impl Outcome {
    /// Whether the verdict reflects an actual evaluation of the change.
    pub fn is_completed(self) -> bool {
        self == Outcome::Completed
    }
}

impl FromStr for VerdictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compliant" => Ok(VerdictStatus::Compliant),
            "attention" => Ok(VerdictStatus::Attention),
            "not_relevant" | "not-relevant" => Ok(VerdictStatus::NotRelevant),
            other => Err(format!("unknown verdict status: {other}")),
        }
    }
}

/// The outcome of evaluating one rule against one diff.
///
/// Exactly one verdict exists per rule per check. A verdict whose status is
/// not [`VerdictStatus::NotRelevant`] always carries at least one file
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// The rule this verdict belongs to.
    pub rule_id: String,
    /// Three-valued outcome.
    pub status: VerdictStatus,
    /// Explanation from the model, or why the rule was not evaluated.
    pub reasoning: Option<String>,
    /// In-scope files the verdict is grounded on.
    #[serde(default)]
    pub file_references: Vec<String>,
    /// Line numbers cited by the model.
    pub line_references: Option<Vec<u32>>,
    /// How the evaluation settled.
    #[serde(default)]
    pub outcome: Outcome,
}

impl Verdict {
    /// A not-relevant verdict with the given explanation.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline_core::{Verdict, VerdictStatus};
    ///
    /// let v = Verdict::not_relevant("style-guide", "no files match");
    /// assert_eq!(v.status, VerdictStatus::NotRelevant);
    /// assert!(v.file_references.is_empty());
    /// ```
    pub fn not_relevant(rule_id: &str, reasoning: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            status: VerdictStatus::NotRelevant,
            reasoning: Some(reasoning.into()),
            file_references: Vec::new(),
            line_references: None,
            outcome: Outcome::Completed,
        }
    }

    /// This verdict marked with `outcome`.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Whether this verdict belongs in the externally visible result set.
    pub fn is_visible(&self) -> bool {
        self.status != VerdictStatus::NotRelevant
    }
}

/// Counters describing how every rule evaluation in a check settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMetadata {
    /// Number of rules dispatched.
    pub total_threadlines: usize,
    /// Evaluations that produced a verdict, including scope misses.
    pub completed: usize,
    /// Evaluations abandoned at the per-rule timeout.
    pub timed_out: usize,
    /// Evaluations that failed at the generation-service boundary.
    pub errors: usize,
}

/// The finalized result of one check.
///
/// `verdicts` holds one entry per rule in input order, including
/// not-relevant ones; [`CheckReport::visible`] applies the external filter.
///
/// # Examples
///
/// ```
/// use threadline_core::{CheckMetadata, CheckReport, Verdict};
///
/// let report = CheckReport {
///     verdicts: vec![Verdict::not_relevant("a", "no files match")],
///     metadata: CheckMetadata { total_threadlines: 1, completed: 1, ..Default::default() },
/// };
/// assert_eq!(report.visible().count(), 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// Every verdict, in rule input order.
    pub verdicts: Vec<Verdict>,
    /// Settlement counters.
    pub metadata: CheckMetadata,
}

impl CheckReport {
    /// Verdicts with status other than not-relevant, in rule input order.
    pub fn visible(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.is_visible())
    }

    /// Whether any visible verdict needs attention.
    pub fn has_attention(&self) -> bool {
        self.verdicts
            .iter()
            .any(|v| v.status == VerdictStatus::Attention)
    }
}

/// How a fix was brought about.
///
/// Only code changes are distinguished today; a rule edited or removed
/// between checks is also reported as [`FixType::CodeChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixType {
    /// The violating code changed.
    CodeChange,
}

/// A detected attention → non-attention transition for one rule across two
/// consecutive checks of the same lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    /// Check in which the rule needed attention.
    pub previous_check_id: String,
    /// Check in which it no longer does.
    pub current_check_id: String,
    /// Cross-version rule identity.
    pub rule_identity_hash: String,
    /// Files the original violation referenced.
    pub violation_file_references: Vec<String>,
    /// Kind of fix.
    pub fix_type: FixType,
    /// Detection strategy, always `"naive"`.
    pub detection_method: String,
}
