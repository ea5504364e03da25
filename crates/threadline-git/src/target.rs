//! Diff-target resolution from CI environment signals.
//!
//! The resolver is a pure function over a [`SignalBag`]; reading the process
//! environment happens once, at the edge, via [`SignalBag::from_env`].

use std::collections::BTreeMap;

use threadline_core::ReviewTarget;

/// Key/value signals describing the execution environment.
///
/// Empty values are treated as absent.
///
/// # Examples
///
/// ```
/// use threadline_git::target::SignalBag;
///
/// let bag = SignalBag::from_pairs([("CI_COMMIT_SHA", "abc123"), ("CI_COMMIT_BRANCH", "")]);
/// assert_eq!(bag.get("CI_COMMIT_SHA"), Some("abc123"));
/// assert_eq!(bag.get("CI_COMMIT_BRANCH"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalBag {
    values: BTreeMap<String, String>,
}

impl SignalBag {
    /// Build a bag from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Snapshot the recognized variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_pairs(
            KNOWN_SIGNALS
                .iter()
                .filter_map(|key| std::env::var(key).ok().map(|v| (*key, v))),
        )
    }

    /// Parse `KEY=VALUE` lines (as in a `.env` file). Blank lines and `#`
    /// comments are skipped; surrounding quotes on values are removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline_git::target::SignalBag;
    ///
    /// let bag = SignalBag::parse_env_file("# ci\nGITHUB_SHA=\"deadbeef\"\nexport THREADLINE_BRANCH=dev\n");
    /// assert_eq!(bag.get("GITHUB_SHA"), Some("deadbeef"));
    /// assert_eq!(bag.get("THREADLINE_BRANCH"), Some("dev"));
    /// ```
    pub fn parse_env_file(content: &str) -> Self {
        Self::from_pairs(content.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        }))
    }

    /// Merge `other` over `self`; keys in `other` win.
    pub fn overlay(mut self, other: SignalBag) -> Self {
        self.values.extend(other.values);
        self
    }

    /// The non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }
}

/// How a hosting provider announces a pull/merge request.
struct RequestSignals {
    kind: RequestKind,
    /// Must be present for the request to count (e.g. the request number).
    marker: Option<&'static str>,
    /// Event variable and the values that denote a request. An unset event
    /// variable does not disqualify the row.
    events: Option<(&'static str, &'static [&'static str])>,
    target: &'static str,
    source: &'static str,
    title: &'static str,
}

#[derive(Clone, Copy)]
enum RequestKind {
    Pull,
    Merge,
}

const REQUEST_SIGNALS: &[RequestSignals] = &[
    // GitHub Actions only sets the base/head refs on pull request events.
    RequestSignals {
        kind: RequestKind::Pull,
        marker: None,
        events: Some(("GITHUB_EVENT_NAME", &["pull_request", "pull_request_target"])),
        target: "GITHUB_BASE_REF",
        source: "GITHUB_HEAD_REF",
        title: "PR_TITLE",
    },
    RequestSignals {
        kind: RequestKind::Merge,
        marker: Some("CI_MERGE_REQUEST_IID"),
        events: None,
        target: "CI_MERGE_REQUEST_TARGET_BRANCH_NAME",
        source: "CI_MERGE_REQUEST_SOURCE_BRANCH_NAME",
        title: "CI_MERGE_REQUEST_TITLE",
    },
    RequestSignals {
        kind: RequestKind::Pull,
        marker: Some("BITBUCKET_PR_ID"),
        events: None,
        target: "BITBUCKET_PR_DESTINATION_BRANCH",
        source: "BITBUCKET_BRANCH",
        title: "BITBUCKET_PR_TITLE",
    },
    RequestSignals {
        kind: RequestKind::Pull,
        marker: None,
        events: None,
        target: "THREADLINE_TARGET_BRANCH",
        source: "THREADLINE_SOURCE_BRANCH",
        title: "THREADLINE_PR_TITLE",
    },
];

const BRANCH_SIGNALS: &[&str] = &[
    "THREADLINE_BRANCH",
    "GITHUB_REF_NAME",
    "CI_COMMIT_BRANCH",
    "BITBUCKET_BRANCH",
    "VERCEL_GIT_COMMIT_REF",
];

const COMMIT_SIGNALS: &[&str] = &[
    "THREADLINE_COMMIT",
    "GITHUB_SHA",
    "CI_COMMIT_SHA",
    "BITBUCKET_COMMIT",
    "VERCEL_GIT_COMMIT_SHA",
];

const KNOWN_SIGNALS: &[&str] = &[
    "GITHUB_EVENT_NAME",
    "GITHUB_BASE_REF",
    "GITHUB_HEAD_REF",
    "GITHUB_REF_NAME",
    "GITHUB_REF_TYPE",
    "GITHUB_SHA",
    "GITHUB_REPOSITORY",
    "PR_TITLE",
    "CI_MERGE_REQUEST_IID",
    "CI_MERGE_REQUEST_TARGET_BRANCH_NAME",
    "CI_MERGE_REQUEST_SOURCE_BRANCH_NAME",
    "CI_MERGE_REQUEST_TITLE",
    "CI_COMMIT_BRANCH",
    "CI_COMMIT_SHA",
    "CI_PROJECT_PATH",
    "BITBUCKET_PR_ID",
    "BITBUCKET_PR_DESTINATION_BRANCH",
    "BITBUCKET_PR_TITLE",
    "BITBUCKET_BRANCH",
    "BITBUCKET_COMMIT",
    "BITBUCKET_REPO_FULL_NAME",
    "VERCEL_GIT_COMMIT_REF",
    "VERCEL_GIT_COMMIT_SHA",
    "VERCEL_GIT_REPO_SLUG",
    "THREADLINE_TARGET_BRANCH",
    "THREADLINE_SOURCE_BRANCH",
    "THREADLINE_PR_TITLE",
    "THREADLINE_BRANCH",
    "THREADLINE_COMMIT",
    "THREADLINE_REPO",
    "THREADLINE_ENVIRONMENT",
];

/// Determine which references to diff.
///
/// First match wins: pull/merge request, then branch, then commit, then the
/// local sentinel. Never fails.
///
/// # Examples
///
/// ```
/// use threadline_core::TargetKind;
/// use threadline_git::target::{resolve_target, SignalBag};
///
/// let bag = SignalBag::from_pairs([
///     ("GITHUB_BASE_REF", "main"),
///     ("GITHUB_HEAD_REF", "feature"),
///     ("GITHUB_SHA", "abc"),
/// ]);
/// assert_eq!(resolve_target(&bag).kind, TargetKind::PullRequest);
/// assert_eq!(resolve_target(&SignalBag::default()).kind, TargetKind::Local);
/// ```
pub fn resolve_target(signals: &SignalBag) -> ReviewTarget {
    for request in REQUEST_SIGNALS {
        if request.marker.is_some_and(|m| signals.get(m).is_none()) {
            continue;
        }
        if let Some((key, allowed)) = request.events {
            if signals.get(key).is_some_and(|event| !allowed.contains(&event)) {
                continue;
            }
        }
        let (Some(target), Some(source)) = (signals.get(request.target), signals.get(request.source))
        else {
            continue;
        };
        let title = signals.get(request.title).map(str::to_string);
        return match request.kind {
            RequestKind::Pull => ReviewTarget::pull_request(target, source, title),
            RequestKind::Merge => ReviewTarget::merge_request(target, source, title),
        };
    }

    let is_tag = signals.get("GITHUB_REF_TYPE") == Some("tag");
    let branch = BRANCH_SIGNALS
        .iter()
        .filter(|k| !(is_tag && **k == "GITHUB_REF_NAME"))
        .find_map(|k| signals.get(k));
    if let Some(branch) = branch {
        return ReviewTarget::branch(branch);
    }

    if let Some(sha) = signals.first_of(COMMIT_SIGNALS) {
        return ReviewTarget::commit(sha);
    }

    ReviewTarget::local()
}

/// Repository slug announced by the environment, if any.
pub fn repository_name(signals: &SignalBag) -> Option<&str> {
    signals.first_of(&[
        "THREADLINE_REPO",
        "GITHUB_REPOSITORY",
        "CI_PROJECT_PATH",
        "BITBUCKET_REPO_FULL_NAME",
        "VERCEL_GIT_REPO_SLUG",
    ])
}

/// Environment name for the check lineage: `THREADLINE_ENVIRONMENT` if set,
/// else the detected CI host.
pub fn environment_name(signals: &SignalBag) -> Option<&str> {
    if let Some(name) = signals.get("THREADLINE_ENVIRONMENT") {
        return Some(name);
    }
    if signals.get("GITHUB_SHA").is_some() {
        Some("github")
    } else if signals.get("CI_COMMIT_SHA").is_some() {
        Some("gitlab")
    } else if signals.get("BITBUCKET_COMMIT").is_some() {
        Some("bitbucket")
    } else if signals.get("VERCEL_GIT_COMMIT_SHA").is_some() {
        Some("vercel")
    } else {
        None
    }
}
