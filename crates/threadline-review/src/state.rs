use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threadline_core::{rule_identity_hash, CheckReport, Outcome, ThreadlineError, VerdictStatus};

/// The (repo, branch, environment) triple that orders checks for fix
/// detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lineage {
    /// Repository slug or directory name.
    pub repo: String,
    /// Branch the checks ran for.
    pub branch: String,
    /// Where the checks ran (`local`, `github`, ...).
    pub environment: String,
}

/// One verdict as persisted with its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVerdict {
    /// Rule identifier at the time of the check.
    pub rule_id: String,
    /// Cross-version rule identity.
    pub identity_hash: String,
    /// Verdict status.
    pub status: VerdictStatus,
    /// Grounding files.
    #[serde(default)]
    pub file_references: Vec<String>,
    /// How the evaluation settled.
    #[serde(default)]
    pub outcome: Outcome,
}

/// A finished check as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCheck {
    /// Unique check identifier.
    pub id: String,
    /// Repository slug or directory name.
    pub repo: String,
    /// Branch the check ran for.
    pub branch: String,
    /// Where the check ran.
    pub environment: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Every verdict, including not-relevant ones.
    pub verdicts: Vec<StoredVerdict>,
    /// The diff the check ran against.
    #[serde(default)]
    pub diff: String,
}

impl StoredCheck {
    /// Capture `report` (run against `diff`) for `lineage`, keying each
    /// verdict by its rule identity hash.
    pub fn from_report(
        report: &CheckReport,
        diff: &str,
        lineage: &Lineage,
        created_at: DateTime<Utc>,
    ) -> Self {
        let verdicts = report
            .verdicts
            .iter()
            .map(|v| StoredVerdict {
                rule_id: v.rule_id.clone(),
                identity_hash: rule_identity_hash(&lineage.repo, &v.rule_id),
                status: v.status,
                file_references: v.file_references.clone(),
                outcome: v.outcome,
            })
            .collect();

        Self {
            id: format!("chk-{}", created_at.format("%Y%m%dT%H%M%S%.6fZ")),
            repo: lineage.repo.clone(),
            branch: lineage.branch.clone(),
            environment: lineage.environment.clone(),
            created_at,
            verdicts,
            diff: diff.to_string(),
        }
    }

    /// The lineage this check belongs to.
    pub fn lineage(&self) -> Lineage {
        Lineage {
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            environment: self.environment.clone(),
        }
    }

    fn in_lineage(&self, lineage: &Lineage) -> bool {
        self.repo == lineage.repo
            && self.branch == lineage.branch
            && self.environment == lineage.environment
    }
}

/// Read access to past checks, as needed by fix detection.
pub trait CheckHistory {
    /// The most recent check of `lineage` created strictly before `before`.
    fn previous_check(
        &self,
        lineage: &Lineage,
        before: DateTime<Utc>,
    ) -> Result<Option<StoredCheck>, ThreadlineError>;

    /// Verdicts with status attention for the check `check_id`.
    fn attention_verdicts(&self, check_id: &str) -> Result<Vec<StoredVerdict>, ThreadlineError>;
}

/// Checks stored as JSON files under `<state_dir>/checks/`.
///
/// # Examples
///
/// ```
/// use threadline_review::state::CheckLog;
///
/// let dir = tempfile::tempdir().unwrap();
/// let log = CheckLog::new(dir.path());
/// assert!(log.list().unwrap().is_empty());
/// ```
pub struct CheckLog {
    dir: PathBuf,
}

impl CheckLog {
    /// A log rooted at `state_dir`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("checks"),
        }
    }

    /// Persist `check`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Io`] or [`ThreadlineError::Serialization`]
    /// on failure.
    pub fn save(&self, check: &StoredCheck) -> Result<PathBuf, ThreadlineError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", check.id));
        let content = serde_json::to_string_pretty(check)?;
        std::fs::write(&path, content)?;
        tracing::debug!(path = %path.display(), "saved check");
        Ok(path)
    }

    /// Load the check with id `id`, if stored.
    pub fn load(&self, id: &str) -> Result<Option<StoredCheck>, ThreadlineError> {
        let path = self.dir.join(format!("{id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Every stored check, oldest first. Unreadable files are skipped with
    /// a warning.
    pub fn list(&self) -> Result<Vec<StoredCheck>, ThreadlineError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut checks = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(ThreadlineError::from)
                .and_then(|c| serde_json::from_str::<StoredCheck>(&c).map_err(Into::into));
            match parsed {
                Ok(check) => checks.push(check),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable check"),
            }
        }
        checks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(checks)
    }

    /// The newest check of `lineage`.
    pub fn latest(&self, lineage: &Lineage) -> Result<Option<StoredCheck>, ThreadlineError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.in_lineage(lineage))
            .next_back())
    }
}

impl CheckHistory for CheckLog {
    fn previous_check(
        &self,
        lineage: &Lineage,
        before: DateTime<Utc>,
    ) -> Result<Option<StoredCheck>, ThreadlineError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.in_lineage(lineage) && c.created_at < before)
            .next_back())
    }

    fn attention_verdicts(&self, check_id: &str) -> Result<Vec<StoredVerdict>, ThreadlineError> {
        Ok(self
            .load(check_id)?
            .map(|c| {
                c.verdicts
                    .into_iter()
                    .filter(|v| v.status == VerdictStatus::Attention)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use threadline_core::{CheckMetadata, Outcome, RuleDocument, Verdict};

    fn lineage(branch: &str) -> Lineage {
        Lineage {
            repo: "acme/api".into(),
            branch: branch.into(),
            environment: "local".into(),
        }
    }

    fn check(branch: &str, secs: i64, status: VerdictStatus) -> StoredCheck {
        let report = CheckReport {
            verdicts: vec![Verdict {
                rule_id: "r1".into(),
                status,
                reasoning: None,
                file_references: vec!["a.ts".into()],
                line_references: None,
                outcome: Outcome::Completed,
            }],
            metadata: CheckMetadata::default(),
        };
        let at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        StoredCheck::from_report(&report, "", &lineage(branch), at)
    }

    #[test]
    fn save_load_and_list_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckLog::new(dir.path());
        let later = check("main", 60, VerdictStatus::Compliant);
        let earlier = check("main", 0, VerdictStatus::Attention);
        log.save(&later).unwrap();
        log.save(&earlier).unwrap();

        assert_eq!(log.load(&earlier.id).unwrap(), Some(earlier.clone()));
        let ids: Vec<_> = log.list().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![earlier.id.clone(), later.id.clone()]);
        assert_eq!(log.latest(&lineage("main")).unwrap(), Some(later));
    }

    #[test]
    fn previous_check_stays_in_lineage_and_before() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckLog::new(dir.path());
        let first = check("main", 0, VerdictStatus::Attention);
        let other_branch = check("dev", 30, VerdictStatus::Attention);
        let current = check("main", 60, VerdictStatus::Compliant);
        for c in [&first, &other_branch, &current] {
            log.save(c).unwrap();
        }

        let prev = log
            .previous_check(&lineage("main"), current.created_at)
            .unwrap();
        assert_eq!(prev.map(|c| c.id), Some(first.id.clone()));
        assert!(log
            .previous_check(&lineage("main"), first.created_at)
            .unwrap()
            .is_none());
    }

    #[test]
    fn attention_verdicts_filters_status() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckLog::new(dir.path());
        let attention = check("main", 0, VerdictStatus::Attention);
        let compliant = check("main", 1, VerdictStatus::Compliant);
        log.save(&attention).unwrap();
        log.save(&compliant).unwrap();
        assert_eq!(log.attention_verdicts(&attention.id).unwrap().len(), 1);
        assert!(log.attention_verdicts(&compliant.id).unwrap().is_empty());
        assert!(log.attention_verdicts("chk-missing").unwrap().is_empty());
    }

    #[test]
    fn identity_hash_matches_rule_document() {
        let rule = RuleDocument {
            id: "r1".into(),
            version: "7".into(),
            patterns: vec!["**".into()],
            body: String::new(),
            context_files: vec![],
        };
        let stored = check("main", 0, VerdictStatus::Attention);
        assert_eq!(stored.verdicts[0].identity_hash, rule.identity_hash("acme/api"));
    }

    #[test]
    fn outcome_is_persisted_with_each_verdict() {
        let report = CheckReport {
            verdicts: vec![Verdict::not_relevant("slow", "evaluation timed out after 40s")
                .with_outcome(Outcome::TimedOut)],
            metadata: CheckMetadata::default(),
        };
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let stored = StoredCheck::from_report(&report, "", &lineage("main"), at);

        let dir = tempfile::tempdir().unwrap();
        let log = CheckLog::new(dir.path());
        log.save(&stored).unwrap();
        let loaded = log.load(&stored.id).unwrap().unwrap();
        assert_eq!(loaded.verdicts[0].outcome, Outcome::TimedOut);
    }

    #[test]
    fn checks_saved_without_outcome_read_as_completed() {
        let json = r#"{"rule_id":"r1","identity_hash":"h","status":"attention"}"#;
        let verdict: StoredVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(verdict.outcome, Outcome::Completed);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckLog::new(dir.path());
        log.save(&check("main", 0, VerdictStatus::Compliant)).unwrap();
        std::fs::write(dir.path().join("checks/broken.json"), "{").unwrap();
        assert_eq!(log.list().unwrap().len(), 1);
    }
}
