//! Naive fix detection between consecutive checks of one lineage.
//!
//! A rule that needed attention in the previous check and is absent or
//! no longer attention in the current one counts as fixed. Rules are matched
//! by identity hash, so a version bump keeps the lineage intact. A current
//! verdict that timed out or errored says nothing about the code and is never
//! a fix.

use std::collections::HashMap;

use threadline_core::{Fix, FixType, Outcome, ThreadlineError, VerdictStatus};
use threadline_difflens::combine::combine_diffs;
use threadline_difflens::parser::filter_by_files;

use crate::state::{CheckHistory, StoredCheck, StoredVerdict};

/// Detection strategy recorded on every fix.
pub const DETECTION_METHOD: &str = "naive";

/// Fixes between `previous` and `current`.
///
/// Returns nothing unless `previous` was created strictly before `current`.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use threadline_core::VerdictStatus;
/// use threadline_review::fixes::detect_fixes;
/// use threadline_review::state::{StoredCheck, StoredVerdict};
///
/// let verdict = |status| StoredVerdict {
///     rule_id: "r".into(),
///     identity_hash: "h".into(),
///     status,
///     file_references: vec!["a.ts".into()],
///     outcome: Default::default(),
/// };
/// let now = Utc::now();
/// let check = |id: &str, at, status| StoredCheck {
///     id: id.into(),
///     repo: "repo".into(),
///     branch: "main".into(),
///     environment: "local".into(),
///     created_at: at,
///     verdicts: vec![verdict(status)],
///     diff: String::new(),
/// };
/// let before = check("a", now - Duration::minutes(5), VerdictStatus::Attention);
/// let after = check("b", now, VerdictStatus::Compliant);
/// assert_eq!(detect_fixes(&before, &after).len(), 1);
/// assert!(detect_fixes(&after, &before).is_empty());
/// ```
pub fn detect_fixes(previous: &StoredCheck, current: &StoredCheck) -> Vec<Fix> {
    if previous.created_at >= current.created_at {
        return Vec::new();
    }
    let attention: Vec<&StoredVerdict> = previous
        .verdicts
        .iter()
        .filter(|v| v.status == VerdictStatus::Attention)
        .collect();
    fixes_for(&previous.id, attention, current)
}

fn fixes_for<'a>(
    previous_id: &str,
    attention: impl IntoIterator<Item = &'a StoredVerdict>,
    current: &StoredCheck,
) -> Vec<Fix> {
    let now: HashMap<&str, (VerdictStatus, Outcome)> = current
        .verdicts
        .iter()
        .map(|v| (v.identity_hash.as_str(), (v.status, v.outcome)))
        .collect();

    attention
        .into_iter()
        .filter(|v| match now.get(v.identity_hash.as_str()) {
            None => true,
            Some((status, outcome)) => {
                outcome.is_completed() && *status != VerdictStatus::Attention
            }
        })
        .map(|v| Fix {
            previous_check_id: previous_id.to_string(),
            current_check_id: current.id.clone(),
            rule_identity_hash: v.identity_hash.clone(),
            violation_file_references: v.file_references.clone(),
            fix_type: FixType::CodeChange,
            detection_method: DETECTION_METHOD.to_string(),
        })
        .collect()
}

/// The display diff for `fix`: the violating files as they changed in
/// `previous`, followed by how they changed in `current`.
pub fn fix_diff(fix: &Fix, previous: &StoredCheck, current: &StoredCheck) -> String {
    let files = &fix.violation_file_references;
    combine_diffs(
        &filter_by_files(&previous.diff, files),
        &filter_by_files(&current.diff, files),
    )
}

/// Runs fix detection for a freshly saved check against its history.
pub struct FixDetector<H> {
    history: H,
}

impl<H: CheckHistory> FixDetector<H> {
    /// A detector reading from `history`.
    pub fn new(history: H) -> Self {
        Self { history }
    }

    /// Fixes between `current` and the check immediately preceding it in the
    /// same lineage. No predecessor means no fixes.
    ///
    /// # Errors
    ///
    /// Propagates history read failures.
    pub fn detect(&self, current: &StoredCheck) -> Result<Vec<Fix>, ThreadlineError> {
        let Some(previous) = self
            .history
            .previous_check(&current.lineage(), current.created_at)?
        else {
            return Ok(Vec::new());
        };
        if previous.created_at >= current.created_at {
            return Ok(Vec::new());
        }

        let attention = self.history.attention_verdicts(&previous.id)?;
        let fixes = fixes_for(&previous.id, &attention, current);
        tracing::info!(
            previous = %previous.id,
            current = %current.id,
            fixes = fixes.len(),
            "fix detection finished"
        );
        Ok(fixes)
    }
}
