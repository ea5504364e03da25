use std::fmt;

use threadline_core::{CheckReport, Fix, ReviewTarget, VerdictStatus};

/// A finished check ready for display: the target, the report, and any
/// fixes detected against the previous check.
///
/// # Examples
///
/// ```
/// use threadline_core::{CheckMetadata, CheckReport, ReviewTarget};
/// use threadline_review::report::CheckSummary;
///
/// let report = CheckReport { verdicts: vec![], metadata: CheckMetadata::default() };
/// let target = ReviewTarget::local();
/// let summary = CheckSummary::new(&target, &report, &[]);
/// assert!(summary.to_string().contains("No threadlines need attention."));
/// ```
pub struct CheckSummary<'a> {
    target: &'a ReviewTarget,
    report: &'a CheckReport,
    fixes: &'a [Fix],
}

impl<'a> CheckSummary<'a> {
    /// Bundle the pieces of a finished check.
    pub fn new(target: &'a ReviewTarget, report: &'a CheckReport, fixes: &'a [Fix]) -> Self {
        Self {
            target,
            report,
            fixes,
        }
    }

    fn counts_line(&self) -> String {
        let m = &self.report.metadata;
        format!(
            "Threadlines: {} | Completed: {} | Timed out: {} | Errors: {}",
            m.total_threadlines, m.completed, m.timed_out, m.errors
        )
    }

    /// Render the summary as markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Threadline Check\n\n");
        out.push_str(&format!("**Target:** {}\n\n", self.target));
        out.push_str(&format!("{}\n\n", self.counts_line()));

        let visible: Vec<_> = self.report.visible().collect();
        if visible.is_empty() {
            out.push_str("No threadlines need attention.\n");
        }
        for v in visible {
            let emoji = match v.status {
                VerdictStatus::Attention => "\u{26a0}\u{fe0f}",
                _ => "\u{2705}",
            };
            out.push_str(&format!("## {emoji} `{}`: {}\n\n", v.rule_id, v.status));
            if let Some(reasoning) = &v.reasoning {
                out.push_str(&format!("{reasoning}\n\n"));
            }
            if !v.file_references.is_empty() {
                let files: Vec<String> =
                    v.file_references.iter().map(|f| format!("`{f}`")).collect();
                out.push_str(&format!("**Files:** {}", files.join(", ")));
                if let Some(lines) = &v.line_references {
                    let lines: Vec<String> = lines.iter().map(u32::to_string).collect();
                    out.push_str(&format!(" (lines {})", lines.join(", ")));
                }
                out.push_str("\n\n");
            }
        }

        if !self.fixes.is_empty() {
            out.push_str(&format!("## Fixed since last check ({})\n\n", self.fixes.len()));
            for fix in self.fixes {
                out.push_str(&format!(
                    "- `{}` in {}\n",
                    short_hash(&fix.rule_identity_hash),
                    fix.violation_file_references.join(", ")
                ));
            }
        }
        out
    }
}

impl fmt::Display for CheckSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Threadline Check")?;
        writeln!(f, "================")?;
        writeln!(f, "Target: {}", self.target)?;
        writeln!(f, "{}\n", self.counts_line())?;

        let mut any = false;
        for v in self.report.visible() {
            any = true;
            let label = match v.status {
                VerdictStatus::Attention => "ATTENTION",
                VerdictStatus::Compliant => "COMPLIANT",
                VerdictStatus::NotRelevant => "NOT RELEVANT",
            };
            writeln!(f, "[{label}] {}", v.rule_id)?;
            if let Some(reasoning) = &v.reasoning {
                writeln!(f, "  {reasoning}")?;
            }
            if !v.file_references.is_empty() {
                writeln!(f, "  Files: {}", v.file_references.join(", "))?;
            }
            writeln!(f)?;
        }
        if !any {
            writeln!(f, "No threadlines need attention.")?;
        }

        if !self.fixes.is_empty() {
            writeln!(f, "Fixed since last check: {}", self.fixes.len())?;
            for fix in self.fixes {
                writeln!(
                    f,
                    "  {} ({})",
                    short_hash(&fix.rule_identity_hash),
                    fix.violation_file_references.join(", ")
                )?;
            }
        }
        Ok(())
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
