//! Joins the diff that introduced a violation with the diff that fixed it.

/// Combine an older "introduction" diff with a newer "fix" diff for display.
///
/// If either side is blank the other is returned unchanged; otherwise the two
/// are concatenated, older first, separated by a blank line. No hunk-level
/// merging is attempted.
///
/// # Examples
///
/// ```
/// use threadline_difflens::combine::combine_diffs;
///
/// assert_eq!(combine_diffs("", "+fix\n"), "+fix\n");
/// assert_eq!(combine_diffs("+bug\n", ""), "+bug\n");
/// assert_eq!(combine_diffs("+bug\n", "-bug\n"), "+bug\n\n-bug\n");
/// ```
pub fn combine_diffs(introduction: &str, fix: &str) -> String {
    if introduction.trim().is_empty() {
        return fix.to_string();
    }
    if fix.trim().is_empty() {
        return introduction.to_string();
    }

    let separator = if introduction.ends_with('\n') { "\n" } else { "\n\n" };
    let mut combined = String::with_capacity(introduction.len() + separator.len() + fix.len());
    combined.push_str(introduction);
    combined.push_str(separator);
    combined.push_str(fix);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTRO: &str = "diff --git a/a.ts b/a.ts\n--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-ok\n+eval(x)\n";
    const FIX: &str = "diff --git a/a.ts b/a.ts\n--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-eval(x)\n+ok\n";

    #[test]
    fn empty_side_returns_other() {
        assert_eq!(combine_diffs("", FIX), FIX);
        assert_eq!(combine_diffs(INTRO, ""), INTRO);
        assert_eq!(combine_diffs("", ""), "");
    }

    #[test]
    fn whitespace_only_counts_as_empty() {
        assert_eq!(combine_diffs("\n  \n", FIX), FIX);
    }

    #[test]
    fn both_present_in_order_with_blank_line() {
        let combined = combine_diffs(INTRO, FIX);
        assert!(combined.contains(INTRO));
        assert!(combined.contains(FIX));
        assert!(combined.find(INTRO).unwrap() < combined.rfind(FIX).unwrap());
        assert!(combined.contains("+eval(x)\n\ndiff --git"));
    }

    #[test]
    fn missing_trailing_newline_still_separated() {
        assert_eq!(combine_diffs("+a", "+b"), "+a\n\n+b");
    }
}
