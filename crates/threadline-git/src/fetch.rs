//! Unified-diff extraction via git2.
//!
//! Turns a resolved [`ReviewTarget`] into patch text plus the list of
//! touched files, the two inputs a check needs.

use std::path::Path;

use git2::{Commit, Diff, DiffFindOptions, DiffFormat, DiffOptions, Repository, Tree};
use threadline_core::{ReviewTarget, TargetKind, ThreadlineError};
use threadline_difflens::parser::files_touched;

/// Which local changes a local-mode fetch picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSource {
    /// Changes staged in the index.
    Staged,
    /// Working-tree changes not yet staged.
    Unstaged,
}

/// A diff ready to be checked.
///
/// # Examples
///
/// ```
/// use threadline_git::fetch::FetchedDiff;
///
/// let diff = FetchedDiff::from_text("diff --git a/x.rs b/x.rs\n--- a/x.rs\n+++ b/x.rs\n@@ -1 +1 @@\n-a\n+b\n");
/// assert_eq!(diff.files, vec!["x.rs"]);
/// assert!(!diff.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDiff {
    /// Unified diff text.
    pub text: String,
    /// Touched files in order of first appearance.
    pub files: Vec<String>,
    /// Set for local targets.
    pub local_source: Option<LocalSource>,
}

impl FetchedDiff {
    /// Wrap externally supplied diff text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let files = files_touched(&text);
        Self {
            text,
            files,
            local_source: None,
        }
    }

    /// Whether the diff touches nothing.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Compute the diff for `target` in the repository containing `repo_path`.
///
/// - Pull/merge requests diff the merge base of target and source against
///   the source tip. Branch names fall back to `origin/<name>`.
/// - Branches diff against their merge base with `default_branch`, or
///   against their parent commit when that is unavailable or empty.
/// - Commits diff against their first parent (the empty tree for roots).
/// - Local diffs staged changes, else unstaged changes.
///
/// # Errors
///
/// Returns [`ThreadlineError::Git`] when the repository cannot be opened or
/// a reference does not resolve.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use threadline_core::ReviewTarget;
/// use threadline_git::fetch::fetch_diff;
///
/// let diff = fetch_diff(Path::new("."), &ReviewTarget::local(), "main").unwrap();
/// println!("{} files changed", diff.files.len());
/// ```
pub fn fetch_diff(
    repo_path: &Path,
    target: &ReviewTarget,
    default_branch: &str,
) -> Result<FetchedDiff, ThreadlineError> {
    let repo = Repository::discover(repo_path)
        .map_err(|e| ThreadlineError::Git(format!("failed to open repository: {e}")))?;

    let primary = || {
        target
            .primary_ref
            .as_deref()
            .ok_or_else(|| ThreadlineError::Git(format!("{} target has no reference", target.kind)))
    };

    let (text, local_source) = match target.kind {
        TargetKind::PullRequest | TargetKind::MergeRequest => {
            let source_name = target.secondary_ref.as_deref().ok_or_else(|| {
                ThreadlineError::Git(format!("{} target has no source branch", target.kind))
            })?;
            let base = resolve_commit(&repo, primary()?)?;
            let source = resolve_commit(&repo, source_name)?;
            let from = merge_base_commit(&repo, &base, &source).unwrap_or(base);
            (diff_commits(&repo, Some(&from), &source)?, None)
        }
        TargetKind::Branch => (branch_diff(&repo, primary()?, default_branch)?, None),
        TargetKind::Commit => {
            let commit = resolve_commit(&repo, primary()?)?;
            let parent = first_parent(&commit)?;
            (diff_commits(&repo, parent.as_ref(), &commit)?, None)
        }
        TargetKind::Local => {
            let (text, source) = local_diff(&repo)?;
            (text, Some(source))
        }
    };

    let files = files_touched(&text);
    tracing::debug!(review = %target, files = files.len(), "fetched diff");
    Ok(FetchedDiff {
        text,
        files,
        local_source,
    })
}

/// Short name of the branch HEAD points at, if any.
pub fn current_branch(repo_path: &Path) -> Option<String> {
    let repo = Repository::discover(repo_path).ok()?;
    let head = repo.head().ok()?;
    if !head.is_branch() {
        return None;
    }
    head.shorthand().map(str::to_string)
}

fn branch_diff(
    repo: &Repository,
    branch: &str,
    default_branch: &str,
) -> Result<String, ThreadlineError> {
    let tip = resolve_commit(repo, branch)?;

    if branch != default_branch {
        if let Ok(default_tip) = resolve_commit(repo, default_branch) {
            if let Some(base) = merge_base_commit(repo, &default_tip, &tip) {
                if base.id() != tip.id() {
                    return diff_commits(repo, Some(&base), &tip);
                }
            }
        }
    }

    let parent = first_parent(&tip)?;
    diff_commits(repo, parent.as_ref(), &tip)
}

fn local_diff(repo: &Repository) -> Result<(String, LocalSource), ThreadlineError> {
    let head_tree = head_tree(repo)?;
    let mut opts = diff_options();
    let staged = repo
        .diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))
        .map_err(|e| ThreadlineError::Git(format!("failed to diff index: {e}")))?;
    let text = render(staged)?;
    if !text.is_empty() {
        return Ok((text, LocalSource::Staged));
    }

    let mut opts = diff_options();
    let unstaged = repo
        .diff_index_to_workdir(None, Some(&mut opts))
        .map_err(|e| ThreadlineError::Git(format!("failed to diff working tree: {e}")))?;
    Ok((render(unstaged)?, LocalSource::Unstaged))
}

fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, ThreadlineError> {
    match repo.head() {
        Ok(head) => head
            .peel_to_tree()
            .map(Some)
            .map_err(|e| ThreadlineError::Git(format!("failed to read HEAD tree: {e}"))),
        // Fresh repository with no commits yet.
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(ThreadlineError::Git(format!("failed to read HEAD: {e}"))),
    }
}

/// Resolve a branch name, tag, or SHA to a commit, trying `origin/<name>`
/// when the local name is missing.
fn resolve_commit<'r>(repo: &'r Repository, name: &str) -> Result<Commit<'r>, ThreadlineError> {
    let candidates = [name.to_string(), format!("origin/{name}")];
    for rev in &candidates {
        if let Ok(object) = repo.revparse_single(rev) {
            return object.peel_to_commit().map_err(|e| {
                ThreadlineError::Git(format!("'{rev}' does not point at a commit: {e}"))
            });
        }
    }
    Err(ThreadlineError::Git(format!(
        "failed to resolve reference '{name}'"
    )))
}

fn merge_base_commit<'r>(
    repo: &'r Repository,
    a: &Commit<'r>,
    b: &Commit<'r>,
) -> Option<Commit<'r>> {
    let oid = repo.merge_base(a.id(), b.id()).ok()?;
    repo.find_commit(oid).ok()
}

fn first_parent<'r>(commit: &Commit<'r>) -> Result<Option<Commit<'r>>, ThreadlineError> {
    if commit.parent_count() == 0 {
        return Ok(None);
    }
    commit
        .parent(0)
        .map(Some)
        .map_err(|e| ThreadlineError::Git(format!("failed to get parent: {e}")))
}

fn diff_commits(
    repo: &Repository,
    from: Option<&Commit<'_>>,
    to: &Commit<'_>,
) -> Result<String, ThreadlineError> {
    let old_tree = from
        .map(|c| c.tree())
        .transpose()
        .map_err(|e| ThreadlineError::Git(format!("failed to get base tree: {e}")))?;
    let new_tree = to
        .tree()
        .map_err(|e| ThreadlineError::Git(format!("failed to get commit tree: {e}")))?;

    let mut opts = diff_options();
    let diff = repo
        .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))
        .map_err(|e| ThreadlineError::Git(format!("failed to compute diff: {e}")))?;
    render(diff)
}

fn diff_options() -> DiffOptions {
    let mut opts = DiffOptions::new();
    opts.context_lines(3);
    opts
}

/// Print `diff` as patch text, with rename detection.
fn render(mut diff: Diff<'_>) -> Result<String, ThreadlineError> {
    let mut find_opts = DiffFindOptions::new();
    find_opts.renames(true);
    diff.find_similar(Some(&mut find_opts))
        .map_err(|e| ThreadlineError::Git(format!("failed to detect renames: {e}")))?;

    let mut text = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            text.push(line.origin());
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })
    .map_err(|e| ThreadlineError::Git(format!("failed to render diff: {e}")))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Oid, Signature};

    /// Commit `files` on top of `parent` directly to `refname`, without
    /// touching the working tree.
    fn commit_files(
        repo: &Repository,
        refname: &str,
        parent: Option<Oid>,
        files: &[(&str, &str)],
    ) -> Oid {
        let parent = parent.map(|oid| repo.find_commit(oid).unwrap());
        let base_tree = parent.as_ref().map(|p| p.tree().unwrap());
        let mut builder = repo.treebuilder(base_tree.as_ref()).unwrap();
        for (name, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(*name, blob, 0o100644).unwrap();
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        repo.commit(Some(refname), &sig, &sig, "test", &tree, &parents)
            .unwrap()
    }

    /// main: base -> later; feature: base -> feat
    fn branching_repo() -> (tempfile::TempDir, Repository, Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let base = commit_files(&repo, "refs/heads/main", None, &[("shared.ts", "one\n")]);
        commit_files(&repo, "refs/heads/main", Some(base), &[("main_only.ts", "m\n")]);
        let feat = commit_files(
            &repo,
            "refs/heads/feature",
            Some(base),
            &[("shared.ts", "one\ntwo\n"), ("new.ts", "n\n")],
        );
        (dir, repo, feat)
    }

    #[test]
    fn pull_request_diffs_from_merge_base() {
        let (dir, _repo, _) = branching_repo();
        let target = ReviewTarget::pull_request("main", "feature", None);
        let diff = fetch_diff(dir.path(), &target, "main").unwrap();
        assert_eq!(diff.files, vec!["new.ts", "shared.ts"]);
        assert!(diff.text.contains("+two"));
        assert!(!diff.text.contains("main_only.ts"));
    }

    #[test]
    fn request_refs_fall_back_to_origin() {
        let (dir, repo, feat) = branching_repo();
        repo.reference("refs/remotes/origin/review", feat, true, "test")
            .unwrap();
        let target = ReviewTarget::merge_request("main", "review", None);
        let diff = fetch_diff(dir.path(), &target, "main").unwrap();
        assert!(diff.files.contains(&"new.ts".to_string()));
    }

    #[test]
    fn branch_diffs_against_default_branch() {
        let (dir, _repo, _) = branching_repo();
        let diff = fetch_diff(dir.path(), &ReviewTarget::branch("feature"), "main").unwrap();
        assert_eq!(diff.files, vec!["new.ts", "shared.ts"]);
    }

    #[test]
    fn default_branch_diffs_against_previous_commit() {
        let (dir, _repo, _) = branching_repo();
        let diff = fetch_diff(dir.path(), &ReviewTarget::branch("main"), "main").unwrap();
        assert_eq!(diff.files, vec!["main_only.ts"]);
    }

    #[test]
    fn commit_diffs_against_parent() {
        let (dir, _repo, feat) = branching_repo();
        let diff =
            fetch_diff(dir.path(), &ReviewTarget::commit(&feat.to_string()), "main").unwrap();
        assert_eq!(diff.files, vec!["new.ts", "shared.ts"]);
    }

    #[test]
    fn root_commit_diffs_against_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let root = commit_files(&repo, "refs/heads/main", None, &[("a.ts", "a\n")]);
        let diff =
            fetch_diff(dir.path(), &ReviewTarget::commit(&root.to_string()), "main").unwrap();
        assert_eq!(diff.files, vec!["a.ts"]);
        assert!(diff.text.contains("new file mode"));
    }

    #[test]
    fn unknown_reference_is_a_git_error() {
        let (dir, _repo, _) = branching_repo();
        let err = fetch_diff(dir.path(), &ReviewTarget::branch("nope"), "main").unwrap_err();
        assert!(matches!(err, ThreadlineError::Git(_)));
    }

    fn local_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.ts"), "one\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("a.ts")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("Test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        (dir, repo)
    }

    #[test]
    fn local_prefers_staged_changes() {
        let (dir, repo) = local_repo();
        std::fs::write(dir.path().join("a.ts"), "two\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.ts")).unwrap();
        index.write().unwrap();
        std::fs::write(dir.path().join("a.ts"), "three\n").unwrap();

        let diff = fetch_diff(dir.path(), &ReviewTarget::local(), "main").unwrap();
        assert_eq!(diff.local_source, Some(LocalSource::Staged));
        assert!(diff.text.contains("+two"));
        assert!(!diff.text.contains("+three"));
    }

    #[test]
    fn local_falls_back_to_unstaged_changes() {
        let (dir, _repo) = local_repo();
        std::fs::write(dir.path().join("a.ts"), "one\ntwo\n").unwrap();

        let diff = fetch_diff(dir.path(), &ReviewTarget::local(), "main").unwrap();
        assert_eq!(diff.local_source, Some(LocalSource::Unstaged));
        assert_eq!(diff.files, vec!["a.ts"]);
        assert!(diff.text.contains("+two"));
    }

    #[test]
    fn current_branch_reads_head() {
        let (dir, repo) = local_repo();
        let expected = repo.head().unwrap().shorthand().unwrap().to_string();
        assert_eq!(current_branch(dir.path()), Some(expected));
    }

    #[test]
    fn clean_tree_gives_empty_diff() {
        let (dir, _repo) = local_repo();
        let diff = fetch_diff(dir.path(), &ReviewTarget::local(), "main").unwrap();
        assert!(diff.is_empty());
        assert!(diff.text.is_empty());
    }
}
