use std::collections::HashSet;
use std::fmt;

use threadline_core::ThreadlineError;

/// One file's slice of a unified diff: its header lines plus every hunk,
/// borrowed verbatim from the source text.
///
/// # Examples
///
/// ```
/// use threadline_difflens::parser::parse;
///
/// let diff = "diff --git a/hello.rs b/hello.rs\n\
///             --- a/hello.rs\n\
///             +++ b/hello.rs\n\
///             @@ -1,2 +1,3 @@\n\
///              fn main() {\n\
///             +    println!(\"hello\");\n\
///              }\n";
/// let files: Vec<_> = parse(diff).collect();
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].path(), Some("hello.rs"));
/// assert_eq!(files[0].hunks().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection<'a> {
    /// Path before the change, `None` for new files.
    pub old_path: Option<String>,
    /// Path after the change, `None` for deleted files.
    pub new_path: Option<String>,
    /// Whether this is a newly created file.
    pub is_new_file: bool,
    /// Whether this file was deleted.
    pub is_deleted_file: bool,
    /// Whether this file was renamed or copied.
    pub is_rename: bool,
    /// Whether git reported the file as binary.
    pub is_binary: bool,
    /// The section's text exactly as it appears in the diff.
    pub raw: &'a str,
}

impl<'a> FileSection<'a> {
    fn new(raw: &'a str) -> Self {
        let mut header_paths: Option<(String, String)> = None;
        let mut old: Option<String> = None;
        let mut new: Option<String> = None;
        let mut old_seen = false;
        let mut new_seen = false;
        let mut is_new_file = false;
        let mut is_deleted_file = false;
        let mut is_rename = false;
        let mut is_binary = false;

        for line in raw.lines() {
            if line.starts_with("@@ ") {
                break;
            }
            if let Some(rest) = line.strip_prefix("diff --git ") {
                header_paths = parse_git_header(rest);
            } else if line.starts_with("new file mode") {
                is_new_file = true;
            } else if line.starts_with("deleted file mode") {
                is_deleted_file = true;
            } else if let Some(p) = line
                .strip_prefix("rename from ")
                .or_else(|| line.strip_prefix("copy from "))
            {
                is_rename = true;
                old = Some(p.trim_matches('"').to_string());
                old_seen = true;
            } else if let Some(p) = line
                .strip_prefix("rename to ")
                .or_else(|| line.strip_prefix("copy to "))
            {
                is_rename = true;
                new = Some(p.trim_matches('"').to_string());
                new_seen = true;
            } else if line.starts_with("Binary files ") && line.ends_with(" differ") {
                is_binary = true;
            } else if let Some(p) = line.strip_prefix("--- ") {
                old = parse_path(p);
                old_seen = true;
                is_new_file |= old.is_none();
            } else if let Some(p) = line.strip_prefix("+++ ") {
                new = parse_path(p);
                new_seen = true;
                is_deleted_file |= new.is_none();
            }
        }

        let (header_old, header_new) = match header_paths {
            Some((a, b)) => (Some(a), Some(b)),
            None => (None, None),
        };
        let old_path = if old_seen {
            old
        } else if is_new_file {
            None
        } else {
            header_old
        };
        let new_path = if new_seen {
            new
        } else if is_deleted_file {
            None
        } else {
            header_new
        };

        Self {
            old_path,
            new_path,
            is_new_file,
            is_deleted_file,
            is_rename,
            is_binary,
            raw,
        }
    }

    /// The file's identifying path: the new path, or the old path for deletions.
    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }

    /// Whether `candidate` names this file before or after the change.
    pub fn touches(&self, candidate: &str) -> bool {
        self.new_path.as_deref() == Some(candidate) || self.old_path.as_deref() == Some(candidate)
    }

    /// Parse this section's hunks.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Parse`] if a hunk header is malformed.
    pub fn hunks(&self) -> Result<Vec<DiffHunk>, ThreadlineError> {
        let mut hunks = Vec::new();
        let mut current: Option<DiffHunk> = None;

        for line in self.raw.lines() {
            if line.starts_with("@@ ") {
                if let Some(h) = current.take() {
                    hunks.push(h);
                }
                let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(line)?;
                current = Some(DiffHunk {
                    old_start,
                    old_lines,
                    new_start,
                    new_lines,
                    content: String::new(),
                });
                continue;
            }

            if line == "\\ No newline at end of file" {
                continue;
            }

            if let Some(hunk) = current.as_mut() {
                if line.starts_with('+') || line.starts_with('-') || line.starts_with(' ') {
                    hunk.content.push_str(line);
                    hunk.content.push('\n');
                }
            }
        }

        if let Some(h) = current.take() {
            hunks.push(h);
        }
        Ok(hunks)
    }
}

impl fmt::Display for FileSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old_path, &self.new_path) {
            (Some(old), Some(new)) if old != new => write!(f, "{old} -> {new}"),
            _ => write!(f, "{}", self.path().unwrap_or("<unknown>")),
        }
    }
}

/// A single hunk from a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
    /// Body lines (`+`, `-`, and context), newline-terminated.
    pub content: String,
}

/// Lazy iterator over the [`FileSection`]s of a diff.
///
/// Cloning the iterator restarts nothing and shares nothing: each clone walks
/// the same borrowed text independently.
#[derive(Debug, Clone)]
pub struct Sections<'a> {
    text: &'a str,
    pos: usize,
    git_mode: bool,
}

impl<'a> Iterator for Sections<'a> {
    type Item = FileSection<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.text;
        let mut cursor = self.pos;
        let mut start = None;
        let mut hunk = HunkTracker::default();

        while cursor < text.len() {
            let line = line_at(text, cursor);
            let following = line_at(text, cursor + line.len());
            if start.is_none() {
                if is_section_start(line, following, self.git_mode) {
                    start = Some(cursor);
                }
            } else if !hunk.in_body() && is_section_start(line, following, self.git_mode) {
                break;
            } else if !self.git_mode {
                hunk.observe(line);
            }
            cursor += line.len();
        }

        self.pos = cursor;
        let start = start?;
        Some(FileSection::new(&text[start..cursor]))
    }
}

/// Split a unified diff into per-file sections, lazily.
///
/// Accepts `git diff` output as well as plain `---`/`+++` patches. Any text
/// before the first file header (for example a commit message) is skipped.
///
/// # Examples
///
/// ```
/// use threadline_difflens::parser::parse;
///
/// assert_eq!(parse("").count(), 0);
/// ```
pub fn parse(diff: &str) -> Sections<'_> {
    Sections {
        text: diff,
        pos: 0,
        git_mode: diff.lines().any(|l| l.starts_with("diff --git ")),
    }
}

/// Paths touched by the diff, in order of first appearance, without duplicates.
///
/// Deleted files are reported by their old path, everything else by its new
/// path.
///
/// # Examples
///
/// ```
/// use threadline_difflens::parser::files_touched;
///
/// let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-x\n+y\n";
/// assert_eq!(files_touched(diff), vec!["a.ts"]);
/// ```
pub fn files_touched(diff: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for section in parse(diff) {
        if let Some(path) = section.path() {
            if seen.insert(path.to_string()) {
                files.push(path.to_string());
            }
        }
    }
    files
}

/// Restrict a diff to the files in `allowed`, keeping each matching file's
/// header and hunks verbatim and in their original order.
///
/// Renamed files match on either their old or new path. An empty `allowed`
/// set, or a diff with no matching files, yields an empty string.
///
/// # Examples
///
/// ```
/// use threadline_difflens::parser::filter_by_files;
///
/// let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -1 +1 @@\n-x\n+y\n";
/// assert_eq!(filter_by_files(diff, &["a.ts"]), diff);
/// assert_eq!(filter_by_files(diff, &["b.ts"]), "");
/// assert_eq!(filter_by_files(diff, &[] as &[&str]), "");
/// ```
pub fn filter_by_files<S: AsRef<str>>(diff: &str, allowed: &[S]) -> String {
    if allowed.is_empty() {
        return String::new();
    }
    let allowed: HashSet<&str> = allowed.iter().map(|s| s.as_ref()).collect();

    let mut out = String::new();
    for section in parse(diff) {
        let keep = section
            .old_path
            .iter()
            .chain(section.new_path.iter())
            .any(|p| allowed.contains(p.as_str()));
        if keep {
            out.push_str(section.raw);
        }
    }
    out
}

#[derive(Default)]
struct HunkTracker {
    old_left: u32,
    new_left: u32,
}

impl HunkTracker {
    fn in_body(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }

    fn observe(&mut self, line: &str) {
        if !self.in_body() {
            if line.starts_with("@@ ") {
                if let Ok((_, old_lines, _, new_lines)) = parse_hunk_header(line.trim_end()) {
                    self.old_left = old_lines;
                    self.new_left = new_lines;
                }
            }
            return;
        }

        match line.as_bytes().first() {
            Some(b' ') | Some(b'\n') | Some(b'\r') => {
                self.old_left = self.old_left.saturating_sub(1);
                self.new_left = self.new_left.saturating_sub(1);
            }
            Some(b'-') => self.old_left = self.old_left.saturating_sub(1),
            Some(b'+') => self.new_left = self.new_left.saturating_sub(1),
            Some(b'\\') => {}
            // Counts disagree with the body; stop trusting them.
            _ => {
                self.old_left = 0;
                self.new_left = 0;
            }
        }
    }
}

fn line_at(text: &str, at: usize) -> &str {
    let rest = &text[at.min(text.len())..];
    match rest.find('\n') {
        Some(i) => &rest[..=i],
        None => rest,
    }
}

fn is_section_start(line: &str, following: &str, git_mode: bool) -> bool {
    if git_mode {
        line.starts_with("diff --git ")
    } else {
        line.starts_with("--- ") && following.starts_with("+++ ")
    }
}

fn parse_git_header(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim_end();
    if let Some(stripped) = rest.strip_prefix('"') {
        // "a/x y" "b/x y"
        let (old, tail) = stripped.split_once("\" ")?;
        let new = tail.trim_matches('"');
        return Some((strip_side(old).to_string(), strip_side(new).to_string()));
    }

    let candidates: Vec<usize> = rest.match_indices(" b/").map(|(i, _)| i).collect();
    let split = candidates
        .iter()
        .copied()
        .find(|&i| strip_side(&rest[..i]) == strip_side(&rest[i + 1..]))
        .or_else(|| candidates.first().copied())?;
    Some((
        strip_side(&rest[..split]).to_string(),
        strip_side(&rest[split + 1..]).to_string(),
    ))
}

fn strip_side(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

fn parse_path(raw: &str) -> Option<String> {
    // Some tools append a tab and timestamp after the path.
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    let normalized = raw.trim_matches('"');

    if normalized == "/dev/null" {
        return None;
    }

    Some(strip_side(normalized).to_string())
}

fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32), ThreadlineError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| ThreadlineError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(ThreadlineError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| ThreadlineError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| ThreadlineError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), ThreadlineError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| ThreadlineError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| ThreadlineError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| ThreadlineError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}
