use std::path::Path;

use serde::Deserialize;

use crate::error::ThreadlineError;
use crate::types::{ContextFile, RuleDocument};

const FRONT_MATTER_FENCE: &str = "+++";

#[derive(Deserialize)]
struct FrontMatter {
    id: Option<String>,
    version: Option<toml::Value>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    context_files: Vec<String>,
}

/// Parse a rule document: TOML front matter between `+++` fences, followed
/// by the markdown body.
///
/// Context files are returned with empty content; [`load_rules`] fills them in.
///
/// # Errors
///
/// Returns [`ThreadlineError::Parse`] when the front matter is missing or
/// unterminated, has no `id`, or lists no patterns.
///
/// # Examples
///
/// ```
/// use threadline_core::rules::parse_rule_document;
///
/// let doc = "+++\nid = \"tests\"\npatterns = [\"src/**/*.ts\"]\n+++\nEvery module needs a test.\n";
/// let rule = parse_rule_document(doc).unwrap();
/// assert_eq!(rule.id, "tests");
/// assert_eq!(rule.version, "1");
/// assert_eq!(rule.body, "Every module needs a test.");
/// ```
pub fn parse_rule_document(content: &str) -> Result<RuleDocument, ThreadlineError> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let rest = trimmed
        .strip_prefix(FRONT_MATTER_FENCE)
        .ok_or_else(|| ThreadlineError::Parse("rule document has no +++ front matter".into()))?;

    let mut header = String::new();
    let mut body_lines = Vec::new();
    let mut closed = false;
    for line in rest.lines().skip(1) {
        if closed {
            body_lines.push(line);
        } else if line.trim() == FRONT_MATTER_FENCE {
            closed = true;
        } else {
            header.push_str(line);
            header.push('\n');
        }
    }
    if !closed {
        return Err(ThreadlineError::Parse(
            "rule document front matter is not terminated".into(),
        ));
    }

    let front: FrontMatter = toml::from_str(&header)?;
    let id = front
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ThreadlineError::Parse("rule document is missing `id`".into()))?;

    let patterns: Vec<String> = front
        .patterns
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return Err(ThreadlineError::Parse(format!(
            "rule `{id}` declares no patterns"
        )));
    }

    // Versions are often written as bare numbers.
    let version = match front.version {
        Some(toml::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "1".to_string(),
    };

    Ok(RuleDocument {
        id,
        version,
        patterns,
        body: body_lines.join("\n").trim().to_string(),
        context_files: front
            .context_files
            .into_iter()
            .map(|path| ContextFile {
                path,
                content: String::new(),
            })
            .collect(),
    })
}

/// Load every `*.md` rule document in `dir`, sorted by file name.
///
/// Context files are read relative to `repo_root`; a missing context file is
/// logged and carried with empty content.
///
/// # Errors
///
/// Returns [`ThreadlineError::FileNotFound`] if `dir` does not exist, and
/// propagates read and parse failures with the offending path.
pub fn load_rules(dir: &Path, repo_root: &Path) -> Result<Vec<RuleDocument>, ThreadlineError> {
    if !dir.is_dir() {
        return Err(ThreadlineError::FileNotFound(dir.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rules = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let mut rule = parse_rule_document(&content).map_err(|e| {
            ThreadlineError::Parse(format!("{}: {e}", path.display()))
        })?;
        for ctx in &mut rule.context_files {
            match std::fs::read_to_string(repo_root.join(&ctx.path)) {
                Ok(text) => ctx.content = text,
                Err(e) => tracing::warn!(
                    rule = %rule.id,
                    path = %ctx.path,
                    error = %e,
                    "context file unavailable"
                ),
            }
        }
        rules.push(rule);
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_front_matter() {
        let doc = r#"+++
id = "no-raw-sql"
version = "1.2.0"
patterns = ["src/**/*.rs", "migrations/*.sql"]
context_files = ["docs/db.md"]
+++
# Queries

Use the query builder instead of string SQL.
"#;
        let rule = parse_rule_document(doc).unwrap();
        assert_eq!(rule.id, "no-raw-sql");
        assert_eq!(rule.version, "1.2.0");
        assert_eq!(rule.patterns, vec!["src/**/*.rs", "migrations/*.sql"]);
        assert_eq!(rule.context_files.len(), 1);
        assert_eq!(rule.context_files[0].path, "docs/db.md");
        assert!(rule.body.starts_with("# Queries"));
        assert!(rule.body.ends_with("string SQL."));
    }

    #[test]
    fn numeric_version_is_stringified() {
        let doc = "+++\nid = \"a\"\nversion = 3\npatterns = [\"*\"]\n+++\nbody";
        let rule = parse_rule_document(doc).unwrap();
        assert_eq!(rule.version, "3");
    }

    #[test]
    fn missing_front_matter_is_rejected() {
        let err = parse_rule_document("# Just markdown").unwrap_err();
        assert!(err.to_string().contains("front matter"));
    }

    #[test]
    fn unterminated_front_matter_is_rejected() {
        let err = parse_rule_document("+++\nid = \"a\"\npatterns = [\"*\"]\n").unwrap_err();
        assert!(err.to_string().contains("not terminated"));
    }

    #[test]
    fn missing_id_or_patterns_is_rejected() {
        assert!(parse_rule_document("+++\npatterns = [\"*\"]\n+++\nx").is_err());
        let err = parse_rule_document("+++\nid = \"a\"\n+++\nx").unwrap_err();
        assert!(err.to_string().contains("no patterns"));
    }

    #[test]
    fn load_rules_sorted_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let rules_dir = dir.path().join(".threadlines");
        std::fs::create_dir_all(&rules_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/style.md"), "Prefer const.").unwrap();
        std::fs::write(
            rules_dir.join("b-style.md"),
            "+++\nid = \"style\"\npatterns = [\"**/*.ts\"]\ncontext_files = [\"docs/style.md\", \"docs/gone.md\"]\n+++\nStyle.",
        )
        .unwrap();
        std::fs::write(
            rules_dir.join("a-docs.md"),
            "+++\nid = \"docs\"\npatterns = [\"**/*.md\"]\n+++\nDocs.",
        )
        .unwrap();
        std::fs::write(rules_dir.join("notes.txt"), "ignored").unwrap();

        let rules = load_rules(&rules_dir, dir.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "docs");
        assert_eq!(rules[1].id, "style");
        assert_eq!(rules[1].context_files[0].content, "Prefer const.");
        assert!(rules[1].context_files[1].content.is_empty());
    }

    #[test]
    fn load_rules_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_rules(&dir.path().join("nope"), dir.path());
        assert!(matches!(result, Err(ThreadlineError::FileNotFound(_))));
    }
}
