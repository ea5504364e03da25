//! Glob scoping for rules.
//!
//! Patterns are matched against whole repository-relative paths: `**` spans
//! any number of segments (including none), `*` and `?` never cross a `/`.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether `path` is matched by the glob `pattern`.
///
/// An invalid pattern matches nothing.
///
/// # Examples
///
/// ```
/// use threadline_difflens::pattern::matches;
///
/// assert!(matches("src/a.ts", "src/*.ts"));
/// assert!(!matches("src/sub/a.ts", "src/*.ts"));
/// assert!(matches("src/sub/a.ts", "src/**/*.ts"));
/// assert!(matches("src/a.ts", "src/**/*.ts"));
/// ```
pub fn matches(path: &str, pattern: &str) -> bool {
    match Pattern::new(normalize(pattern)) {
        Ok(p) => p.matches_with(normalize(path), MATCH_OPTIONS),
        Err(_) => false,
    }
}

/// A rule's compiled pattern list.
///
/// # Examples
///
/// ```
/// use threadline_difflens::pattern::PatternSet;
///
/// let set = PatternSet::new(&["**/*.ts", "docs/**"]);
/// let files = vec!["a.ts".to_string(), "b.md".to_string(), "docs/c.md".to_string()];
/// assert_eq!(set.in_scope(&files), vec!["a.ts", "docs/c.md"]);
/// ```
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    invalid: Vec<String>,
}

impl PatternSet {
    /// Compile `patterns`, setting aside any that are not valid globs.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut invalid = Vec::new();
        for raw in patterns {
            match Pattern::new(normalize(raw.as_ref())) {
                Ok(p) => compiled.push(p),
                Err(_) => invalid.push(raw.as_ref().to_string()),
            }
        }
        Self {
            patterns: compiled,
            invalid,
        }
    }

    /// Patterns that failed to compile.
    pub fn invalid(&self) -> &[String] {
        &self.invalid
    }

    /// Whether any pattern matches `path`.
    pub fn is_match(&self, path: &str) -> bool {
        let path = normalize(path);
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// The subset of `files` matched by at least one pattern, in input order.
    pub fn in_scope<S: AsRef<str>>(&self, files: &[S]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.as_ref())
            .filter(|f| self.is_match(f))
            .map(str::to_string)
            .collect()
    }
}

fn normalize(path: &str) -> &str {
    path.trim().trim_start_matches("./")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_stays_in_segment() {
        assert!(matches("src/a.ts", "src/*.ts"));
        assert!(!matches("src/sub/a.ts", "src/*.ts"));
        assert!(!matches("a.ts", "src/*.ts"));
    }

    #[test]
    fn double_star_spans_zero_or_more_segments() {
        assert!(matches("a.ts", "**/*.ts"));
        assert!(matches("x/y/z/a.ts", "**/*.ts"));
        assert!(matches("src/a.ts", "src/**/*.ts"));
        assert!(matches("src/deep/er/a.ts", "src/**/*.ts"));
        assert!(matches("docs/guide/intro.md", "docs/**"));
    }

    #[test]
    fn question_mark_is_one_char() {
        assert!(matches("a1.ts", "a?.ts"));
        assert!(!matches("a12.ts", "a?.ts"));
        assert!(!matches("a/.ts", "a?.ts"));
    }

    #[test]
    fn anchored_not_substring() {
        assert!(!matches("lib/src/a.ts", "src/*.ts"));
        assert!(!matches("src/a.tsx", "src/*.ts"));
        assert!(!matches("src/a.ts.bak", "**/*.ts"));
    }

    #[test]
    fn leading_dot_slash_ignored() {
        assert!(matches("./src/a.ts", "src/*.ts"));
        assert!(matches("src/a.ts", "./src/*.ts"));
    }

    #[test]
    fn dotfiles_match_wildcards() {
        assert!(matches(".github/workflows/ci.yml", "**/*.yml"));
    }

    #[test]
    fn invalid_pattern_matches_nothing() {
        assert!(!matches("a.ts", "src/[.ts"));
        let set = PatternSet::new(&["src/[.ts", "**/*.ts"]);
        assert_eq!(set.invalid(), &["src/[.ts".to_string()]);
        assert!(set.is_match("a.ts"));
    }

    #[test]
    fn in_scope_is_union_in_input_order() {
        let set = PatternSet::new(&["**/*.md", "**/*.ts"]);
        let files = ["b.ts", "a.md", "c.rs", "d.ts"];
        assert_eq!(set.in_scope(&files), vec!["b.ts", "a.md", "d.ts"]);
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = PatternSet::new(&[] as &[&str]);
        assert!(set.in_scope(&["a.ts"]).is_empty());
    }
}
