//! Glob-based include/exclude filter rules for the scanner and reconciler.
//!
//! Rules are one per line: `*`, `?`, `[...]` globs via the `glob` crate's
//! pattern matcher, `#`-prefixed lines are comments, a leading `/` anchors
//! the rule to the logical root, `**/` is a prefix wildcard matching any
//! depth, and a trailing `/` restricts the rule to directories.

use glob::Pattern;

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    anchored: bool,
    dirs_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<Rule>,
}

impl FilterSet {
    /// Parses filter rules from `#`-commented, newline-separated text.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let anchored = line.starts_with('/');
            let mut body = line.trim_start_matches('/').to_string();
            let dirs_only = body.ends_with('/');
            if dirs_only {
                body.pop();
            }
            let body = body.strip_prefix("**/").map(str::to_string).unwrap_or(body);
            if let Ok(pattern) = Pattern::new(&body) {
                rules.push(Rule {
                    pattern,
                    anchored,
                    dirs_only,
                });
            }
        }
        Self { rules }
    }

    /// Returns `true` if `key` (a logical, forward-slash path) matches any
    /// exclude rule. `is_dir` gates rules written with a trailing slash.
    pub fn excludes(&self, key: &str, is_dir: bool) -> bool {
        self.rules.iter().any(|r| {
            if r.dirs_only && !is_dir {
                return false;
            }
            if r.anchored {
                // `key` is always "<root-name>/<relative>" (`to_key`); an
                // anchored rule binds to the logical root, i.e. the
                // relative part after the root-name segment.
                r.pattern.matches(relative_part(key))
            } else {
                r.pattern.matches(key)
                    || key
                        .rsplit('/')
                        .next()
                        .map(|base| r.pattern.matches(base))
                        .unwrap_or(false)
            }
        })
    }
}

/// Strips the leading `<root-name>/` segment off a key, yielding the
/// root-relative path an anchored rule is matched against.
fn relative_part(key: &str) -> &str {
    key.splitn(2, '/').nth(1).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let f = FilterSet::parse("# comment\n\n*.tmp\n");
        assert!(f.excludes("a/b.tmp", false));
        assert!(!f.excludes("a/b.txt", false));
    }

    #[test]
    fn trailing_slash_restricts_to_directories() {
        let f = FilterSet::parse("node_modules/\n");
        assert!(f.excludes("proj/node_modules", true));
        assert!(!f.excludes("proj/node_modules", false));
    }

    #[test]
    fn anchored_rule_binds_to_root() {
        let f = FilterSet::parse("/build\n");
        assert!(f.excludes("myroot/build", false));
        assert!(!f.excludes("myroot/sub/build", false));
    }

    #[test]
    fn anchored_glob_star_star_excludes_deep_path_under_root() {
        // Testable property 7: rule "/a/b/**" excludes "root/a/b/c/d".
        let f = FilterSet::parse("/a/b/**\n");
        assert!(f.excludes("root/a/b/c/d", false));
        assert!(!f.excludes("root/a/other", false));
    }
}
