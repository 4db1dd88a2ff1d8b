//! Glob pattern compilation and matching.
//!
//! Supported syntax: `*` (any run within a path segment), `**` (any run
//! across segments), `?` (one character), `[a-z]` / `[!a-z]` character
//! classes, and `{alt1,alt2}` alternation (nestable). Patterns compile to
//! anchored regexes.

use regex::Regex;

use crate::errors::{ErrorKind, EvalError, EvalResult};

/// A compiled glob pattern.
#[derive(Debug)]
pub(crate) struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    pub(crate) fn compile(pattern: &str) -> EvalResult<Self> {
        let source = translate(pattern)
            .map_err(|reason| EvalError::keyed(ErrorKind::ResolveError, "invalidGlobPattern", &[&pattern, &reason]))?;
        let regex = Regex::new(&source)
            .map_err(|err| EvalError::keyed(ErrorKind::ResolveError, "invalidGlobPattern", &[&pattern, &err]))?;
        Ok(Self { regex })
    }

    pub(crate) fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Whether a pattern contains any glob metacharacters. A pattern without
/// wildcards resolves like a plain URI.
pub(crate) fn has_wildcards(pattern: &str) -> bool {
    pattern.chars().any(|c| matches!(c, '*' | '?' | '[' | '{'))
}

/// Whether one pattern *segment* (between `/`s) contains metacharacters.
pub(crate) fn segment_has_wildcards(segment: &str) -> bool {
    has_wildcards(segment)
}

/// Translates glob syntax to an anchored regex.
fn translate(pattern: &str) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut brace_depth = 0usize;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                } else if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => out.push_str("\\\\"),
                        other => out.push(other),
                    }
                }
                if !closed {
                    return Err("unterminated character class".into());
                }
                out.push(']');
            }
            '{' => {
                brace_depth += 1;
                out.push('(');
            }
            '}' => {
                if brace_depth == 0 {
                    return Err("unmatched `}`".into());
                }
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            other => {
                if regex_syntax_char(other) {
                    out.push('\\');
                }
                out.push(other);
            }
        }
    }
    if brace_depth > 0 {
        return Err("unterminated `{` alternation".into());
    }
    out.push('$');
    Ok(out)
}

fn regex_syntax_char(c: char) -> bool {
    matches!(c, '.' | '+' | '(' | ')' | '|' | '^' | '$' | '\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        GlobPattern::compile(pattern).unwrap().matches(path)
    }

    #[test]
    fn star_stays_within_segment() {
        assert!(matches("*.pkl", "a.pkl"));
        assert!(!matches("*.pkl", "d/a.pkl"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(matches("**/*.pkl", "d/a.pkl"));
        assert!(matches("**/*.pkl", "d/e/f/a.pkl"));
        assert!(!matches("**/*.pkl", "a.txt"));
    }

    #[test]
    fn question_and_classes() {
        assert!(matches("a?.pkl", "ab.pkl"));
        assert!(!matches("a?.pkl", "a/b.pkl"));
        assert!(matches("[a-c].pkl", "b.pkl"));
        assert!(!matches("[!a-c].pkl", "b.pkl"));
    }

    #[test]
    fn alternation() {
        assert!(matches("{a,b}.pkl", "a.pkl"));
        assert!(matches("{a,b}.pkl", "b.pkl"));
        assert!(!matches("{a,b}.pkl", "c.pkl"));
        assert!(matches("img.{png,jp{,e}g}", "img.jpeg"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        assert!(!matches("a.pkl", "axpkl"));
    }

    #[test]
    fn wildcard_detection() {
        assert!(has_wildcards("*.pkl"));
        assert!(!has_wildcards("plain.pkl"));
    }

    #[test]
    fn invalid_pattern_errors() {
        assert!(GlobPattern::compile("{a,b").is_err());
        assert!(GlobPattern::compile("[a-").is_err());
    }
}
