//! Glob-like matching of dot-paths.
//!
//! `*` matches exactly one segment (or part of one, e.g. `user.*Name`),
//! `**` matches any number of segments including none.

use regex::Regex;

use crate::error::{KernelError, KernelResult};

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> KernelResult<Self> {
        let source = pattern.trim().to_string();
        if source.is_empty() {
            return Err(KernelError::invalid_path(pattern, "pattern is empty"));
        }
        let regex = Regex::new(&glob_to_regex(&source))
            .map_err(|e| KernelError::invalid_path(pattern, e.to_string()))?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// True if the pattern contains no wildcard at all.
    pub fn is_literal(&self) -> bool {
        !self.source.contains('*')
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let segments: Vec<&str> = pattern.split('.').collect();
    let last = segments.len().saturating_sub(1);
    for (i, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            // `a.**` also matches `a`; `**.b` also matches `b`.
            if i == last {
                if i > 0 {
                    regex.truncate(regex.len() - 2);
                    regex.push_str(r"(\..+)?");
                } else {
                    regex.push_str(".*");
                }
            } else {
                regex.push_str(r"(.+\.)?");
            }
            continue;
        }
        for ch in segment.trim().chars() {
            match ch {
                '*' => regex.push_str("[^.]*"),
                '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' | '?' => {
                    regex.push('\\');
                    regex.push(ch);
                }
                _ => regex.push(ch),
            }
        }
        if i != last {
            regex.push_str(r"\.");
        }
    }
    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, path: &str) -> bool {
        PathPattern::compile(pattern).unwrap().matches(path)
    }

    #[test]
    fn single_star_is_one_segment() {
        assert!(m("user.*.name", "user.profile.name"));
        assert!(!m("user.*.name", "user.a.b.name"));
        assert!(!m("user.*", "user"));
        assert!(m("user.*", "user.id"));
    }

    #[test]
    fn partial_segment_star() {
        assert!(m("form.*Error", "form.emailError"));
        assert!(!m("form.*Error", "form.email.Error"));
    }

    #[test]
    fn double_star_spans_segments() {
        assert!(m("settings.**", "settings"));
        assert!(m("settings.**", "settings.theme.dark"));
        assert!(m("**.id", "id"));
        assert!(m("**.id", "user.profile.id"));
        assert!(m("a.**.z", "a.z"));
        assert!(m("a.**.z", "a.b.c.z"));
        assert!(m("**", "anything.at.all"));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let p = PathPattern::compile("cart.total").unwrap();
        assert!(p.is_literal());
        assert!(p.matches("cart.total"));
        assert!(!p.matches("cart.totals"));
        assert!(!p.matches("cartXtotal"));
    }
}
