//! Wildcard pattern matching for skip/exclude/cutoff lists
//!
//! Pattern syntax:
//! - `/regex/`: the candidate must fully match the regular expression
//! - anything containing `*` or `?`: glob, `*` matches any run of
//!   characters and `?` exactly one
//! - everything else: exact, case-sensitive equality

use crate::error::{AuthzError, Result};
use regex::Regex;

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        if raw.len() > 1 && raw.starts_with('/') && raw.ends_with('/') {
            let inner = &raw[1..raw.len() - 1];
            return anchored(inner)
                .map(Pattern::Regex)
                .map_err(|e| AuthzError::Config(format!("Invalid pattern '{}': {}", raw, e)));
        }

        if raw.contains(['*', '?']) {
            let mut regex = String::with_capacity(raw.len() + 8);
            let mut literal = String::new();
            for c in raw.chars() {
                match c {
                    '*' | '?' => {
                        regex.push_str(&regex::escape(&literal));
                        literal.clear();
                        regex.push_str(if c == '*' { ".*" } else { "." });
                    }
                    _ => literal.push(c),
                }
            }
            regex.push_str(&regex::escape(&literal));
            return anchored(&regex)
                .map(Pattern::Regex)
                .map_err(|e| AuthzError::Config(format!("Invalid pattern '{}': {}", raw, e)));
        }

        Ok(Pattern::Exact(raw.to_string()))
    }

    fn test(&self, candidate: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == candidate,
            Pattern::Regex(regex) => regex.is_match(candidate),
        }
    }
}

fn anchored(expr: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?s:{})$", expr))
}

/// Matches a string against any of a list of patterns.
///
/// An empty list matches nothing.
#[derive(Debug, Clone, Default)]
pub struct WildcardMatcher {
    patterns: Vec<Pattern>,
}

impl WildcardMatcher {
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.as_ref().is_empty())
            .map(|p| Pattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Matcher that never matches
    pub fn none() -> Self {
        Self::default()
    }

    pub fn test(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.test(candidate))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
