//! Path glob patterns compiled to anchored regular expressions.
//!
//! Syntax:
//! - `**` matches any run of characters, path separators included
//! - `*` matches any run of characters except `/`
//! - `?` matches exactly one character except `/`
//! - everything else (including `.`) is literal
//!
//! Matching is anchored at both ends of the relative path.

use crate::core::error::StewardError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, StewardError> {
        let regex = Regex::new(&translate(pattern)).map_err(|e| {
            StewardError::ValidationError(format!("invalid glob '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern text before its first wildcard.
    pub fn literal_prefix(&self) -> &str {
        literal_prefix(&self.pattern)
    }
}

pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
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
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    out.push('$');
    out
}

/// Compile a list of patterns, failing on the first invalid one.
pub fn compile_all(patterns: &[String]) -> Result<Vec<Glob>, StewardError> {
    patterns.iter().map(|p| Glob::new(p)).collect()
}

/// First glob in `globs` matching `path`.
pub fn first_match<'a>(globs: &'a [Glob], path: &str) -> Option<&'a Glob> {
    globs.iter().find(|g| g.is_match(path))
}
