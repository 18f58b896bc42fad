//! Glob matching over `/`-delimited module ids
//!
//! Patterns use the usual glob syntax: `*` stays within one id segment and
//! `**` spans any number of segments. Two forms get special treatment:
//!
//! - `prefix/**` matches ids strictly below `prefix`, never `prefix` itself
//! - `~prefix` matches `prefix` and every id below it

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{BundleError, Result};

/// A compiled module id pattern
#[derive(Debug, Clone)]
pub struct IdPattern {
    raw: String,
    matcher: GlobMatcher,
    /// Matcher for `prefix` when the pattern is `prefix/**`
    bare_prefix: Option<GlobMatcher>,
    /// Matcher for `prefix/**` when the pattern is `~prefix`
    subtree: Option<GlobMatcher>,
}

impl IdPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if let Some(prefix) = pattern.strip_prefix('~') {
            return Ok(Self {
                raw: pattern.to_owned(),
                matcher: compile(prefix, pattern)?,
                bare_prefix: None,
                subtree: Some(compile(&format!("{prefix}/**"), pattern)?),
            });
        }

        let bare_prefix = match pattern.strip_suffix("/**") {
            Some(prefix) if !prefix.is_empty() => Some(compile(prefix, pattern)?),
            _ => None,
        };

        Ok(Self {
            raw: pattern.to_owned(),
            matcher: compile(pattern, pattern)?,
            bare_prefix,
            subtree: None,
        })
    }

    /// The pattern text this matcher was built from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, id: &str) -> bool {
        if let Some(subtree) = &self.subtree {
            return self.matcher.is_match(id) || subtree.is_match(id);
        }

        if !self.matcher.is_match(id) {
            return false;
        }

        // `er/**` must not swallow `er`
        self.bare_prefix
            .as_ref()
            .is_none_or(|bare| !bare.is_match(id))
    }
}

/// One-shot match of `id` against `pattern`
pub fn matches(id: &str, pattern: &str) -> Result<bool> {
    Ok(IdPattern::new(pattern)?.matches(id))
}

fn compile(glob: &str, pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| BundleError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })
}
