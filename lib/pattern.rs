//! Ordered exclusion patterns with docker-style re-inclusion semantics: a
//! later pattern overrides an earlier one, and a `!`-prefixed pattern turns a
//! previously-excluded path back into an included one.

use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::{fsutil, FerryError, FerryResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A compiled set of exclude patterns.
///
/// Patterns are `/`-separated and matched against paths made relative to the
/// confinement root. `*` never crosses a path separator; `**` does. A pattern
/// also matches every path beneath a directory it names.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    patterns: Vec<ExcludePattern>,
    reinclusions: bool,
}

/// One compiled exclude (or re-include) pattern.
#[derive(Debug, Clone)]
pub struct ExcludePattern {
    spec: String,
    components: usize,
    pattern: Pattern,
    reinclusion: bool,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExclusionMatcher {
    /// Compiles an ordered list of exclude patterns.
    ///
    /// A leading `!` marks a re-inclusion pattern; a bare `!` is rejected.
    pub fn new<S: AsRef<str>>(excludes: impl IntoIterator<Item = S>) -> FerryResult<Self> {
        let mut patterns = Vec::new();
        let mut reinclusions = false;
        for raw in excludes {
            let mut spec = raw.as_ref().trim();
            if spec.is_empty() {
                continue;
            }
            let reinclusion = spec.starts_with('!');
            if reinclusion {
                spec = spec[1..].trim_start();
                if spec.is_empty() {
                    return Err(FerryError::InvalidRequest(format!(
                        "illegal exclusion pattern: {:?}",
                        raw.as_ref()
                    )));
                }
                reinclusions = true;
            }
            let cleaned = fsutil::path::clean_rel(Path::new(spec))
                .to_string_lossy()
                .into_owned();
            if cleaned == "." {
                continue;
            }
            let pattern = Pattern::new(&cleaned)?;
            patterns.push(ExcludePattern {
                components: cleaned.split('/').count(),
                spec: cleaned,
                pattern,
                reinclusion,
            });
        }
        Ok(Self {
            patterns,
            reinclusions,
        })
    }

    /// Whether there are no patterns at all.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern is a re-inclusion, in which case directory pruning
    /// has to be more careful.
    pub fn has_reinclusions(&self) -> bool {
        self.reinclusions
    }

    /// The compiled patterns, in order.
    pub fn patterns(&self) -> &[ExcludePattern] {
        &self.patterns
    }

    /// Whether `rel`, a `/`-separated path relative to the root, is excluded.
    ///
    /// Patterns are applied in order and the last one that matches wins.
    pub fn is_excluded(&self, rel: &str) -> bool {
        let parent_components: Vec<&str> = match rel.rsplit_once('/') {
            Some((parent, _)) => parent.split('/').collect(),
            None => Vec::new(),
        };
        let mut matched = false;
        for pattern in &self.patterns {
            let mut hit = pattern.pattern.matches_with(rel, MATCH_OPTIONS);
            if !hit && !parent_components.is_empty() && pattern.components <= parent_components.len()
            {
                // the pattern names an ancestor directory of this path
                let ancestor = parent_components[..pattern.components].join("/");
                hit = pattern.pattern.matches_with(&ancestor, MATCH_OPTIONS);
            }
            if hit {
                matched = !pattern.reinclusion;
            }
        }
        matched
    }
}

impl ExcludePattern {
    /// The cleaned pattern text.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Whether this pattern re-includes rather than excludes.
    pub fn is_reinclusion(&self) -> bool {
        self.reinclusion
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
