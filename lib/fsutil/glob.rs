//! Filesystem glob expansion with recursive `**` support.

use std::path::{Path, PathBuf};

use crate::FerryResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Whether a pattern contains any glob metacharacters.
///
/// This distinction matters for error reporting: a wildcard pattern that
/// matches nothing is silently skipped, while a literal path that matches
/// nothing is a per-glob "not found".
pub fn contains_glob_metachars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expands a glob pattern against the filesystem.
///
/// Matches are returned in lexical order and deduplicated, which makes the
/// output deterministic. Directories that cannot be read during expansion are
/// skipped rather than failing the whole expansion; a malformed pattern is an
/// error.
pub fn extended_glob(pattern: &Path) -> FerryResult<Vec<PathBuf>> {
    let spec = pattern.to_string_lossy();
    let mut matches = Vec::new();
    for entry in glob::glob(&spec)? {
        match entry {
            Ok(path) => matches.push(path),
            Err(err) => {
                tracing::debug!("skipping unreadable path while expanding {spec:?}: {err}");
            }
        }
    }
    matches.sort();
    matches.dedup();
    Ok(matches)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
