//! Purely lexical path helpers. Nothing in this module touches the
//! filesystem; confinement decisions made here must hold whether or not the
//! process is actually chrooted.

use std::{
    ffi::OsString,
    path::{Component, Path, PathBuf},
};

use crate::{FerryError, FerryResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Cleans a path that is to be treated as relative, resolving `.` and `..`
/// components lexically and clamping any `..` that would climb above the
/// starting point. An empty result becomes `"."`, so the value can always be
/// joined onto a base directory.
pub fn clean_rel(candidate: &Path) -> PathBuf {
    let mut parts: Vec<OsString> = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(c) => parts.push(c.to_os_string()),
            Component::ParentDir => {
                // climbing above the base is clamped, not an error
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => continue,
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    let mut cleaned = PathBuf::new();
    for part in parts {
        cleaned.push(part);
    }
    cleaned
}

/// Returns the path of `directory`, bound and relative to `root`.
///
/// Both paths must be absolute. A directory lexically outside the root clamps
/// back to `"."` rather than escaping, which is what keeps `..`-laden inputs
/// confined.
pub fn convert_to_rel_subdirectory(root: &Path, directory: &Path) -> FerryResult<PathBuf> {
    if root.as_os_str().is_empty() || !root.is_absolute() {
        return Err(FerryError::InvalidRequest(format!(
            "expected root directory to be an absolute path, got {root:?}"
        )));
    }
    if directory.as_os_str().is_empty() || !directory.is_absolute() {
        return Err(FerryError::InvalidRequest(format!(
            "expected directory to be an absolute path, got {directory:?}"
        )));
    }
    let root_parts = normal_components(root);
    let dir_parts = normal_components(directory);
    let common = root_parts
        .iter()
        .zip(dir_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut raw = PathBuf::new();
    for _ in common..root_parts.len() {
        raw.push("..");
    }
    for part in &dir_parts[common..] {
        raw.push(part);
    }
    Ok(clean_rel(&raw))
}

/// Splits a path into a component list suitable for the resolver's walk,
/// preserving `..` entries and dropping `.` and root markers.
pub fn split_components(path: &Path) -> Vec<OsString> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(c) => Some(c.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect()
}

/// Whether a symlink target should be treated as absolute.
pub fn looks_like_abs(target: &Path) -> bool {
    target.has_root()
}

/// Whether `candidate` already names the root of the filesystem.
pub fn is_fs_root(candidate: &Path) -> bool {
    let cleaned: Vec<_> = normal_components(candidate);
    candidate.is_absolute() && cleaned.is_empty()
}

fn normal_components(path: &Path) -> Vec<OsString> {
    // `..` inside an absolute path resolves lexically before comparison
    let mut parts: Vec<OsString> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => parts.push(c.to_os_string()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => continue,
        }
    }
    parts
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_rel() {
        assert_eq!(clean_rel(Path::new("a/b/c")), PathBuf::from("a/b/c"));
        assert_eq!(clean_rel(Path::new("a/./b//c/")), PathBuf::from("a/b/c"));
        assert_eq!(clean_rel(Path::new("a/b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean_rel(Path::new("../a")), PathBuf::from("a"));
        assert_eq!(clean_rel(Path::new("../../..")), PathBuf::from("."));
        assert_eq!(clean_rel(Path::new("/absolute/a")), PathBuf::from("absolute/a"));
        assert_eq!(clean_rel(Path::new("")), PathBuf::from("."));
        assert_eq!(clean_rel(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn test_convert_to_rel_subdirectory() -> anyhow::Result<()> {
        assert_eq!(
            convert_to_rel_subdirectory(Path::new("/a/b"), Path::new("/a/b/c/d"))?,
            PathBuf::from("c/d")
        );
        assert_eq!(
            convert_to_rel_subdirectory(Path::new("/a/b"), Path::new("/a/b"))?,
            PathBuf::from(".")
        );
        // escapes clamp back to the root instead of escaping it
        assert_eq!(
            convert_to_rel_subdirectory(Path::new("/a/b"), Path::new("/a"))?,
            PathBuf::from(".")
        );
        assert_eq!(
            convert_to_rel_subdirectory(Path::new("/a/b"), Path::new("/a/x/y"))?,
            PathBuf::from("x/y")
        );
        assert!(convert_to_rel_subdirectory(Path::new("a/b"), Path::new("/a")).is_err());
        assert!(convert_to_rel_subdirectory(Path::new("/a"), Path::new("x")).is_err());
        Ok(())
    }

    #[test]
    fn test_split_components_preserves_parent_dirs() {
        let parts = split_components(Path::new("/a/./b/../c"));
        let as_strings: Vec<_> = parts.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(as_strings, vec!["a", "b", "..", "c"]);
    }

    #[test]
    fn test_is_fs_root() {
        assert!(is_fs_root(Path::new("/")));
        assert!(is_fs_root(Path::new("/..")));
        assert!(!is_fs_root(Path::new("/a")));
        assert!(!is_fs_root(Path::new("relative")));
    }
}
