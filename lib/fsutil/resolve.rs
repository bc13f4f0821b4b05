//! Symlink-safe path resolution confined to a root directory.
//!
//! Resolution is computed lexically, one component at a time, so it behaves
//! identically whether or not the process is actually chrooted. It is in no
//! way secure against another process concurrently rewriting the tree, and is
//! not expected to be.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    fsutil::path::{convert_to_rel_subdirectory, looks_like_abs, split_components},
    pattern::ExclusionMatcher,
    FerryError, FerryResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The maximum number of symbolic links a single resolution may follow.
pub const MAX_SYMLINK_FOLLOWS: u32 = 64;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes `path` relative to `root`, then asks the matcher whether the
/// result is excluded. The root itself (`"."`) is never excluded.
pub fn path_is_excluded(
    root: &Path,
    path: &Path,
    matcher: Option<&ExclusionMatcher>,
) -> FerryResult<(PathBuf, bool)> {
    let rel = convert_to_rel_subdirectory(root, path)?;
    if rel == Path::new(".") {
        return Ok((rel, false));
    }
    let excluded = match matcher {
        Some(matcher) => matcher.is_excluded(&rel.to_string_lossy()),
        None => false,
    };
    Ok((rel, excluded))
}

/// Resolves symbolic links in `path`, treating `root` as the root directory.
///
/// The final component is only dereferenced when `evaluate_final_component`
/// is set. Once any prefix of the path is excluded by `matcher`, the rest of
/// the path is treated as opaque and links are no longer followed. `..` never
/// climbs above `root`; an absolute link target restarts the walk at `root`.
pub fn resolve_path(
    root: &Path,
    path: &Path,
    evaluate_final_component: bool,
    matcher: Option<&ExclusionMatcher>,
) -> FerryResult<PathBuf> {
    let rel = convert_to_rel_subdirectory(root, path).map_err(|_| FerryError::PathEscapesRoot {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    })?;
    let mut components: VecDeque<_> = split_components(&rel).into();
    let mut working = root.to_path_buf();
    let mut followed = 0u32;
    let mut excluded = false;

    while let Some(component) = components.front().cloned() {
        let candidate = working.join(&component);
        // once anything we try to examine is excluded, resolution has to "break"
        let (_, this_excluded) = path_is_excluded(root, &candidate, matcher)?;
        excluded = excluded || this_excluded;
        if !excluded && (components.len() != 1 || evaluate_final_component) {
            if let Ok(target) = fs::read_link(&candidate) {
                followed += 1;
                if followed > MAX_SYMLINK_FOLLOWS {
                    return Err(FerryError::TooManySymlinks {
                        path: path.to_path_buf(),
                    });
                }
                components.pop_front();
                if looks_like_abs(&target) {
                    // absolute target: restart the walk from the root with the
                    // target's components prepended to whatever remains
                    for part in split_components(&target).into_iter().rev() {
                        components.push_front(part);
                    }
                    working = root.to_path_buf();
                } else {
                    // relative target: resolve against the link's own
                    // directory, re-express relative to the root, and restart
                    let joined = working.join(&target);
                    let rebased = convert_to_rel_subdirectory(root, &joined)?;
                    for part in split_components(&rebased).into_iter().rev() {
                        components.push_front(part);
                    }
                    working = root.to_path_buf();
                }
                continue;
            }
        }
        // append the current component's name to get the next location
        if component == *".." {
            if working != root {
                working.pop();
            }
        } else if component != *"." {
            working.push(&component);
        }
        components.pop_front();
    }
    Ok(working)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_resolve_plain_paths_and_dotdot_clamping() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::create_dir_all(root.join("a/b"))?;

        assert_eq!(
            resolve_path(root, &root.join("a/b"), true, None)?,
            root.join("a/b")
        );
        // `..` may not climb above the root
        assert_eq!(
            resolve_path(root, &root.join("a/../../../b"), true, None)?,
            root.join("b")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_absolute_symlink_stays_confined() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::create_dir_all(root.join("etc"))?;
        symlink("/etc", root.join("link"))?;

        // the absolute target is re-rooted under the confinement root
        assert_eq!(
            resolve_path(root, &root.join("link"), true, None)?,
            root.join("etc")
        );
        assert_eq!(
            resolve_path(root, &root.join("link/passwd"), true, None)?,
            root.join("etc/passwd")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_relative_symlink_chain() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::create_dir_all(root.join("a/b"))?;
        fs::write(root.join("a/b/file.txt"), "x")?;
        symlink("b", root.join("a/link-b"))?;
        symlink("a/link-b/file.txt", root.join("entry"))?;

        assert_eq!(
            resolve_path(root, &root.join("entry"), true, None)?,
            root.join("a/b/file.txt")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_final_component_kept_when_not_evaluated() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::write(root.join("target"), "x")?;
        symlink("target", root.join("link"))?;

        assert_eq!(
            resolve_path(root, &root.join("link"), false, None)?,
            root.join("link")
        );
        assert_eq!(
            resolve_path(root, &root.join("link"), true, None)?,
            root.join("target")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_excluded_prefix_is_opaque() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::create_dir_all(root.join("real"))?;
        symlink("real", root.join("hidden"))?;

        let matcher = ExclusionMatcher::new(["hidden"])?;
        // with the link excluded, it is not followed
        assert_eq!(
            resolve_path(root, &root.join("hidden/file"), true, Some(&matcher))?,
            root.join("hidden/file")
        );
        // without exclusions it is
        assert_eq!(
            resolve_path(root, &root.join("hidden/file"), true, None)?,
            root.join("real/file")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_symlink_hop_bound() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        fs::write(root.join("end"), "x")?;

        // a chain one hop under the cap resolves
        symlink("end", root.join("ok-0"))?;
        for i in 1..MAX_SYMLINK_FOLLOWS {
            symlink(format!("ok-{}", i - 1), root.join(format!("ok-{i}")))?;
        }
        assert_eq!(
            resolve_path(
                root,
                &root.join(format!("ok-{}", MAX_SYMLINK_FOLLOWS - 1)),
                true,
                None
            )?,
            root.join("end")
        );

        // a self-referential link exceeds it
        symlink("loop", root.join("loop"))?;
        assert!(matches!(
            resolve_path(root, &root.join("loop"), true, None),
            Err(FerryError::TooManySymlinks { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_path_is_excluded_root_special_case() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        let matcher = ExclusionMatcher::new(["**"])?;
        let (rel, excluded) = path_is_excluded(root, root, Some(&matcher))?;
        assert_eq!(rel, PathBuf::from("."));
        assert!(!excluded);

        let (rel, excluded) = path_is_excluded(root, &root.join("x"), Some(&matcher))?;
        assert_eq!(rel, PathBuf::from("x"));
        assert!(excluded);
        Ok(())
    }
}
