//! The request side of the control channel: one message per operation,
//! line-delimited JSON on the wire.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    fsutil::path::{clean_rel, convert_to_rel_subdirectory},
    idmap::IdMap,
    FerryResult,
};

use super::options::{
    ConditionalRemoveOptions, EnsureOptions, GetOptions, MkdirOptions, PutOptions, RemoveOptions,
    StatOptions,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single request. `root` is the confinement boundary; `directory` is the
/// working directory for the operation, absolute or relative to the root;
/// `globs` is only consulted by Stat and Get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The confinement boundary.
    pub root: PathBuf,

    /// The working directory for the operation.
    pub directory: PathBuf,

    /// Glob patterns, for Stat and Get.
    #[serde(default)]
    pub globs: Vec<String>,

    /// Which operation to perform, and its options.
    pub op: Operation,
}

/// The operation kind, tagging the request on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Operation {
    /// Resolve a path to its symlink-expanded location.
    Eval,

    /// Glob and describe filesystem entries.
    Stat(StatOptions),

    /// Stream matched entries out as a tar archive.
    Get(GetOptions),

    /// Materialize a tar archive on disk.
    Put(PutOptions),

    /// Ensure a directory chain exists.
    Mkdir(MkdirOptions),

    /// Remove one item, recursively if asked.
    Remove(RemoveOptions),

    /// Idempotently create placeholder files and directories.
    Ensure(EnsureOptions),

    /// Compare-and-delete a set of paths.
    ConditionalRemove(ConditionalRemoveOptions),

    /// Shut the serving loop down.
    Quit,
}

/// A request whose root, directory and globs have been normalized for the
/// execution context, with the caller's originals preserved for reporting.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedRequest {
    /// The request with normalized (absolute) paths.
    pub request: Request,

    /// Prefix to re-attach when handing paths back to the caller.
    pub root_prefix: PathBuf,

    /// The globs as the caller named them.
    pub preserved_globs: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Operation {
    /// The exclusion patterns this operation consults, if any.
    pub fn excludes(&self) -> &[String] {
        match self {
            Operation::Stat(options) => &options.excludes,
            Operation::Get(options) => &options.excludes,
            _ => &[],
        }
    }

    /// The uid mapping this operation applies, if any.
    pub fn uid_map(&self) -> &[IdMap] {
        match self {
            Operation::Stat(options) => &options.uid_map,
            Operation::Get(options) => &options.uid_map,
            Operation::Put(options) => &options.uid_map,
            Operation::Mkdir(options) => &options.uid_map,
            Operation::Ensure(options) => &options.uid_map,
            Operation::ConditionalRemove(options) => &options.uid_map,
            _ => &[],
        }
    }

    /// The gid mapping this operation applies, if any.
    pub fn gid_map(&self) -> &[IdMap] {
        match self {
            Operation::Stat(options) => &options.gid_map,
            Operation::Get(options) => &options.gid_map,
            Operation::Put(options) => &options.gid_map,
            Operation::Mkdir(options) => &options.gid_map,
            Operation::Ensure(options) => &options.gid_map,
            Operation::ConditionalRemove(options) => &options.gid_map,
            _ => &[],
        }
    }
}

impl Request {
    /// Normalizes the directory and globs to absolute paths for the execution
    /// context and remembers the originals.
    ///
    /// When `chrooted` is set the process-visible root is `/` and the
    /// caller-visible root becomes a prefix to re-attach on results;
    /// otherwise paths stay rooted at the caller's root.
    pub(crate) fn normalize(mut self, chrooted: bool) -> FerryResult<ResolvedRequest> {
        let preserved_root = self.root.clone();
        let preserved_globs = self.globs.clone();
        let mut root_prefix = PathBuf::from("/");

        if chrooted {
            let absolute_directory = if self.directory.is_absolute() {
                self.directory.clone()
            } else {
                self.root.join(clean_rel(&self.directory))
            };
            let relative = convert_to_rel_subdirectory(&preserved_root, &absolute_directory)?;
            self.directory = Path::new("/").join(clean_rel(&relative));
            let mut globs = Vec::with_capacity(self.globs.len());
            for glob in &preserved_globs {
                let glob_path = Path::new(glob);
                let absolute = if glob_path.is_absolute() {
                    let relative = convert_to_rel_subdirectory(&preserved_root, glob_path)?;
                    Path::new("/").join(clean_rel(&relative))
                } else {
                    self.directory.join(clean_rel(glob_path))
                };
                globs.push(absolute.to_string_lossy().into_owned());
            }
            self.globs = globs;
            root_prefix = preserved_root.clone();
            self.root = PathBuf::from("/");
        } else {
            if !self.directory.is_absolute() {
                self.directory = self.root.join(clean_rel(&self.directory));
            }
            let mut globs = Vec::with_capacity(self.globs.len());
            for glob in &preserved_globs {
                let glob_path = Path::new(glob);
                let absolute = if glob_path.is_absolute() {
                    let relative = convert_to_rel_subdirectory(&preserved_root, glob_path)?;
                    self.root.join(clean_rel(&relative))
                } else {
                    self.directory.join(clean_rel(glob_path))
                };
                globs.push(absolute.to_string_lossy().into_owned());
            }
            self.globs = globs;
        }

        Ok(ResolvedRequest {
            request: self,
            root_prefix,
            preserved_globs,
        })
    }
}

impl ResolvedRequest {
    /// The normalized confinement root.
    pub fn root(&self) -> &Path {
        &self.request.root
    }

    /// The normalized working directory.
    pub fn directory(&self) -> &Path {
        &self.request.directory
    }

    /// The normalized globs.
    pub fn globs(&self) -> &[String] {
        &self.request.globs
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(root: &str, directory: &str, globs: &[&str]) -> Request {
        Request {
            root: PathBuf::from(root),
            directory: PathBuf::from(directory),
            globs: globs.iter().map(|g| g.to_string()).collect(),
            op: Operation::Stat(StatOptions::default()),
        }
    }

    #[test]
    fn test_request_normalize_in_process() -> anyhow::Result<()> {
        let resolved = request("/srv/root", "sub", &["*.txt", "/abs/dir/*.rs"]).normalize(false)?;
        assert_eq!(resolved.root(), Path::new("/srv/root"));
        assert_eq!(resolved.directory(), Path::new("/srv/root/sub"));
        assert_eq!(
            resolved.globs(),
            &[
                "/srv/root/sub/*.txt".to_string(),
                "/srv/root/abs/dir/*.rs".to_string()
            ]
        );
        assert_eq!(resolved.root_prefix, PathBuf::from("/"));
        assert_eq!(resolved.preserved_globs, vec!["*.txt", "/abs/dir/*.rs"]);
        Ok(())
    }

    #[test]
    fn test_request_normalize_chrooted() -> anyhow::Result<()> {
        let resolved = request("/srv/root", "/srv/root/sub", &["*.txt"]).normalize(true)?;
        assert_eq!(resolved.root(), Path::new("/"));
        assert_eq!(resolved.directory(), Path::new("/sub"));
        assert_eq!(resolved.globs(), &["/sub/*.txt".to_string()]);
        assert_eq!(resolved.root_prefix, PathBuf::from("/srv/root"));
        Ok(())
    }

    #[test]
    fn test_request_normalize_clamps_escaping_directories() -> anyhow::Result<()> {
        let resolved = request("/srv/root", "../../etc", &[]).normalize(false)?;
        assert_eq!(resolved.directory(), Path::new("/srv/root/etc"));
        Ok(())
    }
}
