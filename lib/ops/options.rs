//! Options accepted by the public operations. These cross the control channel
//! verbatim, so everything here is serde-serializable, and every struct gets
//! a builder so call sites can set just the handful of knobs they care about.

use std::{collections::HashMap, path::PathBuf, time::SystemTime};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::idmap::{IdMap, IdPair};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Controls parts of Stat()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct StatOptions {
    /// Map from host IDs to container IDs when returning results.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from host IDs to container IDs when returning results.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// Check for and populate the is-archive bit in returned values.
    #[serde(default)]
    #[builder(default)]
    pub check_for_archives: bool,

    /// Contents to pretend don't exist.
    #[serde(default)]
    #[builder(default)]
    pub excludes: Vec<String>,
}

/// Controls parts of Get()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct GetOptions {
    /// Map from host IDs to container IDs in the output archive.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from host IDs to container IDs in the output archive.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// Contents to pretend don't exist.
    #[serde(default)]
    #[builder(default)]
    pub excludes: Vec<String>,

    /// Extract the contents of named items that are archives.
    #[serde(default)]
    #[builder(default)]
    pub expand_archives: bool,

    /// Set ownership on directories. No effect on archives being expanded.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown_dirs: Option<IdPair>,

    /// Set permissions on directories. No effect on archives being expanded.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod_dirs: Option<u32>,

    /// Set ownership of files. No effect on archives being expanded.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown_files: Option<IdPair>,

    /// Set permissions on files. No effect on archives being expanded.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod_files: Option<u32>,

    /// Maintain the sources' parent directory chain in the destination.
    #[serde(default)]
    #[builder(default)]
    pub parents: bool,

    /// Strip the setuid bit off of items being copied.
    #[serde(default)]
    #[builder(default)]
    pub strip_setuid_bit: bool,

    /// Strip the setgid bit off of items being copied.
    #[serde(default)]
    #[builder(default)]
    pub strip_setgid_bit: bool,

    /// Strip the sticky bit off of items being copied.
    #[serde(default)]
    #[builder(default)]
    pub strip_sticky_bit: bool,

    /// Don't record extended attributes of items being copied.
    #[serde(default)]
    #[builder(default)]
    pub strip_xattrs: bool,

    /// Don't strip the top directory's basename from the paths of items in
    /// subdirectories.
    #[serde(default)]
    #[builder(default)]
    pub keep_directory_names: bool,

    /// Rename items with the specified names, or under the specified names.
    #[serde(default)]
    #[builder(default)]
    pub rename: HashMap<String, String>,

    /// Don't follow symlinks when globs match them directly.
    #[serde(default)]
    #[builder(default)]
    pub no_deref_symlinks: bool,

    /// Ignore errors reading items, instead of returning an error.
    #[serde(default)]
    #[builder(default)]
    pub ignore_unreadable: bool,

    /// If a subdirectory is a mountpoint with a different device number,
    /// include it but skip its contents.
    #[serde(default)]
    #[builder(default)]
    pub no_cross_device: bool,

    /// Timestamp to force on all contents.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub timestamp: Option<SystemTime>,
}

/// Controls parts of Put()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct PutOptions {
    /// Map from container IDs to host IDs when writing contents to disk.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from container IDs to host IDs when writing contents to disk.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// Ownership of implicitly-created directories. Defaults to `chown_dirs`,
    /// or 0:0 if that is unset.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub default_dir_owner: Option<IdPair>,

    /// Permissions on implicitly-created directories. Defaults to
    /// `chmod_dirs`, or 0755 if that is unset.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub default_dir_mode: Option<u32>,

    /// Set ownership of newly-created directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown_dirs: Option<IdPair>,

    /// Set permissions on newly-created directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod_dirs: Option<u32>,

    /// Set ownership of newly-created files.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown_files: Option<IdPair>,

    /// Set permissions on newly-created files.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod_files: Option<u32>,

    /// Strip the setuid bit off of items being written.
    #[serde(default)]
    #[builder(default)]
    pub strip_setuid_bit: bool,

    /// Strip the setgid bit off of items being written.
    #[serde(default)]
    #[builder(default)]
    pub strip_setgid_bit: bool,

    /// Strip the sticky bit off of items being written.
    #[serde(default)]
    #[builder(default)]
    pub strip_sticky_bit: bool,

    /// Don't bother trying to set extended attributes of items being written.
    #[serde(default)]
    #[builder(default)]
    pub strip_xattrs: bool,

    /// Ignore any errors encountered when attempting to set extended
    /// attributes.
    #[serde(default)]
    #[builder(default)]
    pub ignore_xattr_errors: bool,

    /// Ignore items which are character or block devices.
    #[serde(default)]
    #[builder(default)]
    pub ignore_devices: bool,

    /// Instead of quietly overwriting directories with non-directories,
    /// return an error.
    #[serde(default)]
    #[builder(default)]
    pub no_overwrite_dir_non_dir: bool,

    /// Instead of quietly overwriting non-directories with directories,
    /// return an error.
    #[serde(default)]
    #[builder(default)]
    pub no_overwrite_non_dir_dir: bool,

    /// Rename items with the specified names, or under the specified names.
    #[serde(default)]
    #[builder(default)]
    pub rename: HashMap<String, String>,
}

/// Controls parts of Mkdir()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct MkdirOptions {
    /// Map from container IDs to host IDs when creating directories.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from container IDs to host IDs when creating directories.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// Set mtime and atime of newly-created directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub mod_time_new: Option<SystemTime>,

    /// Set ownership of newly-created directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown_new: Option<IdPair>,

    /// Set permissions on newly-created directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod_new: Option<u32>,
}

/// Controls parts of Remove()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct RemoveOptions {
    /// If the item is a directory, remove its contents as well.
    #[serde(default)]
    #[builder(default)]
    pub all: bool,
}

/// The kind of filesystem entry an [`EnsurePath`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsureKind {
    /// An empty regular file.
    File,

    /// A directory.
    Directory,
}

/// A single item being passed to an Ensure() call.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EnsurePath {
    /// A pathname, relative to the directory, possibly relative to the root.
    pub path: PathBuf,

    /// Whether to create a file or a directory.
    pub kind: EnsureKind,

    /// Mtime to set on newly-created items; default is to leave them be.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub mtime: Option<SystemTime>,

    /// Mode for newly-created items; defaults to 0o000 for files and 0o700
    /// for directories.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chmod: Option<u32>,

    /// Owner to set on newly-created items; defaults to 0:0.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub chown: Option<IdPair>,
}

/// Controls parts of Ensure()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EnsureOptions {
    /// Map from container IDs to host IDs in the chroot.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from container IDs to host IDs in the chroot.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// The items to create when missing.
    #[serde(default)]
    #[builder(default)]
    pub paths: Vec<EnsurePath>,
}

/// A single item being passed to a ConditionalRemove() call: a path plus the
/// state it is expected to still be in. Removal is refused unless every
/// supplied expectation matches, making removal a compare-and-delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ConditionalRemovePath {
    /// A pathname, relative to the directory, possibly relative to the root.
    pub path: PathBuf,

    /// Mtime to expect this item to have, if it's a condition.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub mtime: Option<SystemTime>,

    /// Permission bits to expect this item to have, if it's a condition.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub mode: Option<u32>,

    /// Owner to expect this item to have, if it's a condition.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub owner: Option<IdPair>,
}

/// A parent (or grandparent, or...) directory of an item created by
/// Ensure(), with a snapshot of its state from before the item was created.
/// If that state is unchanged at commit time, the directory was merely
/// walked through, not actually modified.
pub type EnsureParentPath = ConditionalRemovePath;

/// Controls parts of ConditionalRemove()'s behavior.
#[derive(Debug, Default, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ConditionalRemoveOptions {
    /// Map from container IDs to host IDs in the chroot.
    #[serde(default)]
    #[builder(default)]
    pub uid_map: Vec<IdMap>,

    /// Map from container IDs to host IDs in the chroot.
    #[serde(default)]
    #[builder(default)]
    pub gid_map: Vec<IdMap>,

    /// The items to remove when unmodified.
    #[serde(default)]
    #[builder(default)]
    pub paths: Vec<ConditionalRemovePath>,
}
