//! The response side of the control channel, and the metadata records Stat
//! hands back.
//!
//! Errors cross the process boundary as plain strings on purpose: the control
//! channel is a simple serialization, and callers treat any error as
//! operation failure.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::options::EnsureParentPath;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single response, paired one-to-one with a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The error the operation failed with, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The operation-specific result.
    pub payload: Payload,
}

/// The success payload of a response, discriminated by the originating
/// request kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    /// The result of an Eval request.
    Eval {
        /// The symlink-resolved path.
        evaluated: PathBuf,
    },

    /// The result of a Stat request.
    Stat {
        /// One result group per input glob.
        globs: Vec<StatsForGlob>,
    },

    /// The result of a Get request; the archive itself travels on the bulk
    /// stream.
    Get {},

    /// The result of a Put request.
    Put {},

    /// The result of a Mkdir request.
    Mkdir {},

    /// The result of a Remove request.
    Remove {},

    /// The result of an Ensure request.
    Ensure {
        /// Paths that were created because they weren't already present.
        created: Vec<PathBuf>,
        /// Preexisting paths that are parents of created items.
        noted: Vec<EnsureParentPath>,
    },

    /// The result of a ConditionalRemove request.
    ConditionalRemove {
        /// Paths that were removed.
        removed: Vec<PathBuf>,
    },
}

/// Results for a single glob pattern passed to Stat().
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsForGlob {
    /// Error, if the glob pattern was malformed or matched nothing it had to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The input pattern to which this result corresponds.
    pub glob: String,

    /// Zero or more names that matched the glob.
    #[serde(default)]
    pub globbed: Vec<String>,

    /// One result for each globbed value, keyed by name.
    #[serde(default)]
    pub results: BTreeMap<String, StatForItem>,
}

/// Results for a single filesystem item, as returned by Stat().
///
/// For symlinks, the size and the is-dir/is-regular/is-archive bits describe
/// the link *target*; `immediate_target` carries the raw link text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatForItem {
    /// Error encountered reading this particular item, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The item's name, relative and slash-separated.
    pub name: String,

    /// Size in bytes; dereferenced value for symlinks.
    pub size: u64,

    /// The full st_mode, including file type bits.
    pub mode: u32,

    /// Modification time.
    pub mtime: SystemTime,

    /// Owning user ID, after ID mapping.
    pub uid: u32,

    /// Owning group ID, after ID mapping.
    pub gid: u32,

    /// Whether the item itself is a symlink.
    pub is_symlink: bool,

    /// Whether the item (or its target) is a directory.
    pub is_dir: bool,

    /// Whether the item (or its target) is a regular file.
    pub is_regular: bool,

    /// Whether the item (or its target) reads like a (possibly compressed)
    /// tarball. Only populated when archive checking was requested.
    pub is_archive: bool,

    /// Raw link content, when the item is a symlink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_target: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Response {
    /// A successful response with the given payload.
    pub fn new(payload: Payload) -> Self {
        Self {
            error: None,
            payload,
        }
    }

    /// A failed response carrying the error as text.
    pub fn error(payload: Payload, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            payload,
        }
    }
}

impl Default for StatForItem {
    fn default() -> Self {
        Self {
            error: None,
            name: String::new(),
            size: 0,
            mode: 0,
            mtime: UNIX_EPOCH,
            uid: 0,
            gid: 0,
            is_symlink: false,
            is_dir: false,
            is_regular: false,
            is_archive: false,
            immediate_target: None,
        }
    }
}
