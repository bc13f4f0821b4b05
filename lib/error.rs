use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a ferry-related operation.
pub type FerryResult<T> = Result<T, FerryError>;

/// An error that occurred while copying filesystem content across a confinement boundary.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FerryError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A path could not be made relative to the confinement root.
    #[error("{path:?} is not a subdirectory of {root:?}")]
    PathEscapesRoot {
        /// The offending path.
        path: PathBuf,
        /// The confinement root it was supposed to stay under.
        root: PathBuf,
    },

    /// Resolution followed more symbolic links than the configured cap allows.
    #[error("resolving {path:?}: too many levels of symbolic links")]
    TooManySymlinks {
        /// The path whose resolution looped.
        path: PathBuf,
    },

    /// A glob pattern matched nothing that it was required to match.
    #[error("{0}: not found")]
    NotFound(String),

    /// Every matched item was excluded or skipped, so the archive would be empty.
    #[error("copied no items")]
    CopiedNoItems,

    /// A malformed exclude or glob pattern.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    /// A uid or gid had no corresponding entry in the supplied ID mappings.
    #[error("no mapping found for {kind} {id}")]
    IdMappingNotFound {
        /// "uid" or "gid".
        kind: &'static str,
        /// The unmapped ID.
        id: u32,
    },

    /// A request named a different root than the one the subprocess already chrooted into.
    #[error("can't change location of chroot from {previous:?} to {requested:?}")]
    ChrootRootMismatch {
        /// The root the subprocess is already confined to.
        previous: PathBuf,
        /// The root the offending request asked for.
        requested: PathBuf,
    },

    /// An invalid request, such as a Stat or Get with no glob patterns.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An encode/decode failure on the request/response control channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The copier subprocess failed; carries any diagnostic output it produced.
    #[error("copier subprocess failed: {0}")]
    Subprocess(String),

    /// An error string returned by the remote side of a request.
    #[error("{0}")]
    Operation(String),

    /// An error serializing or deserializing a control message.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error walking a directory tree.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FerryError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FerryError {
        FerryError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Whether this error represents a permission problem, matching on the
    /// underlying OS error with a text fallback for errors that crossed a
    /// process boundary as strings.
    pub fn is_permission(&self) -> bool {
        match self {
            FerryError::Io(err) => {
                err.kind() == std::io::ErrorKind::PermissionDenied
                    || err.to_string().contains("permission denied")
            }
            other => other.to_string().contains("permission denied"),
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `FerryResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> FerryResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
