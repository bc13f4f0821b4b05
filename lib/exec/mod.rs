//! Execution of requests: the `Copier` client, the isolation policy that
//! decides between in-process and subprocess+chroot execution, and the eight
//! public operations.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

use getset::Getters;
use typed_builder::TypedBuilder;

use crate::{
    fsutil::path::{convert_to_rel_subdirectory, is_fs_root},
    ops::{
        ConditionalRemoveOptions, EnsureOptions, EnsureParentPath, GetOptions, MkdirOptions,
        Operation, Payload, PutOptions, RemoveOptions, Request, Response, StatOptions,
        StatsForGlob,
    },
    FerryError, FerryResult,
};

mod inprocess;
pub mod reexec;
mod subprocess;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How operations against a confinement root should be isolated.
///
/// This is an explicit capability rather than a global computed at startup,
/// so a caller (or a test) can pin the decision.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IsolationPolicy {
    /// Chroot into a subprocess when the platform supports it and the
    /// process has the privilege to; otherwise run in-process and rely on
    /// lexical confinement.
    #[default]
    Auto,

    /// Always run in-process, confined lexically.
    InProcess,

    /// Always run in a chrooted subprocess.
    Subprocess,
}

/// A client for the copier engine. The zero-configuration entry points below
/// use `Copier::default()`.
#[derive(Debug, Default, Clone, TypedBuilder, Getters)]
pub struct Copier {
    /// The isolation policy for operations issued through this client.
    #[builder(default)]
    #[getset(get = "pub")]
    policy: IsolationPolicy,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IsolationPolicy {
    /// Whether the process should fork a chrooted child for this root.
    fn wants_subprocess(&self) -> bool {
        match self {
            IsolationPolicy::InProcess => false,
            IsolationPolicy::Subprocess => true,
            IsolationPolicy::Auto => cfg!(unix) && nix::unistd::geteuid().is_root(),
        }
    }
}

impl Copier {
    /// Creates a client with the given isolation policy.
    pub fn new(policy: IsolationPolicy) -> Self {
        Self { policy }
    }

    /// Evaluates the directory's path, including any intermediate symbolic
    /// links.
    pub fn eval(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
    ) -> FerryResult<PathBuf> {
        let response = self.run(
            request(root, directory, &[], Operation::Eval),
            None,
            None,
        )?;
        match response.payload {
            Payload::Eval { evaluated } => Ok(evaluated),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Globs the specified patterns under the directory and returns one
    /// result group per pattern.
    pub fn stat(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: StatOptions,
        globs: &[String],
    ) -> FerryResult<Vec<StatsForGlob>> {
        let response = self.run(
            request(root, directory, globs, Operation::Stat(options)),
            None,
            None,
        )?;
        match response.payload {
            Payload::Stat { globs } => Ok(globs),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Produces an archive containing items matching the glob patterns and
    /// writes it to `bulk_writer`.
    pub fn get(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: GetOptions,
        globs: &[String],
        mut bulk_writer: impl Write + Send,
    ) -> FerryResult<()> {
        let response = self.run(
            request(root, directory, globs, Operation::Get(options)),
            None,
            Some(&mut bulk_writer),
        )?;
        match response.payload {
            Payload::Get {} => Ok(()),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Extracts an archive read from `bulk_reader` at the specified
    /// directory.
    pub fn put(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: PutOptions,
        mut bulk_reader: impl Read + Send,
    ) -> FerryResult<()> {
        let response = self.run(
            request(root, directory, &[], Operation::Put(options)),
            Some(&mut bulk_reader),
            None,
        )?;
        match response.payload {
            Payload::Put {} => Ok(()),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Ensures that the specified directory exists, creating missing
    /// components with the given ownership and permissions.
    pub fn mkdir(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: MkdirOptions,
    ) -> FerryResult<()> {
        let response = self.run(
            request(root, directory, &[], Operation::Mkdir(options)),
            None,
            None,
        )?;
        match response.payload {
            Payload::Mkdir {} => Ok(()),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Removes the specified item, traversing intermediate symbolic links
    /// but not the final component.
    pub fn remove(
        &self,
        root: impl AsRef<Path>,
        item: impl AsRef<Path>,
        options: RemoveOptions,
    ) -> FerryResult<()> {
        let response = self.run(
            request(root, item, &[], Operation::Remove(options)),
            None,
            None,
        )?;
        match response.payload {
            Payload::Remove {} => Ok(()),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Ensures that the named placeholder paths exist under the directory.
    /// Returns the paths that had to be created, and snapshots of the
    /// pre-existing parents they were created beneath.
    pub fn ensure(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: EnsureOptions,
    ) -> FerryResult<(Vec<PathBuf>, Vec<EnsureParentPath>)> {
        let response = self.run(
            request(root, directory, &[], Operation::Ensure(options)),
            None,
            None,
        )?;
        match response.payload {
            Payload::Ensure { created, noted } => Ok((created, noted)),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Removes the named paths if they still match the supplied
    /// expectations, returning the paths actually removed.
    pub fn conditional_remove(
        &self,
        root: impl AsRef<Path>,
        directory: impl AsRef<Path>,
        options: ConditionalRemoveOptions,
    ) -> FerryResult<Vec<PathBuf>> {
        let response = self.run(
            request(root, directory, &[], Operation::ConditionalRemove(options)),
            None,
            None,
        )?;
        match response.payload {
            Payload::ConditionalRemove { removed } => Ok(removed),
            other => Err(unexpected_payload(other)),
        }
    }

    /// Fills in defaults, validates the root/directory pair, picks the
    /// execution strategy, and runs the request.
    fn run(
        &self,
        mut req: Request,
        bulk_reader: Option<&mut (dyn Read + Send)>,
        bulk_writer: Option<&mut (dyn Write + Send)>,
    ) -> FerryResult<Response> {
        if req.directory.as_os_str().is_empty() {
            req.directory = if req.root.as_os_str().is_empty() {
                std::env::current_dir()?
            } else {
                req.root.clone()
            };
        }
        if req.root.as_os_str().is_empty() {
            req.root = PathBuf::from("/");
        }
        if req.directory.is_absolute() {
            convert_to_rel_subdirectory(&req.root, &req.directory)?;
        }
        let mut response = if !is_fs_root(&req.root) && self.policy.wants_subprocess() {
            subprocess::run(req, bulk_reader, bulk_writer)?
        } else {
            inprocess::run(req, bulk_reader, bulk_writer)?
        };
        if let Some(error) = response.error.take() {
            return Err(FerryError::Operation(error));
        }
        Ok(response)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Evaluates the directory's path under the root, including any intermediate
/// symbolic links.
pub fn eval(root: impl AsRef<Path>, directory: impl AsRef<Path>) -> FerryResult<PathBuf> {
    Copier::default().eval(root, directory)
}

/// Globs the specified patterns in the specified directory and returns the
/// results, one group per pattern.
pub fn stat(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: StatOptions,
    globs: &[String],
) -> FerryResult<Vec<StatsForGlob>> {
    Copier::default().stat(root, directory, options, globs)
}

/// Produces an archive containing items that match the specified glob
/// patterns and writes it to `bulk_writer`.
pub fn get(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: GetOptions,
    globs: &[String],
    bulk_writer: impl Write + Send,
) -> FerryResult<()> {
    Copier::default().get(root, directory, options, globs, bulk_writer)
}

/// Extracts an archive from `bulk_reader` at the specified directory.
pub fn put(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: PutOptions,
    bulk_reader: impl Read + Send,
) -> FerryResult<()> {
    Copier::default().put(root, directory, options, bulk_reader)
}

/// Ensures that the specified directory exists with the given ownership and
/// permissions.
pub fn mkdir(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: MkdirOptions,
) -> FerryResult<()> {
    Copier::default().mkdir(root, directory, options)
}

/// Removes the specified item, recursively if `options.all` is set.
pub fn remove(
    root: impl AsRef<Path>,
    item: impl AsRef<Path>,
    options: RemoveOptions,
) -> FerryResult<()> {
    Copier::default().remove(root, item, options)
}

/// Ensures that the specified placeholder paths exist under the root.
pub fn ensure(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: EnsureOptions,
) -> FerryResult<(Vec<PathBuf>, Vec<EnsureParentPath>)> {
    Copier::default().ensure(root, directory, options)
}

/// Removes the named items if they're present and still match the supplied
/// conditions, returning the list of items removed.
pub fn conditional_remove(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    options: ConditionalRemoveOptions,
) -> FerryResult<Vec<PathBuf>> {
    Copier::default().conditional_remove(root, directory, options)
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

fn request(
    root: impl AsRef<Path>,
    directory: impl AsRef<Path>,
    globs: &[String],
    op: Operation,
) -> Request {
    Request {
        root: root.as_ref().to_path_buf(),
        directory: directory.as_ref().to_path_buf(),
        globs: globs.to_vec(),
        op,
    }
}

fn unexpected_payload(payload: Payload) -> FerryError {
    FerryError::Protocol(format!("unexpected response payload: {payload:?}"))
}
