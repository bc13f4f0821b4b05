//! `ferry` copies filesystem content into and out of a confined directory
//! tree as tar streams.
//!
//! # Overview
//!
//! ferry is the filesystem-archive engine a container build tool needs when
//! it moves content across a privilege or namespace boundary. It exposes
//! eight operations — Eval, Stat, Get, Put, Mkdir, Remove, Ensure and
//! ConditionalRemove — that all treat one directory, the *root*, as a hard
//! confinement boundary: no path handed to them, and no symlink encountered
//! along the way, can resolve to anything outside it.
//!
//! # Key Features
//!
//! - **Symlink-safe resolution**: paths resolve lexically, one component at a
//!   time, so `..` chains and hostile symlinks clamp to the root instead of
//!   escaping it
//! - **Two isolation strategies**: a privileged process re-executes itself
//!   and chroots into the root; an unprivileged one runs in-process on the
//!   same lexical resolver, with identical results
//! - **Faithful archives**: hardlink deduplication, extended attributes as
//!   PAX records, device nodes, FIFOs, ownership remapping between container
//!   and host ID namespaces
//! - **Exclusion patterns**: docker-style excludes with `!` re-inclusions,
//!   honored consistently by Stat, Get and the resolver
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use ferry::{exec, GetOptions, PutOptions};
//!
//! fn main() -> anyhow::Result<()> {
//!     // archive /srv/build/etc out of the build root...
//!     let mut archive = Vec::new();
//!     exec::get(
//!         "/srv/build",
//!         "/srv/build",
//!         GetOptions::builder().build(),
//!         &["etc".to_string()],
//!         &mut archive,
//!     )?;
//!
//!     // ...and materialize it inside another root
//!     exec::put(
//!         "/srv/scratch",
//!         "/srv/scratch",
//!         PutOptions::builder().build(),
//!         archive.as_slice(),
//!     )?;
//!     Ok(())
//! }
//! ```
//!
//! Applications that may run with privilege must give the re-executed copier
//! child a chance to take over before doing anything else:
//!
//! ```rust,no_run
//! fn main() {
//!     ferry::exec::reexec::child_init();
//!     // ordinary program startup continues here
//! }
//! ```
//!
//! # Modules
//!
//! - [`archive`] - tarball sniffing, hardlink tracking, xattr PAX records
//! - [`cli`] - command-line interface for the ferry binary
//! - [`exec`] - the `Copier` client, isolation policy, and public operations
//! - [`fsutil`] - lexical path math, the confined resolver, glob expansion
//! - [`idmap`] - container/host uid and gid translation
//! - [`ops`] - operation options, handlers, and the request/response protocol
//! - [`pattern`] - exclusion patterns with re-inclusion semantics

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod archive;
pub mod cli;
pub mod exec;
pub mod fsutil;
pub mod idmap;
pub mod ops;
pub mod pattern;

pub use error::*;
pub use exec::{Copier, IsolationPolicy};
pub use idmap::{IdMap, IdMappings, IdPair};
pub use ops::*;
