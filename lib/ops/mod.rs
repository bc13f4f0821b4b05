//! The operation handlers and the request/response types that bind them to
//! the control channel.

use std::io::{Read, Write};

use crate::{idmap::IdMappings, pattern::ExclusionMatcher, FerryError, FerryResult};

mod ensure;
mod eval;
mod get;
mod mkdir;
mod options;
mod put;
mod remove;
mod rename;
mod request;
mod response;
mod stat;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use options::*;
pub use request::{Operation, Request};
pub use response::*;

pub(crate) use request::ResolvedRequest;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The bulk-transfer half of an operation, to be run after its response has
/// been delivered: Get writes the archive, Put drains it.
pub(crate) enum BulkCallback<'a> {
    /// Writes the archive to the bulk-out channel.
    Get(get::GetCallback<'a>),

    /// Reads the archive from the bulk-in channel.
    Put(put::PutCallback<'a>),
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Dispatches one normalized request to its handler.
///
/// Handler failures are folded into the response as an error string; an
/// `Err` from this function means the request itself could not be processed
/// (which, across a process boundary, is a protocol-level failure).
pub(crate) fn handle(req: &ResolvedRequest) -> FerryResult<(Response, Option<BulkCallback<'_>>)> {
    let matcher = ExclusionMatcher::new(req.request.op.excludes())?;
    let uid_map = req.request.op.uid_map();
    let gid_map = req.request.op.gid_map();
    let idmap = if !uid_map.is_empty() && !gid_map.is_empty() {
        Some(IdMappings::new(uid_map.to_vec(), gid_map.to_vec()))
    } else {
        None
    };

    match &req.request.op {
        Operation::Eval => Ok((eval::handler_eval(req), None)),
        Operation::Stat(options) => Ok((
            stat::handler_stat(req, options, &matcher, idmap.as_ref()),
            None,
        )),
        Operation::Get(options) => {
            let (response, callback) = get::handler_get(req, options, matcher, idmap);
            Ok((response, callback.map(BulkCallback::Get)))
        }
        Operation::Put(options) => {
            let (response, callback) = put::handler_put(req, options, idmap);
            Ok((response, callback.map(BulkCallback::Put)))
        }
        Operation::Mkdir(options) => Ok((mkdir::handler_mkdir(req, options, idmap.as_ref()), None)),
        Operation::Remove(options) => Ok((remove::handler_remove(req, options), None)),
        Operation::Ensure(options) => Ok((
            ensure::handler_ensure(req, options, idmap.as_ref()),
            None,
        )),
        Operation::ConditionalRemove(options) => Ok((
            ensure::handler_conditional_remove(req, options, idmap.as_ref()),
            None,
        )),
        Operation::Quit => Err(FerryError::InvalidRequest(
            "quit is not a dispatchable operation".into(),
        )),
    }
}

/// Runs a bulk callback against the caller-provided endpoints.
pub(crate) fn run_bulk(
    callback: BulkCallback<'_>,
    bulk_reader: &mut dyn Read,
    bulk_writer: &mut dyn Write,
) -> FerryResult<()> {
    match callback {
        BulkCallback::Get(callback) => callback(bulk_writer),
        BulkCallback::Put(callback) => callback(bulk_reader),
    }
}
