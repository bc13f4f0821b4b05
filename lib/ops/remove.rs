use std::fs;

use crate::fsutil::resolve::resolve_path;

use super::{
    options::RemoveOptions,
    request::ResolvedRequest,
    response::{Payload, Response},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_remove(req: &ResolvedRequest, options: &RemoveOptions) -> Response {
    let error_response = |message: String| Response::error(Payload::Remove {}, message);

    // the final component is the thing being removed, so it is not dereferenced
    let resolved = match resolve_path(req.root(), req.directory(), false, None) {
        Ok(resolved) => resolved,
        Err(err) => return error_response(format!("remove: {err}")),
    };
    let result = if options.all {
        remove_recursive(&resolved)
    } else if fs::symlink_metadata(&resolved)
        .map(|info| info.is_dir())
        .unwrap_or(false)
    {
        fs::remove_dir(&resolved)
    } else {
        fs::remove_file(&resolved)
    };
    if let Err(err) = result {
        return error_response(format!("remove {:?}: {err}", req.directory()));
    }
    Response::new(Payload::Remove {})
}

/// Removes a file, symlink, or directory tree; a missing path is fine.
fn remove_recursive(path: &std::path::Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(info) if info.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
