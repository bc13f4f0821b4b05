use std::path::{Path, PathBuf};

use crate::fsutil::{path::convert_to_rel_subdirectory, resolve::resolve_path};

use super::{
    request::ResolvedRequest,
    response::{Payload, Response},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_eval(req: &ResolvedRequest) -> Response {
    let resolved = match resolve_path(req.root(), req.directory(), true, None) {
        Ok(resolved) => resolved,
        Err(err) => {
            return Response::error(
                Payload::Eval {
                    evaluated: PathBuf::new(),
                },
                format!("eval: error resolving {:?}: {err}", req.directory()),
            )
        }
    };
    // re-attach the caller-visible root prefix
    let evaluated = match convert_to_rel_subdirectory(Path::new("/"), &resolved) {
        Ok(rel) => req.root_prefix.join(rel),
        Err(err) => {
            return Response::error(
                Payload::Eval {
                    evaluated: PathBuf::new(),
                },
                format!("eval: {err}"),
            )
        }
    };
    Response::new(Payload::Eval { evaluated })
}
