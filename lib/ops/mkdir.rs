use std::{fs::DirBuilder, io, os::unix::fs::DirBuilderExt, path::PathBuf};

use crate::{
    fsutil::{path::convert_to_rel_subdirectory, resolve::resolve_path, unix},
    idmap::IdMappings,
};

use super::{
    options::MkdirOptions,
    request::ResolvedRequest,
    response::{Payload, Response},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_mkdir(
    req: &ResolvedRequest,
    options: &MkdirOptions,
    idmap: Option<&IdMappings>,
) -> Response {
    let error_response = |message: String| Response::error(Payload::Mkdir {}, message);

    let mut dir_owner = options.chown_new;
    let dir_mode = options.chmod_new.unwrap_or(0o755);
    if let Some(idmap) = idmap {
        // with a mapping in play, even the default container 0:0 translates
        let owner = dir_owner.unwrap_or_default();
        dir_owner = match idmap.to_host(owner) {
            Ok(owner) => Some(owner),
            Err(err) => {
                return error_response(format!(
                    "mkdir: error mapping container filesystem owner {}:{} to host filesystem owner: {err}",
                    owner.uid, owner.gid
                ))
            }
        };
    }

    let directory = match resolve_path(req.root(), req.directory(), true, None) {
        Ok(directory) => directory,
        Err(err) => {
            return error_response(format!(
                "mkdir: error resolving {:?}: {err}",
                req.directory()
            ))
        }
    };
    let rel = match convert_to_rel_subdirectory(req.root(), &directory) {
        Ok(rel) => rel,
        Err(err) => {
            return error_response(format!(
                "mkdir: error computing path of {directory:?} relative to {:?}: {err}",
                req.root()
            ))
        }
    };

    let mut subdir = PathBuf::new();
    let mut created: Vec<PathBuf> = Vec::new();
    for component in rel.components() {
        subdir.push(component);
        let path = req.root().join(&subdir);
        match DirBuilder::new().mode(0o700).create(&path) {
            Ok(()) => {
                if let Some(owner) = dir_owner {
                    if let Err(err) = unix::chown(&path, owner.uid, owner.gid) {
                        return error_response(format!(
                            "mkdir: error setting owner of {path:?} to {}:{}: {err}",
                            owner.uid, owner.gid
                        ));
                    }
                }
                if let Err(err) = unix::chmod(&path, dir_mode) {
                    return error_response(format!(
                        "mkdir: error setting permissions on {path:?} to 0{dir_mode:o}: {err}"
                    ));
                }
                created.push(path);
            }
            Err(err)
                if err.kind() == io::ErrorKind::AlreadyExists
                    || err.raw_os_error() == Some(libc::EISDIR) => {}
            Err(err) => {
                return error_response(format!("mkdir: error checking directory {path:?}: {err}"))
            }
        }
    }
    // set timestamps last: creating nested directories would re-dirty the
    // timestamps of directories that had just been stamped
    if let Some(when) = options.mod_time_new {
        for new_directory in &created {
            if let Err(err) = unix::lutimes(false, new_directory, when, when) {
                return error_response(format!(
                    "mkdir: error setting datestamp on {new_directory:?}: {err}"
                ));
            }
        }
    }
    Response::new(Payload::Mkdir {})
}
