//! Ensure and ConditionalRemove: idempotent placeholder creation with
//! provenance snapshots of walked-through parents, and the matching
//! compare-and-delete. Together they implement mountpoint stub management.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, DirBuilder, OpenOptions},
    io,
    os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt},
    path::{Component, Path, PathBuf},
};

use crate::{
    fsutil::{
        path::{clean_rel, convert_to_rel_subdirectory},
        resolve::resolve_path,
        unix,
    },
    idmap::{IdMappings, IdPair},
};

use super::{
    options::{ConditionalRemoveOptions, EnsureKind, EnsureOptions, EnsureParentPath},
    request::ResolvedRequest,
    response::{Payload, Response},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_ensure(
    req: &ResolvedRequest,
    options: &EnsureOptions,
    idmap: Option<&IdMappings>,
) -> Response {
    let error_response = |message: String| {
        Response::error(
            Payload::Ensure {
                created: Vec::new(),
                noted: Vec::new(),
            },
            message,
        )
    };

    let mut items = options.paths.clone();
    items.sort_by(|a, b| a.path.cmp(&b.path));
    let mut created: Vec<PathBuf> = Vec::new();
    let mut noted_by_name: BTreeMap<PathBuf, EnsureParentPath> = BTreeMap::new();

    for item in &items {
        let mut owner = item.chown;
        let mut mode = match item.kind {
            EnsureKind::File => 0o000,
            EnsureKind::Directory => 0o700,
        };
        if let Some(chmod) = item.chmod {
            mode = chmod;
        }
        if let Some(idmap) = idmap {
            let requested = owner.unwrap_or_default();
            owner = match idmap.to_host(requested) {
                Ok(owner) => Some(owner),
                Err(err) => {
                    return error_response(format!(
                        "ensure: error mapping container filesystem owner {}:{} to host filesystem owner: {err}",
                        requested.uid, requested.gid
                    ))
                }
            };
        }
        let directory = match resolve_path(req.root(), req.directory(), true, None) {
            Ok(directory) => directory,
            Err(err) => {
                return error_response(format!(
                    "ensure: error resolving {:?}: {err}",
                    req.directory()
                ))
            }
        };
        let rel = match convert_to_rel_subdirectory(req.root(), &directory) {
            Ok(rel) => rel,
            Err(err) => {
                return error_response(format!(
                    "ensure: error computing path of {directory:?} relative to {:?}: {err}",
                    req.root()
                ))
            }
        };
        let components = path_components(&rel.join(clean_rel(&item.path)));

        let mut subdir = PathBuf::new();
        for (i, component) in components.iter().enumerate() {
            let parent_path = if subdir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                subdir.clone()
            };
            let leaf = if parent_path == Path::new(".") {
                PathBuf::from(component)
            } else {
                parent_path.join(component)
            };
            let parent_info = match fs::metadata(req.root().join(&parent_path)) {
                Ok(info) => info,
                Err(err) => {
                    return error_response(format!(
                        "ensure: checking datestamps on {parent_path:?}: {err}"
                    ))
                }
            };
            if parent_path != Path::new(".") {
                let (uid, gid) = unix::owner(&parent_info);
                let snapshot = EnsureParentPath {
                    path: parent_path.clone(),
                    mtime: parent_info.modified().ok(),
                    mode: Some(parent_info.mode() & 0o7777),
                    owner: Some(IdPair { uid, gid }),
                };
                noted_by_name.insert(parent_path.clone(), snapshot);
            }
            let is_leaf = i == components.len() - 1;
            // walked-through directories get a usable default mode; the
            // item's own mode only applies to the leaf
            let component_mode = if is_leaf { mode } else { 0o700 };
            let result: io::Result<()> = if !is_leaf || item.kind == EnsureKind::Directory {
                let result = DirBuilder::new()
                    .mode(component_mode)
                    .create(req.root().join(&leaf));
                subdir = leaf.clone();
                result
            } else {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(component_mode)
                    .open(req.root().join(&leaf))
                    .map(drop)
            };
            match result {
                Ok(()) => {
                    created.push(leaf.clone());
                    let full = req.root().join(&leaf);
                    if let Some(owner) = owner {
                        if let Err(err) = unix::chown(&full, owner.uid, owner.gid) {
                            return error_response(format!(
                                "ensure: error setting owner of {leaf:?} to {}:{}: {err}",
                                owner.uid, owner.gid
                            ));
                        }
                    }
                    if let Err(err) = unix::chmod(&full, component_mode) {
                        return error_response(format!(
                            "ensure: error setting permissions on {leaf:?} to 0{component_mode:o}: {err}"
                        ));
                    }
                    if let Some(mtime) = item.mtime {
                        if let Err(err) = unix::lutimes(false, &full, mtime, mtime) {
                            return error_response(format!(
                                "ensure: resetting datestamp on {leaf:?}: {err}"
                            ));
                        }
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        || err.raw_os_error() == Some(libc::EISDIR) => {}
                Err(err) => {
                    return error_response(format!("ensure: error checking item {leaf:?}: {err}"))
                }
            }
            // creating the leaf bumped the parent's mtime; put it back
            if let Ok(mtime) = parent_info.modified() {
                if let Err(err) =
                    unix::lutimes(false, &req.root().join(&parent_path), mtime, mtime)
                {
                    return error_response(format!(
                        "ensure: resetting datestamp on {parent_path:?}: {err}"
                    ));
                }
            }
        }
    }
    created.sort();
    let noted: Vec<EnsureParentPath> = noted_by_name
        .into_values()
        .filter(|parent| !created.contains(&parent.path))
        .collect();
    Response::new(Payload::Ensure { created, noted })
}

pub(crate) fn handler_conditional_remove(
    req: &ResolvedRequest,
    options: &ConditionalRemoveOptions,
    idmap: Option<&IdMappings>,
) -> Response {
    let error_response = |message: String| {
        Response::error(
            Payload::ConditionalRemove {
                removed: Vec::new(),
            },
            message,
        )
    };

    let mut items = options.paths.clone();
    // deepest-first, so children get removal attempts before their parents
    items.sort_by(|a, b| b.path.cmp(&a.path));
    let mut removed: Vec<PathBuf> = Vec::new();

    for item in &items {
        let mut expected_owner = item.owner.unwrap_or_default();
        if let Some(idmap) = idmap {
            expected_owner = match idmap.to_host(expected_owner) {
                Ok(owner) => owner,
                Err(err) => {
                    return error_response(format!(
                        "conditional-remove: error mapping container filesystem owner {}:{} to host filesystem owner: {err}",
                        expected_owner.uid, expected_owner.gid
                    ))
                }
            };
        }
        let directory = match resolve_path(req.root(), req.directory(), true, None) {
            Ok(directory) => directory,
            Err(err) => {
                return error_response(format!(
                    "conditional-remove: error resolving {:?}: {err}",
                    req.directory()
                ))
            }
        };
        let rel = match convert_to_rel_subdirectory(req.root(), &directory) {
            Ok(rel) => rel,
            Err(err) => {
                return error_response(format!(
                    "conditional-remove: error computing path of {directory:?} relative to {:?}: {err}",
                    req.root()
                ))
            }
        };
        let components = path_components(&rel.join(clean_rel(&item.path)));
        if components.is_empty() {
            continue;
        }
        let mut item_path = req.root().to_path_buf();
        for component in &components {
            item_path.push(component);
        }
        let item_info = match fs::symlink_metadata(&item_path) {
            Ok(info) => info,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // already gone is as good as removed
                removed.push(item.path.clone());
                continue;
            }
            Err(err) => {
                return error_response(format!(
                    "conditional-remove: checking on candidate {item_path:?}: {err}"
                ))
            }
        };
        let parent_path = item_path.parent().unwrap_or(req.root()).to_path_buf();
        let parent_info = match fs::metadata(&parent_path) {
            Ok(info) => info,
            Err(err) => {
                return error_response(format!(
                    "conditional-remove: checking on parent directory {parent_path:?}: {err}"
                ))
            }
        };

        if let Some(mode) = item.mode {
            if item_info.mode() & 0o777 != mode & 0o777 {
                // mismatch, modified? leave it alone
                continue;
            }
        }
        if let Some(mtime) = item.mtime {
            if item_info.modified().ok() != Some(mtime) {
                continue;
            }
        }
        if item.owner.is_some() {
            let (uid, gid) = unix::owner(&item_info);
            if uid != expected_owner.uid || gid != expected_owner.gid {
                continue;
            }
        }
        let result = if item_info.is_dir() {
            fs::remove_dir(&item_path)
        } else {
            fs::remove_file(&item_path)
        };
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err)
                if err.raw_os_error() == Some(libc::ENOTEMPTY)
                    || err.raw_os_error() == Some(libc::EEXIST) =>
            {
                // not removed because it has contents we're keeping; fine
                continue;
            }
            Err(err) => {
                return error_response(format!(
                    "conditional-remove: removing {item_path:?}: {err}"
                ))
            }
        }
        removed.push(item.path.clone());
        if let Ok(mtime) = parent_info.modified() {
            if let Err(err) = unix::lutimes(false, &parent_path, mtime, mtime) {
                return error_response(format!(
                    "conditional-remove: resetting datestamp on {parent_path:?}: {err}"
                ));
            }
        }
    }
    removed.sort();
    Response::new(Payload::ConditionalRemove { removed })
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

fn path_components(path: &Path) -> Vec<OsString> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(c) if !c.is_empty() => Some(c.to_os_string()),
            _ => None,
        })
        .collect()
}
