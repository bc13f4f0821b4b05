//! The Get handler: expand globs, walk matched trees, and stream everything
//! that survives exclusion out as a single sequential tar archive.

use std::{
    collections::HashSet,
    fs::{self, File, Metadata},
    io::{self, Write},
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tar::{EntryType, Header, HeaderMode};
use walkdir::WalkDir;

use crate::{
    archive::{auto_decompress, is_archive_path, lget_xattrs, HardlinkChecker, XATTR_PAX_PREFIX},
    fsutil::{
        glob::extended_glob,
        path::{clean_rel, convert_to_rel_subdirectory, looks_like_abs},
        resolve::{path_is_excluded, MAX_SYMLINK_FOLLOWS},
        unix,
    },
    idmap::{IdMappings, IdPair},
    pattern::ExclusionMatcher,
    FerryError, FerryResult,
};

use super::{
    options::GetOptions,
    rename::handle_rename,
    request::ResolvedRequest,
    response::{Payload, Response},
    stat::handler_stat,
    StatOptions,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The deferred bulk-writing half of a Get: runs after the response has been
/// delivered, streaming the archive into the bulk channel.
pub(crate) type GetCallback<'a> = Box<dyn FnOnce(&mut dyn Write) -> FerryResult<()> + 'a>;

struct QueueItem {
    glob: PathBuf,
    parents: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_get<'a>(
    req: &'a ResolvedRequest,
    options: &'a GetOptions,
    matcher: ExclusionMatcher,
    idmap: Option<IdMappings>,
) -> (Response, Option<GetCallback<'a>>) {
    let error_response = |message: String| (Response::error(Payload::Get {}, message), None);

    // stat first, reusing its glob validation
    let stat_options = StatOptions::builder()
        .check_for_archives(options.expand_archives)
        .build();
    let stat_response = handler_stat(req, &stat_options, &matcher, idmap.as_ref());
    if let Some(error) = stat_response.error {
        return error_response(error);
    }
    if req.globs().is_empty() {
        return error_response("get: expected at least one glob pattern, got none".into());
    }

    // build a queue of items by globbing
    let mut queue: Vec<QueueItem> = Vec::new();
    let mut glob_matched_count = 0usize;
    for glob in req.globs() {
        let matched = match extended_glob(Path::new(glob)) {
            Ok(matched) => matched,
            Err(err) => return error_response(format!("get: glob {glob:?}: {err}")),
        };
        for path in matched {
            let parents = if options.parents {
                get_parents(&path, req.directory())
            } else {
                Vec::new()
            };
            glob_matched_count += 1;
            queue.push(QueueItem { glob: path, parents });
        }
    }
    if queue.is_empty() {
        return error_response(format!(
            "get: globs {:?} matched nothing ({glob_matched_count} filtered out): no such file or directory",
            req.globs()
        ));
    }
    let top_info = match fs::metadata(req.directory()) {
        Ok(info) => info,
        Err(err) => {
            return error_response(format!(
                "get: error reading info about directory {:?}: {err}",
                req.directory()
            ))
        }
    };

    let callback: GetCallback<'a> = Box::new(move |bulk_writer: &mut dyn Write| {
        let mut tw = tar::Builder::new(bulk_writer);
        let mut hardlink_checker = HardlinkChecker::new();
        let mut items_copied = 0usize;
        let mut added_parents: HashSet<String> = HashSet::new();
        for mut qitem in queue {
            let item = qitem.glob.clone();
            // if we're not discarding the names of individual directories,
            // keep track of this one
            let rel_name_prefix = if options.keep_directory_names {
                item.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                String::new()
            };
            let info = fs::symlink_metadata(&item)?;
            if options.parents && info.is_dir() && !qitem.parents.contains(&item) {
                qitem.parents.push(item.clone());
            }
            // parents go into the tarball first, each exactly once
            for parent in &qitem.parents {
                let parent_info = fs::symlink_metadata(parent)?;
                let (resolved_parent, parent_info) =
                    check_links(parent.clone(), req, options, parent_info)?;
                let parent_name = convert_to_rel_subdirectory(req.directory(), parent)?
                    .to_string_lossy()
                    .into_owned();
                if parent_name.is_empty() || parent_name == "." {
                    continue;
                }
                if !added_parents.insert(parent_name.clone()) {
                    continue;
                }
                match get_one(
                    &parent_info,
                    None,
                    &parent_name,
                    &resolved_parent,
                    options,
                    &mut tw,
                    &mut hardlink_checker,
                    idmap.as_ref(),
                ) {
                    Ok(()) => {}
                    Err(err) if options.ignore_unreadable && err.is_permission() => continue,
                    Err(err) if is_not_found(&err) => {
                        tracing::warn!("file disappeared while reading: {resolved_parent:?}");
                        return Ok(());
                    }
                    Err(err) => return Err(FerryError::Operation(format!("get: {item:?}: {err}"))),
                }
                items_copied += 1;
            }

            let (item, info) = check_links(item, req, options, info)?;

            if info.is_dir() {
                walk_directory(
                    req,
                    options,
                    &matcher,
                    idmap.as_ref(),
                    &item,
                    &rel_name_prefix,
                    &top_info,
                    &mut tw,
                    &mut hardlink_checker,
                )
                .map_err(|err| {
                    FerryError::Operation(format!("get: {:?}({item:?}): {err}", qitem.glob))
                })?;
                items_copied += 1;
            } else {
                let (_, skip) = path_is_excluded(req.root(), &item, Some(&matcher))?;
                if skip {
                    continue;
                }
                let name = if options.parents {
                    let name = convert_to_rel_subdirectory(req.directory(), &qitem.glob)?
                        .to_string_lossy()
                        .into_owned();
                    if name.is_empty() || name == "." {
                        continue;
                    }
                    name
                } else {
                    qitem
                        .glob
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                };
                match get_one(
                    &info,
                    None,
                    &name,
                    &item,
                    options,
                    &mut tw,
                    &mut hardlink_checker,
                    idmap.as_ref(),
                ) {
                    Ok(()) => {}
                    Err(err) if options.ignore_unreadable && err.is_permission() => continue,
                    Err(err) => {
                        return Err(FerryError::Operation(format!(
                            "get: {:?}: {err}",
                            qitem.glob
                        )))
                    }
                }
                items_copied += 1;
            }
        }
        if items_copied == 0 {
            return Err(FerryError::CopiedNoItems);
        }
        tw.finish()?;
        Ok(())
    });

    (Response::new(Payload::Get {}), Some(callback))
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

/// The ancestors of `path` strictly between `stop_path` and `path`, ordered
/// from the top down.
fn get_parents(path: &Path, stop_path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut current = path.to_path_buf();
    while current != Path::new("/") && current != Path::new(".") && current != stop_path {
        let Some(parent) = current.parent() else {
            break;
        };
        current = parent.to_path_buf();
        if current == stop_path {
            continue;
        }
        out.push(current.clone());
    }
    out.reverse();
    out
}

/// Chases symlinks on a matched item, staying under the root, unless the
/// options say to keep links as links.
fn check_links(
    item: PathBuf,
    req: &ResolvedRequest,
    options: &GetOptions,
    info: Metadata,
) -> FerryResult<(PathBuf, Metadata)> {
    let old_item = item.clone();
    let mut item = item;
    let mut info = info;
    let mut followed = 0u32;
    while !options.no_deref_symlinks && info.file_type().is_symlink() {
        followed += 1;
        if followed > MAX_SYMLINK_FOLLOWS {
            return Err(FerryError::TooManySymlinks { path: old_item });
        }
        let target = fs::read_link(&item)?;
        item = if looks_like_abs(&target) {
            req.root().join(clean_rel(&target))
        } else {
            item.parent().unwrap_or(Path::new("/")).join(&target)
        };
        convert_to_rel_subdirectory(req.root(), &item).map_err(|_| {
            FerryError::PathEscapesRoot {
                path: item.clone(),
                root: req.root().to_path_buf(),
            }
        })?;
        info = fs::symlink_metadata(&item)?;
    }
    Ok((item, info))
}

#[allow(clippy::too_many_arguments)]
fn walk_directory(
    req: &ResolvedRequest,
    options: &GetOptions,
    matcher: &ExclusionMatcher,
    idmap: Option<&IdMappings>,
    item: &Path,
    rel_name_prefix: &str,
    top_info: &Metadata,
    tw: &mut tar::Builder<&mut dyn Write>,
    hardlink_checker: &mut HardlinkChecker,
) -> FerryResult<()> {
    // we don't expand any of the contents that are archives
    let mut walk_options = options.clone();
    walk_options.expand_archives = false;

    let mut it = WalkDir::new(item)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if options.ignore_unreadable && walk_error_is_permission(&err) {
                    continue;
                }
                if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::NotFound) {
                    tracing::warn!("file disappeared while reading: {:?}", err.path());
                    continue;
                }
                return Err(err.into());
            }
        };
        if entry.file_type().is_socket() {
            tracing::warn!("skipping socket {:?}", entry.file_name());
            continue;
        }
        // the path of this entry relative to the top-level item, for the tar
        // header
        let mut rel = convert_to_rel_subdirectory(item, entry.path())?
            .to_string_lossy()
            .into_owned();
        // prefix the original item's name if we're keeping it
        if !rel_name_prefix.is_empty() {
            rel = if rel == "." {
                rel_name_prefix.to_string()
            } else {
                format!("{rel_name_prefix}/{rel}")
            };
        }
        if rel.is_empty() || rel == "." {
            // skip the "." entry
            continue;
        }
        let (skipped_path, skip) = path_is_excluded(req.root(), entry.path(), Some(matcher))?;
        if skip {
            if entry.file_type().is_dir() {
                if !prune_needs_descent(matcher, &skipped_path) {
                    it.skip_current_dir();
                }
            }
            // an excluded item is not emitted, but a more specific
            // re-inclusion for something under it might still apply
            continue;
        }
        let symlink_target = if entry.path_is_symlink() {
            Some(fs::read_link(entry.path())?)
        } else {
            None
        };
        let info = fs::symlink_metadata(entry.path())?;
        // if it's a directory and we're staying on one device, and it's on a
        // different device than the one we started from, skip its contents
        let skip_contents = entry.file_type().is_dir()
            && options.no_cross_device
            && !unix::same_device(top_info, &info);
        let name = if options.parents {
            convert_to_rel_subdirectory(req.directory(), entry.path())?
                .to_string_lossy()
                .into_owned()
        } else {
            rel
        };
        match get_one(
            &info,
            symlink_target,
            &name,
            entry.path(),
            &walk_options,
            tw,
            hardlink_checker,
            idmap,
        ) {
            Ok(()) => {
                if skip_contents {
                    it.skip_current_dir();
                }
            }
            Err(err) if options.ignore_unreadable && err.is_permission() => {
                if skip_contents {
                    it.skip_current_dir();
                }
            }
            Err(err) if is_not_found(&err) => {
                tracing::warn!("file disappeared while reading: {:?}", entry.path());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Whether an excluded directory still has to be descended because some
/// re-inclusion pattern names something beneath it.
fn prune_needs_descent(matcher: &ExclusionMatcher, skipped_path: &Path) -> bool {
    if !matcher.has_reinclusions() {
        return false;
    }
    let trimmed = skipped_path
        .to_string_lossy()
        .trim_matches('/')
        .to_string();
    matcher
        .patterns()
        .iter()
        .filter(|pattern| pattern.is_reinclusion())
        .any(|pattern| {
            let spec = pattern.spec().trim_matches('/');
            format!("{spec}/").starts_with(&trimmed)
        })
}

/// Emits one filesystem item into the archive: header derivation, renaming,
/// permission-bit stripping, xattr PAX records, optional inline archive
/// expansion, hardlink deduplication, and ID mapping all happen here.
#[allow(clippy::too_many_arguments)]
fn get_one(
    meta: &Metadata,
    symlink_target: Option<PathBuf>,
    name: &str,
    content_path: &Path,
    options: &GetOptions,
    tw: &mut tar::Builder<&mut dyn Write>,
    hardlink_checker: &mut HardlinkChecker,
    idmap: Option<&IdMappings>,
) -> FerryResult<()> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(meta, HeaderMode::Complete);

    let mut entry_name = name.replace('\\', "/");
    if !options.rename.is_empty() {
        entry_name = handle_rename(&options.rename, &entry_name);
    }
    let mut mode = header.mode()?;
    if options.strip_setuid_bit {
        mode &= !0o4000;
    }
    if options.strip_setgid_bit {
        mode &= !0o2000;
    }
    if options.strip_sticky_bit {
        mode &= !0o1000;
    }
    header.set_mode(mode);

    // read extended attributes
    let mut pax_records: Vec<(String, Vec<u8>)> = Vec::new();
    if !options.strip_xattrs {
        for (attr, value) in lget_xattrs(content_path)? {
            pax_records.push((format!("{XATTR_PAX_PREFIX}{attr}"), value));
        }
    }

    let file_type = meta.file_type();
    if file_type.is_file() {
        // if it's an archive and we're expanding archives, spool its entries
        // out in-line instead of the raw bytes (inlining the whole file would
        // also inline the EOF marker it contains)
        if options.expand_archives && is_archive_path(content_path) {
            return expand_archive(content_path, options, tw);
        }
        // if this regular file is hard linked to something we've already
        // added, emit a link entry instead of duplicating the content
        if let Some(first_name) = hardlink_checker.check(meta).cloned() {
            header.set_entry_type(EntryType::Link);
            header.set_size(0);
            apply_overrides(&mut header, meta, options, idmap, false)?;
            apply_timestamp(&mut header, options);
            if !pax_records.is_empty() {
                append_pax(tw, &pax_records)?;
            }
            tw.append_link(&mut header, entry_name, first_name)?;
            return Ok(());
        }
        hardlink_checker.add(meta, name);
    }

    if file_type.is_char_device() || file_type.is_block_device() {
        header.set_device_major(nix::sys::stat::major(meta.rdev()) as u32)?;
        header.set_device_minor(nix::sys::stat::minor(meta.rdev()) as u32)?;
    }

    apply_overrides(&mut header, meta, options, idmap, file_type.is_dir())?;
    apply_timestamp(&mut header, options);

    if file_type.is_symlink() {
        let target = match symlink_target {
            Some(target) => target,
            None => fs::read_link(content_path)?,
        };
        if !pax_records.is_empty() {
            append_pax(tw, &pax_records)?;
        }
        tw.append_link(&mut header, entry_name, target)?;
        return Ok(());
    }

    if file_type.is_dir() {
        // open the directory first to make sure we can access it
        let _probe = File::open(content_path)?;
        if !entry_name.ends_with('/') {
            entry_name.push('/');
        }
        if !pax_records.is_empty() {
            append_pax(tw, &pax_records)?;
        }
        tw.append_data(&mut header, entry_name, io::empty())?;
        return Ok(());
    }

    if file_type.is_file() {
        // open the file first so that we don't write a header for it if we
        // can't actually read it
        let file = File::open(content_path)?;
        if !pax_records.is_empty() {
            append_pax(tw, &pax_records)?;
        }
        tw.append_data(&mut header, entry_name, file)?;
        return Ok(());
    }

    // FIFOs and devices carry no content
    if !pax_records.is_empty() {
        append_pax(tw, &pax_records)?;
    }
    tw.append_data(&mut header, entry_name, io::empty())?;
    Ok(())
}

/// Inline-expands a (possibly compressed) tarball's entries into the outgoing
/// stream, applying renames and the forced timestamp to each.
fn expand_archive(
    content_path: &Path,
    options: &GetOptions,
    tw: &mut tar::Builder<&mut dyn Write>,
) -> FerryResult<()> {
    let file = File::open(content_path)?;
    let reader = auto_decompress(file)?;
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let mut header = entry.header().clone();
        let mut entry_name = entry.path()?.to_string_lossy().into_owned();
        if !options.rename.is_empty() {
            entry_name = handle_rename(&options.rename, &entry_name);
        }
        apply_timestamp(&mut header, options);
        let entry_type = header.entry_type();
        if entry_type == EntryType::Link || entry_type == EntryType::Symlink {
            let target = entry
                .link_name()?
                .map(|t| t.into_owned())
                .unwrap_or_default();
            tw.append_link(&mut header, entry_name, target)?;
        } else {
            tw.append_data(&mut header, entry_name, &mut entry)?;
        }
    }
    Ok(())
}

fn apply_overrides(
    header: &mut Header,
    meta: &Metadata,
    options: &GetOptions,
    idmap: Option<&IdMappings>,
    is_dir: bool,
) -> FerryResult<()> {
    // map the ownership for the archive
    let (mut uid, mut gid) = unix::owner(meta);
    if let Some(idmap) = idmap {
        let mapped = idmap.to_container(IdPair { uid, gid })?;
        uid = mapped.uid;
        gid = mapped.gid;
    }
    // force ownership and/or permissions, if requested
    if is_dir {
        if let Some(owner) = &options.chown_dirs {
            uid = owner.uid;
            gid = owner.gid;
        }
        if let Some(mode) = options.chmod_dirs {
            header.set_mode(mode);
        }
    } else {
        if let Some(owner) = &options.chown_files {
            uid = owner.uid;
            gid = owner.gid;
        }
        if let Some(mode) = options.chmod_files {
            header.set_mode(mode);
        }
    }
    header.set_uid(uid as u64);
    header.set_gid(gid as u64);
    Ok(())
}

fn apply_timestamp(header: &mut Header, options: &GetOptions) {
    if let Some(timestamp) = options.timestamp {
        header.set_mtime(unix_seconds(timestamp));
    }
}

fn append_pax(
    tw: &mut tar::Builder<&mut dyn Write>,
    records: &[(String, Vec<u8>)],
) -> FerryResult<()> {
    tw.append_pax_extensions(records.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
    Ok(())
}

fn unix_seconds(when: SystemTime) -> u64 {
    when.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn is_not_found(err: &FerryError) -> bool {
    matches!(err, FerryError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound)
}

fn walk_error_is_permission(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| {
            e.kind() == io::ErrorKind::PermissionDenied
                || e.to_string().contains("permission denied")
        })
        .unwrap_or(false)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
