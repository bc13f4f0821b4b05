//! The Put handler: consume a tar stream and materialize it on disk under the
//! confinement root, remapping ownership and riding out collisions.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::{self, DirBuilder, OpenOptions},
    io::{self, Read},
    os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tar::EntryType;

use crate::{
    archive::{lset_xattrs, XATTR_PAX_PREFIX},
    fsutil::{
        path::{clean_rel, convert_to_rel_subdirectory},
        resolve::resolve_path,
        unix,
    },
    idmap::{IdMappings, IdPair},
    FerryError, FerryResult,
};

use super::{
    options::PutOptions,
    rename::handle_rename,
    request::ResolvedRequest,
    response::{Payload, Response},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The deferred bulk-reading half of a Put: runs after the response has been
/// delivered, draining the archive from the bulk channel.
pub(crate) type PutCallback<'a> = Box<dyn FnOnce(&mut dyn Read) -> FerryResult<()> + 'a>;

/// State shared by the streaming pass and the deferred directory fixups.
struct PutState<'a> {
    req: &'a ResolvedRequest,
    options: &'a PutOptions,
    idmap: Option<IdMappings>,
    target_directory: PathBuf,
    dir_owner: Option<IdPair>,
    /// Owner for implicitly-created directories; absent means "leave them as
    /// the process creates them".
    default_dir_owner: Option<IdPair>,
    default_dir_mode: u32,
    file_owner: Option<IdPair>,
    /// Final modes for directories created or loosened along the way, applied
    /// in one pass at the end.
    directory_modes: HashMap<PathBuf, u32>,
    /// Directories from the archive and their timestamps, restored in reverse
    /// creation order at the end, since creating a child re-dirties the
    /// parent's mtime.
    directories_and_times: Vec<(PathBuf, SystemTime, SystemTime)>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn handler_put<'a>(
    req: &'a ResolvedRequest,
    options: &'a PutOptions,
    idmap: Option<IdMappings>,
) -> (Response, Option<PutCallback<'a>>) {
    let error_response = |message: String| (Response::error(Payload::Put {}, message), None);

    let mut dir_owner = options.chown_dirs;
    let mut default_dir_owner = options.default_dir_owner.or(options.chown_dirs);
    let mut default_dir_mode = options.chmod_dirs.unwrap_or(0o755);
    if let Some(mode) = options.default_dir_mode {
        default_dir_mode = mode;
    }
    let mut file_owner = options.chown_files;
    if let Some(idmap) = idmap.as_ref() {
        let map_owner = |owner: IdPair| idmap.to_host(owner);
        if let Some(owner) = dir_owner {
            dir_owner = match map_owner(owner) {
                Ok(owner) => Some(owner),
                Err(err) => {
                    return error_response(format!(
                        "put: error mapping container filesystem owner to host filesystem owner: {err}"
                    ))
                }
            };
        }
        // implicitly-created directories default to container 0:0
        default_dir_owner = match map_owner(default_dir_owner.unwrap_or_default()) {
            Ok(owner) => Some(owner),
            Err(err) => {
                return error_response(format!(
                    "put: error mapping container filesystem owner to host filesystem owner: {err}"
                ))
            }
        };
        if let Some(owner) = file_owner {
            file_owner = match map_owner(owner) {
                Ok(owner) => Some(owner),
                Err(err) => {
                    return error_response(format!(
                        "put: error mapping container filesystem owner to host filesystem owner: {err}"
                    ))
                }
            };
        }
    }

    let target_directory = match resolve_path(req.root(), req.directory(), true, None) {
        Ok(target) => target,
        Err(err) => {
            return error_response(format!(
                "put: error resolving {:?}: {err}",
                req.directory()
            ))
        }
    };

    let mut state = PutState {
        req,
        options,
        idmap,
        target_directory,
        dir_owner,
        default_dir_owner,
        default_dir_mode,
        file_owner,
        directory_modes: HashMap::new(),
        directories_and_times: Vec::new(),
    };

    match fs::symlink_metadata(&state.target_directory) {
        Ok(info) => {
            if !info.is_dir() {
                return error_response(format!(
                    "put: {:?} ({:?}): exists but is not a directory",
                    req.directory(),
                    state.target_directory
                ));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if let Err(err) = state.ensure_directory_under_root(&req.directory().to_path_buf()) {
                return error_response(format!("put: {err}"));
            }
        }
        Err(err) => {
            return error_response(format!("put: {:?}: {err}", req.directory()));
        }
    }

    let callback: PutCallback<'a> = Box::new(move |bulk_reader: &mut dyn Read| {
        // the fixups must run no matter how the stream pass ends
        let mut guard = scopeguard::guard(state, |mut state| state.apply_deferred());
        guard.stream(bulk_reader)
    });

    (Response::new(Payload::Put {}), Some(callback))
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PutState<'_> {
    /// Creates every missing component of `directory` under the root, owned
    /// by the default directory owner, provisionally mode 0700 with the final
    /// mode deferred.
    fn ensure_directory_under_root(&mut self, directory: &Path) -> FerryResult<()> {
        let rel = convert_to_rel_subdirectory(self.req.root(), directory).map_err(|_| {
            FerryError::PathEscapesRoot {
                path: directory.to_path_buf(),
                root: self.req.root().to_path_buf(),
            }
        })?;
        let mut subdir = PathBuf::new();
        for component in rel.components() {
            subdir.push(component);
            let path = self.req.root().join(&subdir);
            match DirBuilder::new().mode(0o700).create(&path) {
                Ok(()) => {
                    if let Some(owner) = self.default_dir_owner {
                        unix::lchown(&path, owner.uid, owner.gid).map_err(|err| {
                            FerryError::Operation(format!(
                                "put: error setting owner of {path:?} to {}:{}: {err}",
                                owner.uid, owner.gid
                            ))
                        })?;
                    }
                    // note to set this directory's permissions later, unless
                    // we already have an explicitly-provided mode for it
                    self.directory_modes
                        .entry(path)
                        .or_insert(self.default_dir_mode);
                }
                Err(err) if already_a_directory(&err) => {}
                Err(err) => {
                    return Err(FerryError::Operation(format!(
                        "put: error checking directory {path:?}: {err}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Remembers a directory's current mode for the final fixup pass, then
    /// loosens it so content can be created inside.
    fn make_directory_writeable(&mut self, directory: &Path) -> FerryResult<()> {
        use std::os::unix::fs::MetadataExt;

        if !self.directory_modes.contains_key(directory) {
            let info = fs::symlink_metadata(directory).map_err(|err| {
                FerryError::Operation(format!(
                    "put: error reading permissions of directory {directory:?}: {err}"
                ))
            })?;
            self.directory_modes
                .insert(directory.to_path_buf(), info.mode() & 0o7777);
        }
        unix::chmod(directory, 0o700).map_err(|err| {
            FerryError::Operation(format!(
                "put: error making directory {directory:?} writable: {err}"
            ))
        })?;
        Ok(())
    }

    /// Creates a regular file exclusively, retrying after removing a
    /// pre-existing entry or loosening an unwritable parent directory.
    fn create_file(&mut self, path: &Path, reader: &mut dyn Read) -> FerryResult<u64> {
        let open = |path: &Path| {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
        };
        let mut attempt = open(path);
        if matches!(&attempt, Err(err) if err.kind() == io::ErrorKind::AlreadyExists) {
            if self.options.no_overwrite_dir_non_dir {
                if let Ok(info) = fs::symlink_metadata(path) {
                    if info.is_dir() {
                        return Err(FerryError::Operation(format!(
                            "put: error creating file at {path:?}: file exists"
                        )));
                    }
                }
            }
            let mut removed = remove_all(path);
            if matches!(&removed, Err(err) if err.kind() == io::ErrorKind::PermissionDenied) {
                if let Some(parent) = path.parent() {
                    self.make_directory_writeable(parent)?;
                }
                removed = remove_all(path);
            }
            removed.map_err(|err| {
                FerryError::Operation(format!(
                    "put: error removing item to be overwritten {path:?}: {err}"
                ))
            })?;
            attempt = open(path);
        }
        if matches!(&attempt, Err(err) if err.kind() == io::ErrorKind::PermissionDenied) {
            if let Some(parent) = path.parent() {
                self.make_directory_writeable(parent)?;
            }
            attempt = open(path);
        }
        let mut file = attempt.map_err(|err| {
            FerryError::Operation(format!(
                "put: error opening file {path:?} for writing: {err}"
            ))
        })?;
        let written = io::copy(reader, &mut file).map_err(|err| {
            FerryError::Operation(format!("put: error writing file {path:?}: {err}"))
        })?;
        Ok(written)
    }

    /// The main streaming pass: one tar entry in, one filesystem change out.
    fn stream(&mut self, bulk_reader: &mut dyn Read) -> FerryResult<()> {
        let mut ignored_items: HashSet<String> = HashSet::new();
        let mut archive = tar::Archive::new(bulk_reader);
        for entry in archive.entries()? {
            let mut entry =
                entry.map_err(|err| FerryError::Operation(format!("reading tar stream: {err}")))?;
            let name_before_renaming = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if name_before_renaming.is_empty() {
                // no name -> ignore the entry
                ignored_items.insert(name_before_renaming);
                continue;
            }
            let mut name = name_before_renaming.clone();
            if !self.options.rename.is_empty() {
                name = handle_rename(&self.options.rename, &name);
            }

            // figure out who should own this new item
            let mut uid = entry.header().uid()? as u32;
            let mut gid = entry.header().gid()? as u32;
            if let Some(idmap) = self.idmap.as_ref() {
                let mapped = idmap.to_host(IdPair { uid, gid }).map_err(|err| {
                    FerryError::Operation(format!(
                        "mapping container filesystem owner {uid}:{gid} to host filesystem owner: {err}"
                    ))
                })?;
                uid = mapped.uid;
                gid = mapped.gid;
            }
            let entry_type = entry.header().entry_type();
            if entry_type == EntryType::Directory {
                if let Some(owner) = self.dir_owner {
                    uid = owner.uid;
                    gid = owner.gid;
                }
            } else if let Some(owner) = self.file_owner {
                uid = owner.uid;
                gid = owner.gid;
            }

            // make sure the parent directory exists, including for global
            // header entries that we otherwise ignore
            let path = self
                .target_directory
                .join(clean_rel(Path::new(&name)));
            if let Some(parent) = path.parent().map(Path::to_path_buf) {
                self.ensure_directory_under_root(&parent)?;
            }

            // figure out what the permissions should be
            let mut full_mode = entry.header().mode()?;
            if self.options.strip_setuid_bit {
                full_mode &= !0o4000;
            }
            if self.options.strip_setgid_bit {
                full_mode &= !0o2000;
            }
            if self.options.strip_sticky_bit {
                full_mode &= !0o1000;
            }
            if entry_type == EntryType::Directory {
                if let Some(mode) = self.options.chmod_dirs {
                    full_mode = mode;
                }
            } else if let Some(mode) = self.options.chmod_files {
                full_mode = mode;
            }
            let perm_mode = full_mode & 0o777;

            let size = entry.size();
            let mtime = UNIX_EPOCH + Duration::from_secs(entry.header().mtime()?);
            let atime = gnu_atime(&entry);
            let xattrs = pax_xattrs(&mut entry)?;
            let raw_link_name = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

            // create the new item
            match entry_type {
                EntryType::Regular => {
                    let written = self.create_file(&path, &mut entry)?;
                    if written != size {
                        return Err(FerryError::Operation(format!(
                            "put: error creating regular file {path:?}: incorrect length ({written} != {size})"
                        )));
                    }
                }
                EntryType::Link => {
                    let raw = raw_link_name.clone().ok_or_else(|| {
                        FerryError::Operation(format!(
                            "put: hard link entry {name:?} has no target"
                        ))
                    })?;
                    if ignored_items.contains(&raw) {
                        // hard link to an ignored item: skip this, too
                        ignored_items.insert(name_before_renaming);
                        continue;
                    }
                    let mut link_name = raw;
                    if !self.options.rename.is_empty() {
                        link_name = handle_rename(&self.options.rename, &link_name);
                    }
                    let link_target = resolve_path(
                        &self.target_directory,
                        &self.req.root().join(clean_rel(Path::new(&link_name))),
                        true,
                        None,
                    )
                    .map_err(|_| {
                        FerryError::Operation(format!(
                            "resolving hardlink target path {link_name:?} under root {:?}",
                            self.req.root()
                        ))
                    })?;
                    self.create_with_collision_handling(&path, || {
                        fs::hard_link(&link_target, &path)
                    })?;
                }
                EntryType::Symlink => {
                    let raw = raw_link_name.clone().ok_or_else(|| {
                        FerryError::Operation(format!("put: symlink entry {name:?} has no target"))
                    })?;
                    self.create_with_collision_handling(&path, || symlink(&raw, &path))?;
                }
                EntryType::Char | EntryType::Block => {
                    if self.options.ignore_devices {
                        ignored_items.insert(name_before_renaming);
                        continue;
                    }
                    let major = entry.header().device_major()?.unwrap_or(0) as u64;
                    let minor = entry.header().device_minor()?.unwrap_or(0) as u64;
                    let char_device = entry_type == EntryType::Char;
                    self.create_with_collision_handling(&path, || {
                        if char_device {
                            unix::mknod_char(&path, 0o600, major, minor)
                        } else {
                            unix::mknod_block(&path, 0o600, major, minor)
                        }
                    })?;
                }
                EntryType::Directory => {
                    self.create_directory(&path)?;
                    // note the directory's times: items created under it will
                    // re-dirty the mtime, so it gets corrected again later
                    let atime = effective_atime(atime, mtime);
                    self.directories_and_times
                        .push((path.clone(), atime, mtime));
                    // set the mode here unconditionally, in case the
                    // directory is in the archive more than once
                    self.directory_modes.insert(path.clone(), perm_mode);
                }
                EntryType::Fifo => {
                    self.create_with_collision_handling(&path, || unix::mkfifo(&path, 0o600))?;
                }
                EntryType::XGlobalHeader => {
                    // PAX uses these for stream-wide key=value data; don't
                    // create whatever path was used for the header
                    continue;
                }
                other => {
                    return Err(FerryError::Operation(format!(
                        "unrecognized tar entry type {other:?} for {name:?}"
                    )));
                }
            }

            // set ownership
            unix::lchown(&path, uid, gid).map_err(|err| {
                FerryError::Operation(format!(
                    "put: error setting ownership of {path:?} to {uid}:{gid}: {err}"
                ))
            })?;
            // set permissions, except for symlinks, since there is no lchmod,
            // and directories, which get fixed up on the way out so that
            // read-only directories can still receive content first
            let is_symlink = entry_type == EntryType::Symlink;
            let is_dir = entry_type == EntryType::Directory;
            if !is_symlink && !is_dir {
                unix::chmod(&path, perm_mode).map_err(|err| {
                    FerryError::Operation(format!(
                        "put: error setting permissions on {path:?} to 0{perm_mode:o}: {err}"
                    ))
                })?;
            }
            // set bits that a chown may have cleared
            if !is_symlink {
                let mut mode = perm_mode;
                if full_mode & 0o4000 != 0 {
                    mode |= 0o4000;
                }
                if full_mode & 0o2000 != 0 {
                    mode |= 0o2000;
                }
                if full_mode & 0o1000 != 0 {
                    mode |= 0o1000;
                }
                if is_dir {
                    // the final fixup needs to reapply these bits too
                    self.directory_modes.insert(path.clone(), mode);
                }
                unix::chmod(&path, mode).map_err(|err| {
                    FerryError::Operation(format!(
                        "put: setting additional permissions on {path:?} to 0{mode:o}: {err}"
                    ))
                })?;
            }
            // set xattrs, including any that a chown may have reset
            if !self.options.strip_xattrs && !xattrs.is_empty() {
                if let Err(err) = lset_xattrs(&path, &xattrs) {
                    if !self.options.ignore_xattr_errors {
                        return Err(FerryError::Operation(format!(
                            "put: error setting extended attributes on {path:?}: {err}"
                        )));
                    }
                }
            }
            // set times
            let atime = effective_atime(atime, mtime);
            unix::lutimes(is_symlink, &path, atime, mtime).map_err(|err| {
                FerryError::Operation(format!(
                    "setting access and modify timestamps on {path:?}: {err}"
                ))
            })?;
        }
        Ok(())
    }

    /// Creates a directory, tolerating an existing directory at the same
    /// place and replacing a non-directory unless the options forbid it.
    fn create_directory(&mut self, path: &Path) -> FerryResult<()> {
        let mkdir = || DirBuilder::new().mode(0o700).create(path);
        match mkdir() {
            Ok(()) => Ok(()),
            Err(err) if already_a_directory(&err) => match fs::symlink_metadata(path) {
                Ok(info) if !info.is_dir() => {
                    if self.options.no_overwrite_non_dir_dir {
                        return Err(FerryError::Operation(format!(
                            "put: error creating {path:?}: {err}"
                        )));
                    }
                    fs::remove_file(path).and_then(|_| mkdir()).map_err(|err| {
                        FerryError::Operation(format!("put: error creating {path:?}: {err}"))
                    })
                }
                // already a directory: just add the new stuff under it
                Ok(_) => Ok(()),
                Err(stat_err) => Err(FerryError::Operation(format!(
                    "put: error creating {path:?}: {stat_err}"
                ))),
            },
            Err(err) => Err(FerryError::Operation(format!(
                "put: error creating {path:?}: {err}"
            ))),
        }
    }

    /// Runs a creation syscall, and on an already-exists collision removes
    /// the old entry and retries, unless the no-overwrite policy forbids
    /// replacing a directory.
    fn create_with_collision_handling(
        &mut self,
        path: &Path,
        create: impl Fn() -> io::Result<()>,
    ) -> FerryResult<()> {
        match create() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if self.options.no_overwrite_dir_non_dir {
                    if let Ok(info) = fs::symlink_metadata(path) {
                        if info.is_dir() {
                            return Err(FerryError::Operation(format!(
                                "put: error creating {path:?}: {err}"
                            )));
                        }
                    }
                }
                remove_all(path)
                    .and_then(|_| create())
                    .map_err(|err| {
                        FerryError::Operation(format!("put: error creating {path:?}: {err}"))
                    })
            }
            Err(err) => Err(FerryError::Operation(format!(
                "put: error creating {path:?}: {err}"
            ))),
        }
    }

    /// The guaranteed exit pass: restore directory timestamps in reverse
    /// creation order, then final directory modes. Failures here are logged,
    /// not fatal, matching best-effort semantics for a tree we just built.
    fn apply_deferred(&mut self) {
        for (directory, atime, mtime) in self.directories_and_times.iter().rev() {
            if let Err(err) = unix::lutimes(false, directory, *atime, *mtime) {
                tracing::debug!(
                    "error setting access and modify timestamps on {directory:?}: {err}"
                );
            }
        }
        for (directory, mode) in &self.directory_modes {
            if let Err(err) = unix::chmod(directory, *mode) {
                tracing::debug!("error setting permissions of {directory:?} to 0{mode:o}: {err}");
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

/// Removes a file, symlink, or directory tree; a missing path is fine.
fn remove_all(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(info) if info.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn already_a_directory(err: &io::Error) -> bool {
    // mkdir("/") can come back as EISDIR rather than EEXIST
    err.kind() == io::ErrorKind::AlreadyExists || err.raw_os_error() == Some(libc::EISDIR)
}

fn gnu_atime<R: Read>(entry: &tar::Entry<'_, R>) -> Option<SystemTime> {
    let atime = entry.header().as_gnu().and_then(|gnu| gnu.atime().ok())?;
    if atime == 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(atime))
}

/// An access time of zero, or one before the modification time, defaults to
/// the modification time.
fn effective_atime(atime: Option<SystemTime>, mtime: SystemTime) -> SystemTime {
    match atime {
        Some(atime) if atime >= mtime => atime,
        _ => mtime,
    }
}

fn pax_xattrs<R: Read>(entry: &mut tar::Entry<'_, R>) -> FerryResult<BTreeMap<String, Vec<u8>>> {
    let mut xattrs = BTreeMap::new();
    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            let Ok(key) = extension.key() else {
                continue;
            };
            if let Some(attr) = key.strip_prefix(XATTR_PAX_PREFIX) {
                xattrs.insert(attr.to_string(), extension.value_bytes().to_vec());
            }
        }
    }
    Ok(xattrs)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::ops::{self, request::Operation, BulkCallback, Request};

    use super::*;

    fn run_put(root: &Path, directory: &Path, options: PutOptions, archive: &[u8]) -> FerryResult<()> {
        let resolved = Request {
            root: root.to_path_buf(),
            directory: directory.to_path_buf(),
            globs: Vec::new(),
            op: Operation::Put(options),
        }
        .normalize(false)?;
        let (response, callback) = ops::handle(&resolved)?;
        assert!(response.error.is_none(), "{:?}", response.error);
        let Some(BulkCallback::Put(callback)) = callback else {
            panic!("put returned no bulk callback");
        };
        let mut reader: &[u8] = archive;
        callback(&mut reader)
    }

    fn file_entry(name: &str, mode: u32, mtime: u64, body: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(mode);
        header.set_mtime(mtime);
        stamp_owner(&mut header);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body.as_bytes())
            .unwrap();
        builder.into_inner().unwrap()
    }

    // hand-built headers carry the current user so ownership application
    // works without privilege
    fn stamp_owner(header: &mut tar::Header) {
        header.set_uid(u64::from(nix::unistd::getuid().as_raw()));
        header.set_gid(u64::from(nix::unistd::getgid().as_raw()));
    }

    #[test]
    fn test_put_strips_requested_mode_bits() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let root = temp.path();
        let archive = file_entry("tool", 0o4755, 1_600_000_000, "#!/bin/sh\n");

        run_put(
            root,
            root,
            PutOptions::builder().strip_setuid_bit(true).build(),
            &archive,
        )?;
        let mode = fs::metadata(root.join("tool"))?.permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);
        Ok(())
    }

    #[test]
    fn test_put_restores_file_timestamps() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();
        let archive = file_entry("stamped.txt", 0o644, 1_600_000_000, "old");

        run_put(root, root, PutOptions::builder().build(), &archive)?;
        let mtime = fs::metadata(root.join("stamped.txt"))?.modified()?;
        assert_eq!(mtime, UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        Ok(())
    }

    #[test]
    fn test_put_chmod_files_overrides_entry_mode() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let root = temp.path();
        let archive = file_entry("conf.txt", 0o600, 1_600_000_000, "secret");

        run_put(
            root,
            root,
            PutOptions::builder().chmod_files(0o444).build(),
            &archive,
        )?;
        let mode = fs::metadata(root.join("conf.txt"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o444);
        Ok(())
    }

    #[test]
    fn test_put_ignores_global_pax_header_entries() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = temp.path();

        let mut builder = tar::Builder::new(Vec::new());
        let mut global = tar::Header::new_gnu();
        global.set_entry_type(tar::EntryType::XGlobalHeader);
        global.set_path("pax_global_header")?;
        global.set_size(0);
        global.set_cksum();
        builder.append(&global, std::io::empty())?;
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        stamp_owner(&mut header);
        header.set_cksum();
        builder.append_data(&mut header, "real.txt", "data".as_bytes())?;
        let archive = builder.into_inner()?;

        run_put(root, root, PutOptions::builder().build(), &archive)?;
        assert!(!root.join("pax_global_header").exists());
        assert_eq!(fs::read_to_string(root.join("real.txt"))?, "data");
        Ok(())
    }
}
