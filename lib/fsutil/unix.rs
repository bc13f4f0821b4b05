//! Thin wrappers over the Unix syscalls the copier needs that `std::fs` does
//! not expose: symlink-aware chown and utimes, device and FIFO nodes.

use std::{
    ffi::CString,
    fs::{self, Metadata, Permissions},
    io,
    os::unix::{ffi::OsStrExt, fs::MetadataExt, fs::PermissionsExt},
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use nix::sys::stat::{makedev, mknod, Mode, SFlag};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The uid and gid of a filesystem entry.
pub fn owner(meta: &Metadata) -> (u32, u32) {
    (meta.uid(), meta.gid())
}

/// Whether two entries live on the same device.
pub fn same_device(a: &Metadata, b: &Metadata) -> bool {
    a.dev() == b.dev()
}

/// Changes ownership of `path` without following a final symlink.
pub fn lchown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    let cpath = cstring(path)?;
    // SAFETY: cpath is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::lchown(cpath.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Changes ownership of `path`, following symlinks.
pub fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(uid)),
        Some(nix::unistd::Gid::from_raw(gid)),
    )
    .map_err(io::Error::from)
}

/// Sets permission bits on `path`. `mode` may include setuid/setgid/sticky.
pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode))
}

/// Sets access and modification times on `path`. When `no_follow` is set a
/// final symlink has its own timestamps updated instead of its target's.
pub fn lutimes(no_follow: bool, path: &Path, atime: SystemTime, mtime: SystemTime) -> io::Result<()> {
    let cpath = cstring(path)?;
    let times = [timespec(atime), timespec(mtime)];
    let flags = if no_follow {
        libc::AT_SYMLINK_NOFOLLOW
    } else {
        0
    };
    // SAFETY: cpath and times outlive the call; AT_FDCWD makes path cwd-relative.
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), flags) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a FIFO at `path`.
pub fn mkfifo(path: &Path, mode: u32) -> io::Result<()> {
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)).map_err(io::Error::from)
}

/// Creates a character device node at `path`.
pub fn mknod_char(path: &Path, mode: u32, major: u64, minor: u64) -> io::Result<()> {
    mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    )
    .map_err(io::Error::from)
}

/// Creates a block device node at `path`.
pub fn mknod_block(path: &Path, mode: u32, major: u64, minor: u64) -> io::Result<()> {
    mknod(
        path,
        SFlag::S_IFBLK,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    )
    .map_err(io::Error::from)
}

fn cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

fn timespec(when: SystemTime) -> libc::timespec {
    let since_epoch = when
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    libc::timespec {
        tv_sec: since_epoch.as_secs() as libc::time_t,
        tv_nsec: since_epoch.subsec_nanos() as libc::c_long,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unix_lutimes_sets_mtime() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("stamped.txt");
        fs::write(&file, "contents")?;

        let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        lutimes(false, &file, when, when)?;

        let meta = fs::metadata(&file)?;
        assert_eq!(meta.modified()?, when);
        Ok(())
    }

    #[test]
    fn test_unix_lutimes_no_follow_leaves_target_alone() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("target.txt");
        fs::write(&target, "contents")?;
        let target_mtime = fs::metadata(&target)?.modified()?;

        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        let when = UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        lutimes(true, &link, when, when)?;

        assert_eq!(fs::metadata(&target)?.modified()?, target_mtime);
        assert_eq!(fs::symlink_metadata(&link)?.modified()?, when);
        Ok(())
    }

    #[test]
    fn test_unix_mkfifo_creates_a_fifo() -> anyhow::Result<()> {
        use std::os::unix::fs::FileTypeExt;

        let temp = tempfile::tempdir()?;
        let fifo = temp.path().join("queue.fifo");
        mkfifo(&fifo, 0o644)?;
        assert!(fs::metadata(&fifo)?.file_type().is_fifo());
        Ok(())
    }
}
