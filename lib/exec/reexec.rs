//! The child side of subprocess execution. The parent re-executes the
//! current binary with argv[0] set to a recognizable name; an embedding
//! application calls [`child_init`] first thing in `main` so the re-executed
//! copy takes over before any of the application's own logic runs.

use std::{
    ffi::OsStr,
    fs::File,
    io::{self, BufRead, BufReader, Write},
    os::unix::io::FromRawFd,
    path::{Path, PathBuf},
    process,
};

use crate::{
    ops::{self, Operation, Request},
    FerryError, FerryResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The argv[0] under which the copier child recognizes itself.
pub const REEXEC_NAME: &str = "ferry-copier";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Takes over the process if it was re-executed as a copier child.
///
/// Returns `false` when this is an ordinary invocation. When the process was
/// re-executed by [`crate::Copier`], this serves requests from stdin until a
/// quit arrives and then exits; it does not return.
pub fn child_init() -> bool {
    let is_child = std::env::args_os()
        .next()
        .map(|arg0| Path::new(&arg0).file_name() == Some(OsStr::new(REEXEC_NAME)))
        .unwrap_or(false);
    if !is_child {
        return false;
    }
    // log to stderr; the parent buffers it and attaches it to any failure
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
    match serve() {
        Ok(()) => process::exit(0),
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

/// The child's request loop: chroot once, then serve until quit.
fn serve() -> FerryResult<()> {
    let stdin = io::stdin();
    let mut requests = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    // SAFETY: the parent installed the bulk endpoints as fds 3 and 4 before exec.
    let mut bulk_reader = unsafe { File::from_raw_fd(3) };
    let mut bulk_writer = unsafe { File::from_raw_fd(4) };

    let mut previous_root: Option<PathBuf> = None;
    let mut chrooted = false;
    loop {
        let mut line = String::new();
        let n = requests
            .read_line(&mut line)
            .map_err(|err| FerryError::Protocol(format!("decoding request: {err}")))?;
        if n == 0 {
            return Err(FerryError::Protocol(
                "decoding request: unexpected end of stream".into(),
            ));
        }
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = serde_json::from_str(&line)
            .map_err(|err| FerryError::Protocol(format!("decoding request: {err}")))?;
        if matches!(req.op, Operation::Quit) {
            break;
        }

        // every request served by one child must name the same root, because
        // there is no un-chrooting to chroot somewhere else
        match &previous_root {
            Some(previous) => {
                if *previous != req.root {
                    return Err(FerryError::ChrootRootMismatch {
                        previous: previous.clone(),
                        requested: req.root.clone(),
                    });
                }
            }
            None => {
                let root = if req.root.as_os_str().is_empty() {
                    PathBuf::from("/")
                } else {
                    req.root.clone()
                };
                chrooted = enter_chroot(&root)?;
                previous_root = Some(req.root.clone());
            }
        }

        let resolved = req.normalize(chrooted)?;
        let (response, callback) = ops::handle(&resolved)?;
        {
            let mut out = stdout.lock();
            serde_json::to_writer(&mut out, &response)
                .map_err(|err| FerryError::Protocol(format!("encoding response: {err}")))?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
        if let Some(callback) = callback {
            ops::run_bulk(callback, &mut bulk_reader, &mut bulk_writer)?;
        }
    }
    Ok(())
}

fn enter_chroot(root: &Path) -> FerryResult<bool> {
    nix::unistd::chroot(root)
        .map_err(|err| FerryError::Subprocess(format!("chroot to {root:?}: {err}")))?;
    std::env::set_current_dir("/")?;
    Ok(true)
}
