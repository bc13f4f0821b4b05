//! The parent side of subprocess execution: re-exec the current binary as a
//! chrooted copier child and multiplex one control channel plus two bulk byte
//! streams across four pipe pairs.
//!
//! The protocol is strict: encode one request, decode exactly one response,
//! encode a quit, and only then pump the two bulk directions concurrently so
//! a large Put body and a large Get body can't deadlock against pipe buffer
//! limits.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    os::unix::{io::AsRawFd, process::CommandExt},
    process::{Command, Stdio},
    thread,
};

use crate::{
    ops::{Operation, Request, Response},
    FerryError, FerryResult,
};

use super::reexec::REEXEC_NAME;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The child-side file descriptor carrying bulk bytes toward the child.
const BULK_IN_FD: i32 = 3;

/// The child-side file descriptor carrying bulk bytes toward the parent.
const BULK_OUT_FD: i32 = 4;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn run(
    req: Request,
    bulk_reader: Option<&mut (dyn Read + Send)>,
    bulk_writer: Option<&mut (dyn Write + Send)>,
) -> FerryResult<Response> {
    let mut default_reader = io::empty();
    let mut default_writer = io::sink();
    let bulk_reader: &mut (dyn Read + Send) = match bulk_reader {
        Some(reader) => reader,
        None => &mut default_reader,
    };
    let bulk_writer: &mut (dyn Write + Send) = match bulk_writer {
        Some(writer) => writer,
        None => &mut default_writer,
    };

    let (stdin_read, stdin_write) = os_pipe::pipe()?;
    let (stdout_read, stdout_write) = os_pipe::pipe()?;
    let (bulk_in_read, bulk_in_write) = os_pipe::pipe()?;
    let (bulk_out_read, bulk_out_write) = os_pipe::pipe()?;

    let exe = std::env::current_exe()?;
    let mut command = Command::new(&exe);
    command
        .arg0(REEXEC_NAME)
        .current_dir("/")
        .stdin(Stdio::from(stdin_read))
        .stdout(Stdio::from(stdout_write))
        .stderr(Stdio::piped());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        command.env("RUST_LOG", filter);
    }
    let bulk_in_fd = bulk_in_read.as_raw_fd();
    let bulk_out_fd = bulk_out_write.as_raw_fd();
    // SAFETY: only async-signal-safe calls (fcntl/dup2) run between fork and exec.
    unsafe {
        command.pre_exec(move || {
            for (src, dst) in [(bulk_in_fd, BULK_IN_FD), (bulk_out_fd, BULK_OUT_FD)] {
                if src == dst {
                    let flags = libc::fcntl(dst, libc::F_GETFD);
                    if flags < 0 || libc::fcntl(dst, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(src, dst) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = command
        .spawn()
        .map_err(|err| FerryError::Subprocess(format!("starting subprocess: {err}")))?;
    // the child owns its copies now
    drop(bulk_in_read);
    drop(bulk_out_write);
    let mut child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| FerryError::Protocol("subprocess stderr was not captured".into()))?;

    let (outcome, diagnostics) = thread::scope(|scope| {
        // drain stderr continuously so the child can't block on it
        let stderr_thread = scope.spawn(move || {
            let mut buffer = String::new();
            let _ = child_stderr.read_to_string(&mut buffer);
            buffer
        });

        let mut outcome = converse(&stdin_write, &stdout_read, &req);
        // the control channel is done with; close it so the child's request
        // loop sees EOF even if something went wrong above
        drop(stdin_write);
        drop(stdout_read);

        if outcome.is_ok() {
            // pump both bulk directions concurrently, then let the child exit
            let to_child = scope.spawn(move || -> io::Result<()> {
                let mut bulk_in_write = bulk_in_write;
                io::copy(bulk_reader, &mut bulk_in_write)?;
                Ok(())
            });
            let from_child = scope.spawn(move || -> io::Result<()> {
                let mut bulk_out_read = bulk_out_read;
                io::copy(&mut bulk_out_read, bulk_writer)?;
                Ok(())
            });
            let read_result = to_child
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("bulk input thread panicked")));
            let write_result = from_child
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("bulk output thread panicked")));
            if let Err(err) = read_result {
                outcome = Err(FerryError::Subprocess(format!(
                    "passing bulk input to subprocess: {err}"
                )));
            }
            if let Err(err) = write_result {
                outcome = Err(FerryError::Subprocess(format!(
                    "passing bulk output from subprocess: {err}"
                )));
            }
        }

        if outcome.is_err() {
            let _ = child.kill();
        }
        let status = child.wait();
        let diagnostics = stderr_thread.join().unwrap_or_default();

        if outcome.is_ok() {
            match status {
                Ok(status) if !status.success() => {
                    let text = diagnostics.trim();
                    let message = if text.is_empty() {
                        "subprocess exited with error".to_string()
                    } else {
                        text.to_string()
                    };
                    outcome = Err(FerryError::Subprocess(message));
                }
                Ok(_) => {}
                Err(err) => {
                    outcome = Err(FerryError::Subprocess(format!(
                        "waiting on subprocess: {err}"
                    )));
                }
            }
        }
        (outcome, diagnostics)
    });

    match outcome {
        Ok(response) => {
            let logged = diagnostics.trim();
            if !logged.is_empty() {
                for line in logged.lines() {
                    tracing::debug!("copier subprocess: {line}");
                }
            }
            Ok(response)
        }
        Err(err) => {
            let text = diagnostics.trim();
            if text.is_empty() || matches!(err, FerryError::Subprocess(ref m) if m.contains(text)) {
                Err(err)
            } else {
                Err(FerryError::Subprocess(format!("{text}: {err}")))
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: private
//--------------------------------------------------------------------------------------------------

/// One round of the control protocol: request out, response in, quit out.
fn converse(
    stdin_write: &os_pipe::PipeWriter,
    stdout_read: &os_pipe::PipeReader,
    req: &Request,
) -> FerryResult<Response> {
    let mut control_out = stdin_write;
    encode(&mut control_out, req)?;
    let mut control_in = BufReader::new(stdout_read);
    let response: Response = decode(&mut control_in)?;
    encode(
        &mut control_out,
        &Request {
            root: Default::default(),
            directory: Default::default(),
            globs: Vec::new(),
            op: Operation::Quit,
        },
    )?;
    Ok(response)
}

fn encode(writer: &mut impl Write, req: &Request) -> FerryResult<()> {
    serde_json::to_writer(&mut *writer, req)
        .map_err(|err| FerryError::Protocol(format!("encoding request: {err}")))?;
    writer
        .write_all(b"\n")
        .map_err(|err| FerryError::Protocol(format!("encoding request: {err}")))?;
    writer
        .flush()
        .map_err(|err| FerryError::Protocol(format!("encoding request: {err}")))?;
    Ok(())
}

fn decode(reader: &mut impl BufRead) -> FerryResult<Response> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|err| FerryError::Protocol(format!("decoding response: {err}")))?;
    if n == 0 {
        return Err(FerryError::Protocol(
            "decoding response: unexpected end of stream".into(),
        ));
    }
    serde_json::from_str(&line)
        .map_err(|err| FerryError::Protocol(format!("decoding response: {err}")))
}
