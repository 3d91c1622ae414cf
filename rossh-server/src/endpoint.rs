// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The connection endpoint: the short-lived process a secure-shell channel
//! actually executes. Ensures the session daemon exists, pre-empts whatever
//! endpoint came before it, then bridges its own stdio to the daemon's
//! fifos until the shell exits or it is itself pre-empted.

use std::{
    cell::Cell,
    ffi::CString,
    os::{fd::RawFd, unix::ffi::OsStrExt},
    path::Path,
    rc::Rc,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use librossh::{
    protocol::{self, opcode},
    registry::{self, SessionPaths},
    relay::{relay, EofAction, RelaySide},
    tty,
};
use nix::{
    fcntl::{open, OFlag},
    sys::{
        signal::{self, SigHandler, Signal},
        stat::Mode,
    },
    unistd::{write, Pid},
};
use tracing::{error, info, instrument};

use crate::daemon;

pub struct Args {
    pub client_version: u32,
    pub term_id: String,
    pub kill_ids: Vec<String>,
}

/// The connection-pid path this handler should unlink, stashed here because
/// a signal handler can't capture an environment. Set once, right after
/// `register()` claims `connection.pid`.
static CONN_PID_PATH: OnceLock<CString> = OnceLock::new();

/// We were reaped as an orphan: unlink our own pid file (nobody else will)
/// and go.
extern "C" fn handle_hangup(_: libc::c_int) {
    if let Some(path) = CONN_PID_PATH.get() {
        unsafe {
            libc::unlink(path.as_ptr());
        }
    }
    unsafe {
        libc::_exit(1);
    }
}

/// A newer endpoint is taking our slot. It is about to overwrite
/// `connection.pid` with its own pid, so unlike the hangup handler we must
/// *not* unlink it here -- just get out of the way.
extern "C" fn handle_superseded(_: libc::c_int) {
    unsafe {
        libc::_exit(1);
    }
}

enum StopCause {
    ShellExited,
    UnexpectedStdinEof,
}

#[instrument(skip(args), fields(term_id = %args.term_id))]
pub fn run(args: Args) -> Result<i32> {
    if protocol::VERSION_INDEX < args.client_version {
        emit(opcode::SERVER_UPDATE, b"")?;
        return Ok(1);
    }
    if protocol::VERSION_INDEX > args.client_version {
        emit(opcode::CLIENT_TOO_OLD, b"")?;
        return Ok(1);
    }

    for id in &args.kill_ids {
        reap(id)?;
    }

    let paths = SessionPaths::new(&args.term_id);
    if registry::create_if_not_exists(&paths).context("ensuring session directory")? {
        info!("first endpoint for this terminal id, spawning session daemon");
        daemon::spawn(&paths, &args.term_id).context("spawning session daemon")?;
    }

    if let Ok(sock) = std::env::var("SSH_AUTH_SOCK") {
        registry::relink_auth_sock(&paths, Path::new(&sock)).context("linking forwarded auth socket")?;
    }

    if let Some(prior) = registry::read_pid_file(&paths.connection_pid())? {
        if registry::process_alive(prior) {
            info!(pid = %prior, "pre-empting prior connection endpoint");
            registry::signal_if_alive(prior, Signal::SIGINT).context("pre-empting prior endpoint")?;
        }
    }

    registry::write_pid_file(&paths.connection_pid(), Pid::this())
        .context("registering connection pid")?;
    let _ = CONN_PID_PATH.set(
        CString::new(paths.connection_pid().as_os_str().as_bytes()).context("encoding connection.pid path")?,
    );
    // Safety: both handlers only unlink a fixed path and `_exit`, both of
    // which are async-signal-safe.
    unsafe {
        signal::signal(Signal::SIGHUP, SigHandler::Handler(handle_hangup)).context("installing SIGHUP handler")?;
        signal::signal(Signal::SIGINT, SigHandler::Handler(handle_superseded))
            .context("installing SIGINT handler")?;
    }

    let input_write_fd =
        open(&paths.input_fifo(), OFlag::O_WRONLY, Mode::empty()).context("opening input fifo for write")?;
    let output_read_fd =
        open(&paths.output_fifo(), OFlag::O_RDONLY, Mode::empty()).context("opening output fifo for read")?;

    emit(opcode::CONN_S, b"")?;

    let cause: Rc<Cell<Option<StopCause>>> = Rc::new(Cell::new(None));

    let _raw_guard = tty::set_attach_flags().context("entering raw mode")?;
    let _resize_guard = tty::ResizeForwarder::install(0, tty::ResizeMode::Frame(input_write_fd))
        .context("installing resize forwarder")?;

    let relay_result = relay(
        StdioSide { write_fd: input_write_fd, cause: Rc::clone(&cause) },
        DaemonOutputSide { read_fd: output_read_fd, cause: Rc::clone(&cause) },
        || Ok(false),
    );

    if let Err(e) = &relay_result {
        error!("endpoint relay loop ended with error: {:?}", e);
    }

    match cause.take() {
        Some(StopCause::ShellExited) => {
            registry::remove(&paths).context("removing session directory on graceful end")?;
            emit(opcode::CONN_E, b"")?;
            Ok(0)
        }
        Some(StopCause::UnexpectedStdinEof) => {
            error!("standard input closed unexpectedly, link appears lost");
            Ok(1)
        }
        None => {
            relay_result?;
            Ok(1)
        }
    }
}

fn reap(term_id: &str) -> Result<()> {
    let paths = SessionPaths::new(term_id);
    if !paths.exists() {
        return Ok(());
    }

    if let Some(conn_pid) = registry::read_pid_file(&paths.connection_pid())? {
        registry::signal_if_alive(conn_pid, Signal::SIGHUP).context("hanging up orphaned endpoint")?;
    }
    if let Some(daemon_pid) = registry::read_pid_file(&paths.session_pid())? {
        registry::signal_if_alive(daemon_pid, Signal::SIGTERM).context("terminating orphaned daemon")?;
    }
    registry::remove(&paths).context("removing orphaned session directory")?;

    let mut op = opcode::KILLED_PREFIX.to_vec();
    op.extend_from_slice(term_id.as_bytes());
    emit(&op, b"")
}

fn emit(op: &[u8], payload: &[u8]) -> Result<()> {
    write_all_fd(1, &protocol::encode(op, payload))
}

fn write_all_fd(fd: RawFd, mut data: &[u8]) -> Result<()> {
    let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    while !data.is_empty() {
        let n = write(bfd, data).context("writing control frame to stdout")?;
        data = &data[n..];
    }
    Ok(())
}

/// The client's tty, read as fd 0 / written as fd 1.
struct StdioSide {
    write_fd: RawFd,
    cause: Rc<Cell<Option<StopCause>>>,
}

impl RelaySide for StdioSide {
    fn read_fd(&self) -> RawFd {
        0
    }

    fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    fn on_eof(&mut self) -> Result<EofAction> {
        self.cause.set(Some(StopCause::UnexpectedStdinEof));
        Ok(EofAction::Stop)
    }
}

/// The daemon's output fifo, written back out to our own stdout (fd 1).
struct DaemonOutputSide {
    read_fd: RawFd,
    cause: Rc<Cell<Option<StopCause>>>,
}

impl RelaySide for DaemonOutputSide {
    fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    fn write_fd(&self) -> RawFd {
        1
    }

    fn on_eof(&mut self) -> Result<EofAction> {
        self.cause.set(Some(StopCause::ShellExited));
        Ok(EofAction::Stop)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read as _, os::unix::{io::AsRawFd, net::UnixStream}};

    use super::*;

    #[test]
    fn write_all_fd_writes_the_whole_buffer_across_short_writes() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let payload = vec![7u8; 256 * 1024];
        let to_write = payload.clone();

        let writer = std::thread::spawn(move || {
            write_all_fd(b.as_raw_fd(), &to_write).unwrap();
        });

        let mut got = Vec::new();
        a.read_to_end(&mut got).unwrap();
        writer.join().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn killed_opcode_carries_the_term_id_as_a_dynamic_suffix() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let writer = std::thread::spawn(move || {
            let mut op = opcode::KILLED_PREFIX.to_vec();
            op.extend_from_slice(b"abc123");
            write_all_fd(b.as_raw_fd(), &protocol::encode(&op, b"")).unwrap();
        });

        let mut buf = Vec::new();
        a.read_to_end(&mut buf).unwrap();
        writer.join().unwrap();

        let mut scanner = protocol::FrameScanner::new(opcode::KILLED_PREFIX);
        let (_passthrough, frames) = scanner.feed(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode_suffix, b"abc123");
    }
}
