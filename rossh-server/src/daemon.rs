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

//! The session daemon: owns a login shell behind a pseudo-terminal for the
//! lifetime of a terminal id, surviving endpoint churn.
//!
//! `spawn` forks in place (rather than exec-ing a second copy of this
//! binary) so the calling endpoint process can keep going immediately as the
//! first connection to the session it just created. The forked child never
//! returns to the caller; it runs the relay loop until the shell exits or it
//! is torn down by an external kill, then calls `process::exit` itself.

use std::{
    os::{fd::RawFd, unix::process::CommandExt},
    path::Path,
    process::{self, Command},
    sync::{atomic::Ordering, Arc},
};

use anyhow::{Context, Result};
use librossh::{
    protocol,
    registry::{self, SessionPaths},
    relay::{relay, EofAction, RelaySide},
    tty, user,
};
use nix::{
    fcntl::{open, OFlag},
    sys::{
        signal::{self, SigHandler, Signal},
        stat::Mode,
    },
    unistd::{fork, setsid, ForkResult, Pid},
};
use tracing::{error, info, instrument, warn};

/// Become the session daemon for `term_id`, forking in place. Returns in the
/// parent as soon as the child has forked; the child never returns.
#[instrument(skip(paths), fields(term_id))]
pub fn spawn(paths: &SessionPaths, term_id: &str) -> Result<()> {
    // Safety: we immediately either return (parent) or call into daemon code
    // that only touches this process's own state before execing the shell
    // (child), neither of which races with the other copy of the address
    // space.
    match unsafe { fork() }.context("forking session daemon")? {
        ForkResult::Parent { .. } => Ok(()),
        ForkResult::Child => {
            if let Err(e) = run(paths, term_id) {
                error!("session daemon exiting on error: {:?}", e);
            }
            process::exit(0);
        }
    }
}

fn run(paths: &SessionPaths, term_id: &str) -> Result<()> {
    // Detach from the ssh channel's controlling terminal and session: a
    // hangup delivered to that channel (the endpoint dying, the ssh link
    // dropping) must not touch us.
    setsid().context("starting new session")?;
    unsafe {
        signal::signal(Signal::SIGHUP, SigHandler::SigIgn).context("ignoring SIGHUP")?;
        signal::signal(Signal::SIGINT, SigHandler::SigIgn).context("ignoring SIGINT")?;
    }

    let term = Arc::new(std::sync::atomic::AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))
        .context("registering SIGTERM flag")?;

    if paths.auth_sock().exists() {
        // SAFETY: single-threaded at this point in the forked child.
        unsafe {
            std::env::set_var("SSH_AUTH_SOCK", paths.auth_sock());
        }
    }

    let info = user::info().context("resolving user info")?;
    let shell = std::env::var("SHELL").unwrap_or(info.default_shell.clone());
    info!(shell = %shell, "spawning login shell");

    // Spawn as a login shell by setting arg0 to the shell's basename prefixed
    // with "-", same trick sshd's session.c uses.
    let shell_basename =
        Path::new(&shell).file_name().and_then(|n| n.to_str()).unwrap_or(shell.as_str());
    let mut cmd = Command::new(&shell);
    cmd.arg0(format!("-{shell_basename}"));
    cmd.env_clear();
    cmd.env("HOME", &info.home_dir);
    cmd.env("USER", &info.user);
    cmd.env("SHELL", &shell);
    cmd.env("TERM", std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string()));

    let mut fork = shpool_pty::fork::Fork::from_ptmx().context("forking login shell pty")?;
    if let Ok(_slave) = fork.is_child() {
        for fd in librossh::consts::STDERR_FD + 1..(nix::unistd::SysconfVar::OPEN_MAX as i32) {
            let _ = nix::unistd::close(fd);
        }
        let err = cmd.exec();
        eprintln!("shell exec failed: {:?}", err);
        process::exit(1);
    }

    let master = fork.is_parent().context("getting pty master handle")?;
    let master_fd = master.raw_fd().ok_or_else(|| anyhow::anyhow!("no fd for pty master"))?;
    let child_pid = fork.child_pid().ok_or_else(|| anyhow::anyhow!("no child pid for shell"))?;

    registry::write_pid_file(&paths.session_pid(), Pid::this())
        .context("writing session pid file")?;

    // Both sides of this rendezvous must open `input` before `output`: the
    // endpoint opens its end of `input` (write) before `output` (read), so
    // opening them in the same order here is what lets the two blocking
    // opens pair up instead of each waiting on the other's second open.
    let input_fd = open_for_read(&paths.input_fifo())?;
    let output_fd = open_for_write(&paths.output_fifo())?;

    let relay_result = relay(
        MasterSide { fd: master_fd },
        PipeSide { read_fd: input_fd, write_fd: output_fd, path: paths.input_fifo(), master_fd, scanner: None },
        || {
            if term.load(Ordering::SeqCst) {
                info!("daemon received terminate signal, tearing down");
                let _ = signal::kill(Pid::from_raw(child_pid), Signal::SIGHUP);
                return Ok(true);
            }
            Ok(false)
        },
    );

    if let Err(e) = &relay_result {
        warn!("daemon relay loop ended with error: {:?}", e);
    }

    let _ = signal::kill(Pid::from_raw(child_pid), Signal::SIGHUP);
    let mut status = 0;
    unsafe {
        libc::waitpid(child_pid, &mut status, 0);
    }

    registry::remove(paths).context("removing session directory on shutdown")?;
    info!(term_id, "session daemon exiting");

    relay_result
}

fn open_for_write(path: &Path) -> Result<RawFd> {
    open(path, OFlag::O_WRONLY, Mode::empty())
        .with_context(|| format!("opening {:?} for write", path))
}

fn open_for_read(path: &Path) -> Result<RawFd> {
    open(path, OFlag::O_RDONLY, Mode::empty()).with_context(|| format!("opening {:?} for read", path))
}

/// The pty master. A single fd does double duty: shell output is read from
/// it, and (non-`WS`) input from the pipe side is written back to it. Master
/// EOF (shell exited) ends the daemon.
struct MasterSide {
    fd: RawFd,
}

impl RelaySide for MasterSide {
    fn read_fd(&self) -> RawFd {
        self.fd
    }
}

/// The two named pipes, treated as one logical side: bytes are read from
/// the input fifo and written to the output fifo. Consumes `WS` frames
/// before forwarding the remainder to the master; input-pipe EOF (the
/// endpoint detached) reopens the fifo and keeps going rather than ending
/// the daemon.
struct PipeSide {
    read_fd: RawFd,
    write_fd: RawFd,
    path: std::path::PathBuf,
    master_fd: RawFd,
    scanner: Option<protocol::FrameScanner>,
}

impl RelaySide for PipeSide {
    fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    fn transform_outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let scanner = self.scanner.get_or_insert_with(|| protocol::FrameScanner::new(protocol::opcode::WINSIZE));
        let (passthrough, frames) = scanner.feed(data)?;
        for frame in frames {
            match protocol::unpack_winsize(&frame.payload) {
                Ok((rows, cols, _xpixel, _ypixel)) => {
                    let size = tty::Size { rows, cols };
                    if let Err(e) = size.set_fd(self.master_fd) {
                        warn!("failed to apply forwarded window size: {:?}", e);
                    }
                }
                Err(e) => warn!("malformed WS frame payload: {:?}", e),
            }
        }
        Ok(passthrough)
    }

    fn on_eof(&mut self) -> Result<EofAction> {
        info!("input pipe writer (endpoint) went away, reopening and waiting for the next one");
        let new_fd = open_for_read(&self.path)?;
        self.read_fd = new_fd;
        Ok(EofAction::Reopen(new_fd))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::io::AsRawFd;

    use nix::pty::openpty;

    use super::*;

    #[test]
    fn pipe_side_consumes_ws_frames_and_applies_them_to_the_master() {
        let pty = openpty(None, None).unwrap();
        let master_fd = pty.master.as_raw_fd();

        let mut side = PipeSide {
            read_fd: -1,
            write_fd: -1,
            path: std::path::PathBuf::new(),
            master_fd,
            scanner: None,
        };

        let payload = protocol::pack_winsize(50, 200, 0, 0);
        let frame = protocol::encode(protocol::opcode::WINSIZE, &payload);
        let mut stream = b"typed input".to_vec();
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(b"more input");

        let mut forwarded = Vec::new();
        for byte in &stream {
            forwarded.extend_from_slice(&side.transform_outgoing(&[*byte]).unwrap());
        }

        assert_eq!(forwarded, b"typed inputmore input");
        let size = tty::Size::from_fd(master_fd).unwrap();
        assert_eq!((size.rows, size.cols), (50, 200));
    }
}
