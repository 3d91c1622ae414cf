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

//! Spawning the external secure-shell binary and walking it from a raw
//! login prompt to either a connected session or a verdict that the remote
//! `rossh-server` needs installing.

use std::os::fd::RawFd;

use anyhow::{anyhow, Context, Result};
use librossh::errors::ClientTooOldError;
use nix::unistd::{read, write};
use rossh_protocol::{self as protocol, PatternFinder, Scan};
use tracing::info;

/// What came back after sending the launch command.
pub enum Outcome {
    /// `CONN:S` was seen; the endpoint is up and relaying.
    Connected,
    /// The launch command bounced back to the prompt (missing binary) or
    /// the remote binary flagged itself as older than this client.
    NeedsInstall,
}

/// Fork `ssh` under a pseudo-terminal, passing through the user's own
/// arguments (a hostname, flags, whatever they'd hand to `ssh` directly) and
/// appending a final command that drops the remote login into a minimal
/// shell whose prompt is a literal `PROMPT` control frame.
pub fn spawn_ssh(ssh_args: &[String]) -> Result<shpool_pty::fork::Fork> {
    let prompt = String::from_utf8(protocol::encode_fixed(protocol::opcode::PROMPT))
        .expect("control frame bytes are printable ASCII");
    let remote_cmd = format!("PS1='{prompt}' exec /bin/sh -i");

    info!(ssh_args = ?ssh_args, "dialing");

    let fork = shpool_pty::fork::Fork::from_ptmx().context("forking pty for ssh")?;
    if let Ok(_slave) = fork.is_child() {
        let mut cmd = std::process::Command::new("ssh");
        cmd.args(ssh_args);
        cmd.arg("-t").arg(remote_cmd);
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        eprintln!("failed to exec ssh: {:?}", err);
        std::process::exit(1);
    }

    Ok(fork)
}

/// Echo raw bytes to our own stdout (so the user can answer host-key or
/// password prompts) until the fabricated `PROMPT` frame appears, and
/// return whatever bytes followed the match within the chunk it was found
/// in.
pub fn wait_for_initial_prompt(fd: RawFd) -> Result<Vec<u8>> {
    let prompt = protocol::encode_fixed(protocol::opcode::PROMPT);
    let mut finder = PatternFinder::new();

    loop {
        let mut buf = [0u8; 4096];
        let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let n = read(bfd, &mut buf).context("reading from ssh master")?;
        if n == 0 {
            return Err(anyhow!("ssh exited before reaching a usable shell prompt"));
        }

        match finder.scan(&buf[..n], &prompt) {
            Scan::NoMatch { flush } => {
                write_all(1, &flush)?;
            }
            Scan::Match { flush, after } => {
                write_all(1, &flush)?;
                return Ok(after);
            }
        }
    }
}

/// Submit the one-line command that launches (or re-launches) the remote
/// endpoint. Wrapped in a subshell so that a missing/broken binary bounces
/// the interactive shell back to its prompt instead of leaving the user
/// stuck in a dead command, and `TERM` is carried across explicitly since
/// the inner shell doesn't otherwise inherit our interactive session's
/// idea of it.
pub fn send_launch_command(
    fd: RawFd,
    client_version: u32,
    term_id: &str,
    kill_ids: &[String],
) -> Result<()> {
    let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());
    let mut bin = format!(
        "TERM={term} ~/{}/{} -V {client_version} -t {term_id}",
        librossh::consts::REMOTE_PROGRAM_DIR,
        librossh::consts::REMOTE_SERVER_BIN,
    );
    for id in kill_ids {
        bin.push_str(" --kill ");
        bin.push_str(id);
    }
    let cmd = format!("unset HISTFILE; ( {bin} ) || true\n");
    write_all(fd, cmd.as_bytes())
}

/// Wait for the remote endpoint's first frame after a launch command was
/// submitted: `CONN:S` (success), `CONN:FL:VER:SERVER_UPDATE` or a bounce
/// back to the shell prompt (both mean "install/upgrade needed"), or
/// `CONN:FL:VER:CLIENT_TOOOLD` (fatal). Also collects any `KILLed:<id>`
/// frames that arrive along the way, so the caller can clear local orphan
/// markers regardless of how this attempt turns out.
pub fn await_launch_outcome(fd: RawFd, seed: Vec<u8>) -> Result<(Outcome, Vec<String>)> {
    let conn_s = protocol::encode_fixed(protocol::opcode::CONN_S);
    let server_update = protocol::encode_fixed(protocol::opcode::SERVER_UPDATE);
    let client_too_old = protocol::encode_fixed(protocol::opcode::CLIENT_TOO_OLD);
    let prompt = protocol::encode_fixed(protocol::opcode::PROMPT);

    let no_interpreter = b"No such file or directory";

    let mut f_conn_s = PatternFinder::new();
    let mut f_client_too_old = PatternFinder::new();
    let mut f_server_update = PatternFinder::new();
    let mut f_prompt = PatternFinder::new();
    let mut f_no_interpreter = PatternFinder::new();
    let mut killed_scanner = protocol::FrameScanner::new(protocol::opcode::KILLED_PREFIX);
    let mut killed_ids = Vec::new();

    let mut pending = seed;
    loop {
        let chunk = if !pending.is_empty() {
            std::mem::take(&mut pending)
        } else {
            let mut buf = [0u8; 4096];
            let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            let n = read(bfd, &mut buf).context("reading from ssh master")?;
            if n == 0 {
                return Err(anyhow!("ssh link closed while waiting for the remote endpoint"));
            }
            buf[..n].to_vec()
        };

        let (_passthrough, frames) = killed_scanner.feed(&chunk)?;
        for frame in frames {
            killed_ids.push(String::from_utf8_lossy(&frame.opcode_suffix).into_owned());
        }

        if matches!(f_conn_s.scan(&chunk, &conn_s), Scan::Match { .. }) {
            return Ok((Outcome::Connected, killed_ids));
        }
        if matches!(f_client_too_old.scan(&chunk, &client_too_old), Scan::Match { .. }) {
            return Err(ClientTooOldError.into());
        }
        if matches!(f_no_interpreter.scan(&chunk, no_interpreter), Scan::Match { .. }) {
            return Err(anyhow!(
                "remote shell could not exec the uploaded binary (no matching interpreter/architecture)"
            ));
        }
        if matches!(f_server_update.scan(&chunk, &server_update), Scan::Match { .. }) {
            return Ok((Outcome::NeedsInstall, killed_ids));
        }
        if matches!(f_prompt.scan(&chunk, &prompt), Scan::Match { .. }) {
            return Ok((Outcome::NeedsInstall, killed_ids));
        }
    }
}

/// Submit a single bootstrap command and block until the shell prompt
/// reappears. Used only during install, so nothing read here is echoed to
/// the user.
pub fn run_remote_command(fd: RawFd, cmd: &str) -> Result<()> {
    let mut line = cmd.to_string();
    line.push('\n');
    write_all(fd, line.as_bytes())?;

    let prompt = protocol::encode_fixed(protocol::opcode::PROMPT);
    let mut finder = PatternFinder::new();
    loop {
        let mut buf = [0u8; 4096];
        let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let n = read(bfd, &mut buf).context("reading from ssh master")?;
        if n == 0 {
            return Err(anyhow!("ssh link closed while running {:?}", cmd));
        }
        if matches!(finder.scan(&buf[..n], &prompt), Scan::Match { .. }) {
            return Ok(());
        }
    }
}

pub fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    let bfd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    while !data.is_empty() {
        let n = write(bfd, data).context("writing to ssh master")?;
        data = &data[n..];
    }
    Ok(())
}

pub fn master_fd(fork: &shpool_pty::fork::Fork) -> Result<RawFd> {
    let master = fork.is_parent().context("getting ssh pty master handle")?;
    master.raw_fd().ok_or_else(|| anyhow!("no fd for ssh pty master"))
}

#[cfg(test)]
mod tests {
    use std::{os::unix::{io::AsRawFd, net::UnixStream}, thread};

    use super::*;

    #[test]
    fn wait_for_initial_prompt_returns_bytes_after_the_match() {
        let (a, b) = UnixStream::pair().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = a;
            use std::io::Write;
            stream.write_all(b"password: ").unwrap();
            stream.write_all(&protocol::encode_fixed(protocol::opcode::PROMPT)).unwrap();
            stream.write_all(b"trailing").unwrap();
        });

        let after = wait_for_initial_prompt(b.as_raw_fd()).unwrap();
        assert_eq!(after, b"trailing");
        writer.join().unwrap();
    }

    #[test]
    fn await_launch_outcome_recognizes_connected() {
        let (a, b) = UnixStream::pair().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = a;
            use std::io::Write;
            stream.write_all(&protocol::encode_fixed(protocol::opcode::CONN_S)).unwrap();
        });

        let (outcome, killed) = await_launch_outcome(b.as_raw_fd(), Vec::new()).unwrap();
        assert!(matches!(outcome, Outcome::Connected));
        assert!(killed.is_empty());
        writer.join().unwrap();
    }

    #[test]
    fn await_launch_outcome_recognizes_needs_install_on_prompt_bounce() {
        let (a, b) = UnixStream::pair().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = a;
            use std::io::Write;
            stream.write_all(&protocol::encode_fixed(protocol::opcode::PROMPT)).unwrap();
        });

        let (outcome, _killed) = await_launch_outcome(b.as_raw_fd(), Vec::new()).unwrap();
        assert!(matches!(outcome, Outcome::NeedsInstall));
        writer.join().unwrap();
    }

    #[test]
    fn await_launch_outcome_errors_fatally_on_client_too_old() {
        let (a, b) = UnixStream::pair().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = a;
            use std::io::Write;
            stream.write_all(&protocol::encode_fixed(protocol::opcode::CLIENT_TOO_OLD)).unwrap();
        });

        let err = await_launch_outcome(b.as_raw_fd(), Vec::new()).unwrap_err();
        assert!(err.downcast_ref::<ClientTooOldError>().is_some());
        writer.join().unwrap();
    }

    #[test]
    fn await_launch_outcome_collects_killed_ids_before_conn_s() {
        let (a, b) = UnixStream::pair().unwrap();
        let writer = thread::spawn(move || {
            let mut stream = a;
            use std::io::Write;
            let mut killed_op = protocol::opcode::KILLED_PREFIX.to_vec();
            killed_op.extend_from_slice(b"orphan1");
            stream.write_all(&protocol::encode(&killed_op, b"")).unwrap();
            stream.write_all(&protocol::encode_fixed(protocol::opcode::CONN_S)).unwrap();
        });

        let (outcome, killed) = await_launch_outcome(b.as_raw_fd(), Vec::new()).unwrap();
        assert!(matches!(outcome, Outcome::Connected));
        assert_eq!(killed, vec!["orphan1".to_string()]);
        writer.join().unwrap();
    }
}
