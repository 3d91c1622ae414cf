// Copyright 2023 Google LLC
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

//! The session registry: the filesystem layout and lock-file conventions
//! shared between the daemon and the endpoint for a given terminal id.
//!
//! Everything here is plain, racy-looking filesystem manipulation made safe
//! by the specific ordering invariants documented on each function: the
//! `mkdir` exclusivity for session creation, and the "signal before
//! overwrite" rule for the connection pid file.

use std::{
    fs,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use nix::{
    sys::stat::Mode,
    unistd::{mkfifo, Pid},
};

use crate::consts;

/// The set of paths that make up a terminal id's session directory.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
}

impl SessionPaths {
    pub fn new(term_id: &str) -> Self {
        SessionPaths {
            dir: PathBuf::from(consts::SESSION_DIR_BASE)
                .join(format!("{}{}", consts::SESSION_DIR_PREFIX, term_id)),
        }
    }

    pub fn session_pid(&self) -> PathBuf {
        self.dir.join("session.pid")
    }

    pub fn connection_pid(&self) -> PathBuf {
        self.dir.join("connection.pid")
    }

    pub fn auth_sock(&self) -> PathBuf {
        self.dir.join("auth.sock")
    }

    pub fn input_fifo(&self) -> PathBuf {
        self.dir.join("input")
    }

    pub fn output_fifo(&self) -> PathBuf {
        self.dir.join("output")
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }
}

/// Attempt to become the creator of the session directory for a terminal id.
///
/// Returns `Ok(true)` if this call created the directory (and therefore must
/// go on to make the fifos and fork the daemon), or `Ok(false)` if a racing
/// peer already created it (in which case the directory, and presumably the
/// fifos and daemon, are somebody else's responsibility). The `mkdir` syscall
/// is what makes this exclusive-or: exactly one racer observes `Ok(())`.
pub fn create_if_not_exists(paths: &SessionPaths) -> Result<bool> {
    match nix::unistd::mkdir(&paths.dir, Mode::S_IRWXU) {
        Ok(()) => {}
        Err(nix::errno::Errno::EEXIST) => return Ok(false),
        Err(e) => return Err(e).context("creating session directory"),
    }

    for fifo in [paths.input_fifo(), paths.output_fifo()] {
        match mkfifo(&fifo, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => {}
            Err(nix::errno::Errno::EEXIST) => {}
            Err(e) => return Err(e).context(format!("creating fifo {:?}", fifo)),
        }
    }

    Ok(true)
}

/// Remove the whole session directory. Used by the daemon on clean shutdown
/// and by orphan reaping once both processes have been signalled.
pub fn remove(paths: &SessionPaths) -> Result<()> {
    match fs::remove_dir_all(&paths.dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("removing session directory"),
    }
}

/// Replace `auth.sock` with a fresh symlink to the given path, removing any
/// existing link first.
pub fn relink_auth_sock(paths: &SessionPaths, target: &Path) -> Result<()> {
    let link = paths.auth_sock();
    match fs::remove_file(&link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("removing stale auth.sock symlink"),
    }
    symlink(target, &link).context("creating auth.sock symlink")
}

/// Write a pid file, creating or truncating it. Callers are responsible for
/// respecting the "signal the previous occupant before overwriting" rule
/// where it applies (connection.pid).
pub fn write_pid_file(path: &Path, pid: Pid) -> Result<()> {
    fs::write(path, format!("{}\n", pid)).with_context(|| format!("writing pid file {:?}", path))?;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms).with_context(|| format!("chmod pid file {:?}", path))
}

/// Read a pid file, returning `None` if it does not exist.
pub fn read_pid_file(path: &Path) -> Result<Option<Pid>> {
    let contents = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading pid file {:?}", path)),
    };
    let pid: i32 = contents
        .trim()
        .parse()
        .with_context(|| format!("parsing pid file {:?} contents {:?}", path, contents))?;
    Ok(Some(Pid::from_raw(pid)))
}

/// Remove a pid file if present, swallowing a "not found" error.
pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing pid file {:?}", path)),
    }
}

/// True if the process named by `pid` is still alive, from the perspective
/// of `kill(pid, 0)`.
pub fn process_alive(pid: Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

/// Send a signal to a process, swallowing "no such process" (the target may
/// have already exited, which is not an error for our purposes).
pub fn signal_if_alive(pid: Pid, sig: nix::sys::signal::Signal) -> Result<()> {
    match nix::sys::signal::kill(pid, sig) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("signalling pid {}", pid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_laid_out_as_specified() {
        let p = SessionPaths::new("abc123");
        assert_eq!(p.dir, PathBuf::from("/tmp/rossh.abc123"));
        assert_eq!(p.session_pid(), PathBuf::from("/tmp/rossh.abc123/session.pid"));
        assert_eq!(p.connection_pid(), PathBuf::from("/tmp/rossh.abc123/connection.pid"));
        assert_eq!(p.auth_sock(), PathBuf::from("/tmp/rossh.abc123/auth.sock"));
        assert_eq!(p.input_fifo(), PathBuf::from("/tmp/rossh.abc123/input"));
        assert_eq!(p.output_fifo(), PathBuf::from("/tmp/rossh.abc123/output"));
    }

    #[test]
    fn create_if_not_exists_is_exclusive() {
        let term_id = format!("test-{}", std::process::id());
        let paths = SessionPaths { dir: std::env::temp_dir().join(format!("rossh-test.{}", term_id)) };
        let _ = fs::remove_dir_all(&paths.dir);

        assert!(create_if_not_exists(&paths).unwrap());
        assert!(!create_if_not_exists(&paths).unwrap());
        assert!(paths.input_fifo().exists());
        assert!(paths.output_fifo().exists());

        fs::remove_dir_all(&paths.dir).unwrap();
    }

    #[test]
    fn pid_file_round_trip() {
        let path = std::env::temp_dir().join(format!("rossh-test-pidfile-{}", std::process::id()));
        let _ = fs::remove_file(&path);

        assert_eq!(read_pid_file(&path).unwrap(), None);
        write_pid_file(&path, Pid::from_raw(4242)).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(Pid::from_raw(4242)));
        remove_pid_file(&path).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), None);
    }

    #[test]
    fn process_alive_is_true_for_self() {
        assert!(process_alive(Pid::this()));
    }
}
