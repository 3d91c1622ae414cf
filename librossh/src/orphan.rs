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

//! Client-side orphan bookkeeping: marker files recording terminal ids the
//! client believes it has abandoned. A marker is only meaningfully "orphaned"
//! once the client process that created it has died, which we detect via an
//! advisory lock rather than any pid comparison (the client may have been
//! killed, not just exited, so there's no cleanup hook to rely on).

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use nix::fcntl::{flock, FlockArg};

use crate::consts;

/// An orphan marker currently locked by this process. Dropping it releases
/// the lock (the OS does this automatically on file-descriptor close, but we
/// also explicitly unlock in case the handle is held open as this struct is
/// moved around) but does **not** remove the file -- callers decide when to
/// unlink it (graceful session end) versus keep it around (abandoned).
pub struct LockedMarker {
    file: File,
    path: PathBuf,
}

impl LockedMarker {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the marker file. Used on graceful session end, and once a
    /// remote `KILLed:<id>` confirms the far side reaped the session.
    pub fn remove(self) -> Result<()> {
        fs::remove_file(&self.path).with_context(|| format!("removing orphan marker {:?}", self.path))
    }

    /// Release the lock but leave the marker file in place, so the next
    /// `connect()` to this host will find it as an abandoned candidate.
    pub fn abandon(self) {
        drop(self);
    }
}

impl Drop for LockedMarker {
    fn drop(&mut self) {
        let _ = flock(&self.file, FlockArg::UnlockNonblock);
    }
}

fn marker_path(program_dir: &Path, term_id: &str) -> PathBuf {
    program_dir.join(format!("{}{}", consts::ORPHAN_MARKER_PREFIX, term_id))
}

/// Create the marker for a newly-attached session and take an exclusive,
/// non-blocking advisory lock on it for the lifetime of this process.
pub fn create_and_lock(program_dir: &Path, term_id: &str) -> Result<LockedMarker> {
    let path = marker_path(program_dir, term_id);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("creating orphan marker {:?}", path))?;
    flock(&file, FlockArg::LockExclusiveNonblock)
        .with_context(|| format!("locking freshly created orphan marker {:?}", path))?;
    Ok(LockedMarker { file, path })
}

/// Scan `program_dir` for orphan markers whose lock this process can
/// acquire -- meaning whatever client created them is no longer alive to
/// hold the lock. Returns the terminal ids, with the lock immediately
/// released again (the caller doesn't keep these locked; it just wants the
/// candidate list to pass to `--kill`).
pub fn scan_unlocked(program_dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();

    let entries = match fs::read_dir(program_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e).with_context(|| format!("reading directory {:?}", program_dir)),
    };

    for entry in entries {
        let entry = entry.context("reading directory entry")?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(term_id) = name.strip_prefix(consts::ORPHAN_MARKER_PREFIX) else {
            continue;
        };

        let file = match OpenOptions::new().write(true).open(entry.path()) {
            Ok(f) => f,
            Err(_) => continue,
        };
        match flock(&file, FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                // Lock acquired: the prior owner is dead. Release immediately;
                // we are only scanning, not claiming it.
                let _ = flock(&file, FlockArg::UnlockNonblock);
                ids.push(term_id.to_string());
            }
            Err(_) => {
                // Still held by a live client: not an orphan.
            }
        }
    }

    Ok(ids)
}

/// Remove a marker by terminal id once the remote side has confirmed it
/// killed the session (`KILLed:<id>`).
pub fn remove_by_id(program_dir: &Path, term_id: &str) -> Result<()> {
    let path = marker_path(program_dir, term_id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing orphan marker {:?}", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rossh-orphan-test-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn locked_marker_is_not_reported_as_unlocked() {
        let dir = tmp_dir("locked");
        let marker = create_and_lock(&dir, "abc").unwrap();

        let unlocked = scan_unlocked(&dir).unwrap();
        assert!(unlocked.is_empty(), "a marker locked by us should not show up as orphaned");

        drop(marker);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unlocked_marker_is_reported() {
        let dir = tmp_dir("unlocked");
        let marker = create_and_lock(&dir, "xyz").unwrap();
        marker.abandon();

        let unlocked = scan_unlocked(&dir).unwrap();
        assert_eq!(unlocked, vec!["xyz".to_string()]);

        remove_by_id(&dir, "xyz").unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn remove_after_graceful_end_clears_the_marker() {
        let dir = tmp_dir("graceful");
        let marker = create_and_lock(&dir, "done").unwrap();
        let path = marker.path().to_path_buf();
        marker.remove().unwrap();
        assert!(!path.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
