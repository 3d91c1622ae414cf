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

//! Uploading `rossh-server` to a remote host over the same shell channel
//! used to dial it, one base64-encoded chunk at a time, since there's no
//! side channel (scp, sftp) guaranteed to be available or worth depending
//! on for a single small binary.

use std::{fs, os::fd::RawFd, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use librossh::consts;
use tracing::info;

use crate::dial;

/// Find the copy of `rossh-server` to upload: it is expected to sit next to
/// this binary, the way it's laid out by the workspace build and by a
/// typical install of the `rossh` package.
pub fn locate_server_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("resolving our own executable path")?;
    let dir = exe.parent().ok_or_else(|| anyhow!("executable path {:?} has no parent dir", exe))?;
    let candidate = dir.join(consts::REMOTE_SERVER_BIN);
    if !candidate.is_file() {
        return Err(anyhow!(
            "could not find {} next to {:?}; build the workspace so both binaries land in the same directory",
            consts::REMOTE_SERVER_BIN,
            exe
        ));
    }
    Ok(candidate)
}

/// Create `~/.rossh`, clear out any previous binary, then stream the local
/// one across in `INSTALL_CHUNK_SIZE`-byte pieces, each base64-encoded and
/// appended with a single shell command.
pub fn install(fd: RawFd) -> Result<()> {
    let server_bin = locate_server_binary()?;
    let bytes = fs::read(&server_bin)
        .with_context(|| format!("reading local {:?} to upload", server_bin))?;

    info!(bytes = bytes.len(), "installing rossh-server on remote host");

    let remote_dir = format!("~/{}", consts::REMOTE_PROGRAM_DIR);
    dial::run_remote_command(fd, &format!("mkdir -p {remote_dir}"))?;
    dial::run_remote_command(fd, &format!("chmod go-w {remote_dir}"))?;
    dial::run_remote_command(fd, &format!("rm -f {remote_dir}/{}", consts::REMOTE_SERVER_BIN))?;

    for chunk in bytes.chunks(consts::INSTALL_CHUNK_SIZE) {
        let encoded = STANDARD.encode(chunk);
        let cmd = format!(
            "echo {encoded} | base64 -d >> {remote_dir}/{}",
            consts::REMOTE_SERVER_BIN
        );
        dial::run_remote_command(fd, &cmd)?;
    }

    dial::run_remote_command(
        fd,
        &format!("chmod go-w,+x {remote_dir}/{}", consts::REMOTE_SERVER_BIN),
    )?;

    info!("rossh-server install complete");
    Ok(())
}
