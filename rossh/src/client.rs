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

//! Orchestrates one `rossh` invocation end to end: dial, install the
//! remote endpoint if needed, relay the connected session, and retry the
//! dial on an unexpected disconnect until the user gives up or the shell
//! exits on its own.

use std::{
    io::Read as _,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use librossh::orphan;
use tracing::{info, warn};

use crate::{dial, install, session};

pub struct Session {
    pub ssh_args: Vec<String>,
    pub term_id: String,
    pub program_dir: PathBuf,
    pub auto_reconnect: bool,
}

impl Session {
    pub fn new(ssh_args: Vec<String>, term_id: String, program_dir: PathBuf, auto_reconnect: bool) -> Self {
        Session { ssh_args, term_id, program_dir, auto_reconnect }
    }

    /// Run the session to completion, returning the process exit code.
    pub fn attach(&self) -> Result<i32> {
        std::fs::create_dir_all(&self.program_dir)
            .with_context(|| format!("creating local program directory {:?}", self.program_dir))?;

        let mut kill_ids = orphan::scan_unlocked(&self.program_dir).context("scanning for local orphan markers")?;
        if !kill_ids.is_empty() {
            info!(count = kill_ids.len(), "asking remote host to reap orphaned sessions");
        }

        let mut marker = None;

        loop {
            let fork = dial::spawn_ssh(&self.ssh_args)?;
            let master_fd = dial::master_fd(&fork)?;

            dial::wait_for_initial_prompt(master_fd)?;
            dial::send_launch_command(master_fd, rossh_protocol::VERSION_INDEX, &self.term_id, &kill_ids)?;
            let (outcome, mut newly_killed) =
                dial::await_launch_outcome(master_fd, Vec::new())?;
            clear_killed(&self.program_dir, &mut kill_ids, &mut newly_killed);

            let outcome = match outcome {
                dial::Outcome::Connected => outcome,
                dial::Outcome::NeedsInstall => {
                    info!("remote endpoint missing or out of date, installing");
                    install::install(master_fd)?;
                    dial::send_launch_command(master_fd, rossh_protocol::VERSION_INDEX, &self.term_id, &kill_ids)?;
                    let (outcome, mut newly_killed) = dial::await_launch_outcome(master_fd, Vec::new())?;
                    clear_killed(&self.program_dir, &mut kill_ids, &mut newly_killed);
                    outcome
                }
            };
            if matches!(outcome, dial::Outcome::NeedsInstall) {
                anyhow::bail!("remote endpoint still reports needing install after uploading rossh-server");
            }

            if marker.is_none() {
                marker = Some(
                    orphan::create_and_lock(&self.program_dir, &self.term_id)
                        .context("creating local orphan marker")?,
                );
            }

            match session::run(master_fd)? {
                session::Ended::Closed => {
                    if let Some(m) = marker.take() {
                        m.remove().context("clearing orphan marker on graceful end")?;
                    }
                    return Ok(0);
                }
                session::Ended::Disconnected => {
                    if let Some(m) = marker.take() {
                        m.abandon();
                    }
                    if !self.prompt_retry()? {
                        warn!(term_id = %self.term_id, "giving up; the session may still be alive remotely");
                        return Ok(1);
                    }
                    // re-lock on the next successful connect
                }
            }
        }
    }

    fn prompt_retry(&self) -> Result<bool> {
        if self.auto_reconnect {
            return Ok(true);
        }
        eprint!("\r\nrossh: connection lost. press any key to retry, Ctrl-C to give up... ");
        let mut buf = [0u8; 1];
        match std::io::stdin().read(&mut buf) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) => Err(e).context("reading retry keypress"),
        }
    }
}

fn clear_killed(program_dir: &Path, pending: &mut Vec<String>, newly_killed: &mut Vec<String>) {
    for id in newly_killed.drain(..) {
        pending.retain(|p| p != &id);
        if let Err(e) = orphan::remove_by_id(program_dir, &id) {
            warn!(term_id = %id, "failed to clear local orphan marker after remote confirmed the kill: {:?}", e);
        }
    }
}
