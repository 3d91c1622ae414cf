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

//! Shared support library used by both binaries: the session registry, tty
//! utilities, user/shell lookup, client-side orphan bookkeeping, and the
//! bidirectional relay abstraction used by the daemon and the endpoint role
//! alike.
//!
//! Mirrors the "thin binary crates wrapping one library crate" split the
//! reference stack uses between its CLI crate and its implementation crate:
//! `rossh` and `rossh-server` are both thin wrappers around this library.

pub mod config;
pub mod consts;
pub mod errors;
pub mod orphan;
pub mod registry;
pub mod relay;
pub mod tty;
pub mod user;

pub use rossh_protocol as protocol;

/// Initialize the shared `tracing` logging setup used by both binaries: a
/// `--log-file` routes structured logs to a file; otherwise (for the daemon
/// role specifically, which runs detached) logs go to stderr; the client and
/// endpoint roles stay quiet absent `--verbose`.
pub fn init_logging(log_file: Option<&str>, verbose: u8, default_to_stderr: bool) -> anyhow::Result<()> {
    use std::{fs, io, sync::Mutex};

    use anyhow::Context;
    use tracing_subscriber::fmt::format::FmtSpan;

    let trace_level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if let Some(path) = log_file {
        let file = fs::File::create(path).with_context(|| format!("creating log file {:?}", path))?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else if default_to_stderr {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    Ok(())
}
