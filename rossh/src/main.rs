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

//! `rossh` wraps an external secure-shell binary to provide a remote shell
//! session that survives a dropped network link. See the top-level design
//! notes for the handshake it drives the remote host through.

mod client;
mod dial;
mod install;
mod session;
mod termid;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Flags `rossh` consumes itself before handing the rest of argv to the
/// underlying `ssh` binary unmodified (hostname, `-p`, `-i`, and so on all
/// pass straight through).
#[derive(Parser, Debug)]
#[command(
    about = "ssh wrapper providing persistent remote shell sessions",
    trailing_var_arg = true,
    allow_hyphen_values = true
)]
struct Cli {
    #[arg(long)]
    version: bool,

    #[arg(long = "log-file")]
    log_file: Option<String>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long = "config-file")]
    config_file: Option<String>,

    /// Reconnect automatically on a dropped link instead of prompting.
    #[arg(long = "auto-reconnect")]
    auto_reconnect: bool,

    /// Everything else: passed through to the ssh binary verbatim.
    ssh_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("rossh {}", VERSION);
        return Ok(());
    }

    let home = std::env::var("HOME").context("HOME must be set to locate the local rossh program directory")?;
    let program_dir = PathBuf::from(home).join(librossh::consts::REMOTE_PROGRAM_DIR);
    let default_config_path = program_dir.join("config.toml");

    let config = librossh::config::read_config(cli.config_file.as_deref().map(std::path::Path::new), &default_config_path)?;

    let log_file = cli.log_file.clone().or(config.log_file.clone());
    let verbose = cli.verbose.max(config.verbosity);
    librossh::init_logging(log_file.as_deref(), verbose, false)?;

    if cli.ssh_args.is_empty() {
        anyhow::bail!("usage: rossh [OPTIONS] <ssh arguments, e.g. a hostname>");
    }

    let term_id = termid::generate();
    tracing::info!(term_id = %term_id, "starting rossh session");

    let sess = client::Session::new(
        cli.ssh_args,
        term_id,
        program_dir,
        cli.auto_reconnect || config.auto_reconnect,
    );
    let code = sess.attach()?;
    std::process::exit(code);
}
