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

//! `rossh-server`: the binary `rossh` uploads to `~/.rossh/` and launches
//! over an existing secure-shell link. Runs as a connection endpoint, and
//! the first time a given terminal id is seen, forks itself in place into
//! the session daemon that owns that terminal's login shell.

mod daemon;
mod endpoint;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "remote endpoint/daemon binary for rossh")]
struct Cli {
    /// Protocol-version index the invoking client implements.
    #[arg(short = 'V', long = "client-version")]
    client_version: u32,

    /// Terminal id to attach (or create) a session for.
    #[arg(short = 't', long = "term-id")]
    term_id: String,

    /// Terminal ids to reap as orphans before attaching.
    #[arg(long = "kill")]
    kill: Vec<String>,

    /// Route structured logs to this file instead of stderr.
    #[arg(long = "log-file")]
    log_file: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    // Logging is set up once, before the possible fork into the daemon role;
    // the forked child inherits the same subscriber, which is what lets a
    // daemon log file interleave endpoint and daemon lines for one terminal
    // id. Always targeting stderr/the log file (rather than only under
    // `--verbose`, as the client and endpoint roles otherwise do) is a
    // concession to that: by the time this process knows whether it's about
    // to become a daemon, the subscriber is already installed.
    if let Err(e) = librossh::init_logging(cli.log_file.as_deref(), cli.verbose, true) {
        eprintln!("failed to initialize logging: {:?}", e);
    }

    let args = endpoint::Args { client_version: cli.client_version, term_id: cli.term_id, kill_ids: cli.kill };

    let code = match endpoint::run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("connection endpoint exiting on error: {:?}", e);
            1
        }
    };
    std::process::exit(code);
}
