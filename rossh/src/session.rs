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

//! The connected phase: bridge our own stdio to the ssh master fd until the
//! remote endpoint announces a clean shutdown with `CONN:E`, or the link
//! itself drops and we have to report a reconnect is needed.

use std::{
    cell::Cell,
    os::fd::RawFd,
    rc::Rc,
};

use anyhow::{Context, Result};
use librossh::{
    relay::{relay, EofAction, RelaySide},
    tty,
};
use rossh_protocol::{opcode, TailMatcher, TailScan, DEFAULT_TAIL_WINDOW};
use tracing::info;

/// How the connected phase ended.
pub enum Ended {
    /// The remote endpoint sent `CONN:E`: the shell exited normally.
    Closed,
    /// Either side hit EOF without a `CONN:E` ever arriving: the link
    /// dropped and a reconnect attempt is warranted.
    Disconnected,
}

/// Run the relay loop for one connected session. `master_fd` is the ssh
/// pty master; stdio is our own terminal.
pub fn run(master_fd: RawFd) -> Result<Ended> {
    let seen_end = Rc::new(Cell::new(false));

    let _raw_guard = tty::set_attach_flags().context("entering raw mode")?;
    let _resize_guard = tty::ResizeForwarder::install(0, tty::ResizeMode::Direct(master_fd))
        .context("installing resize forwarder")?;

    let master_side =
        MasterSide { fd: master_fd, finder: TailMatcher::new(DEFAULT_TAIL_WINDOW), seen_end: Rc::clone(&seen_end) };
    let stdio_side = StdioSide;

    let stop_flag = Rc::clone(&seen_end);
    relay(master_side, stdio_side, move || Ok(stop_flag.get())).context("relaying connected session")?;

    if seen_end.get() {
        info!("remote shell exited, session closed");
        Ok(Ended::Closed)
    } else {
        Ok(Ended::Disconnected)
    }
}

/// The ssh pty master. Outgoing bytes (remote -> our stdout) are scanned for
/// `CONN:E`; everything before the match is forwarded to the terminal as
/// soon as it's read (never withheld waiting on more data), the match
/// itself and anything after it is dropped, and the `seen_end` flag is
/// raised so the relay loop stops on its next iteration.
struct MasterSide {
    fd: RawFd,
    finder: TailMatcher,
    seen_end: Rc<Cell<bool>>,
}

impl RelaySide for MasterSide {
    fn read_fd(&self) -> RawFd {
        self.fd
    }

    fn transform_outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.seen_end.get() {
            return Ok(Vec::new());
        }
        let pattern = rossh_protocol::encode_fixed(opcode::CONN_E);
        match self.finder.scan(data, &pattern) {
            TailScan::NoMatch { forward } => Ok(forward),
            TailScan::Match { forward, after: _ } => {
                self.seen_end.set(true);
                Ok(forward)
            }
        }
    }

    fn on_eof(&mut self) -> Result<EofAction> {
        Ok(EofAction::Stop)
    }
}

/// Our own stdio, plain passthrough in both directions.
struct StdioSide;

impl RelaySide for StdioSide {
    fn read_fd(&self) -> RawFd {
        0
    }

    fn write_fd(&self) -> RawFd {
        1
    }

    fn on_eof(&mut self) -> Result<EofAction> {
        Ok(EofAction::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_side_drops_bytes_at_and_after_conn_e() {
        let seen_end = Rc::new(Cell::new(false));
        let mut side = MasterSide {
            fd: -1,
            finder: TailMatcher::new(DEFAULT_TAIL_WINDOW),
            seen_end: Rc::clone(&seen_end),
        };

        let mut stream = b"some shell output".to_vec();
        stream.extend_from_slice(&rossh_protocol::encode_fixed(opcode::CONN_E));
        stream.extend_from_slice(b"never shown");

        let mut forwarded = Vec::new();
        for byte in &stream {
            forwarded.extend_from_slice(&side.transform_outgoing(&[*byte]).unwrap());
        }

        assert_eq!(forwarded, b"some shell output");
        assert!(seen_end.get());
    }

    #[test]
    fn master_side_forwards_a_short_prompt_immediately() {
        // A shell prompt is typically much shorter than the CONN:E pattern;
        // it must come back out of the very same call, not sit withheld
        // waiting for output that may never come while the shell is idle.
        let seen_end = Rc::new(Cell::new(false));
        let mut side = MasterSide {
            fd: -1,
            finder: TailMatcher::new(DEFAULT_TAIL_WINDOW),
            seen_end: Rc::clone(&seen_end),
        };

        let forwarded = side.transform_outgoing(b"$ ").unwrap();
        assert_eq!(forwarded, b"$ ");
        assert!(!seen_end.get());
    }

    #[test]
    fn master_side_forwards_everything_when_no_conn_e_arrives() {
        let seen_end = Rc::new(Cell::new(false));
        let mut side = MasterSide {
            fd: -1,
            finder: TailMatcher::new(DEFAULT_TAIL_WINDOW),
            seen_end: Rc::clone(&seen_end),
        };

        let line = "ordinary shell output, ".repeat(10);
        let forwarded = side.transform_outgoing(line.as_bytes()).unwrap();
        assert_eq!(forwarded, line.as_bytes());
        assert!(!seen_end.get());
    }
}
