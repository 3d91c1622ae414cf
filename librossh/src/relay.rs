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

//! The bidirectional relay loop shared by the daemon (pty master <-> input/
//! output fifos) and the endpoint (stdin/stdout <-> input/output fifos).
//!
//! Both loops are structurally the same: read whatever is ready on either
//! side, run it through a side-specific transform (the daemon consumes `WS`
//! frames out of the input stream before forwarding the remainder to the
//! pty master; the endpoint's sides are a plain passthrough), and forward
//! the rest. What differs is what an EOF on each side means, which callers
//! express with [`EofAction`], and what external signals should also end the
//! loop, which callers express with the `should_stop` callback.

use std::os::unix::io::RawFd;

use anyhow::{Context, Result};
use nix::unistd::{read, write};

use crate::consts::BUF_SIZE;

/// What to do when one side of the relay hits EOF.
pub enum EofAction {
    /// The loop is over; propagate whatever exit behavior the caller wants.
    Stop,
    /// Replace the fd and keep going. Used by the daemon when the input pipe's
    /// writer (the endpoint) goes away: the pipe itself is reopened and the
    /// loop resumes, blocking until a new endpoint attaches.
    Reopen(RawFd),
}

/// One side of a [`relay`] call: a readable fd, a (possibly different)
/// writable fd, plus hooks for transforming outgoing bytes and handling
/// EOF. A pty master or a socket reads and writes the same fd, so
/// `write_fd` defaults to `read_fd`; a pair of named pipes reads one fifo
/// and writes the other, so that side overrides `write_fd` independently.
pub trait RelaySide {
    fn read_fd(&self) -> RawFd;

    fn write_fd(&self) -> RawFd {
        self.read_fd()
    }

    /// Called with bytes just read from this side, before they are forwarded
    /// to the other side. Returning a shorter (or empty) vector drops bytes
    /// (used to consume an in-band `WS` frame without forwarding its bytes to
    /// the shell).
    fn transform_outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    /// Called when a read from this side returns zero bytes.
    fn on_eof(&mut self) -> Result<EofAction> {
        Ok(EofAction::Stop)
    }
}

enum Side {
    A,
    B,
}

/// Run the relay loop until either side asks to stop or `should_stop`
/// returns `true`. `a` and `b` are symmetric; which is "primary" is purely a
/// naming convention at the call site (daemon calls it with the pty master
/// as `a`, the endpoint calls it with its output fifo as `a`).
///
/// `should_stop` is polled at the top of every iteration, including right
/// after a signal interrupts the blocking `poll(2)` call -- this is how
/// callers fold externally-delivered signals (hangup, interrupt, terminate)
/// into the same cooperative loop without the relay itself knowing anything
/// about them.
pub fn relay(
    mut a: impl RelaySide,
    mut b: impl RelaySide,
    mut should_stop: impl FnMut() -> Result<bool>,
) -> Result<()> {
    loop {
        if should_stop()? {
            return Ok(());
        }

        let fd_a = a.read_fd();
        let fd_b = b.read_fd();

        let mut fds = [
            libc::pollfd { fd: fd_a, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: fd_b, events: libc::POLLIN, revents: 0 },
        ];

        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err).context("polling relay file descriptors");
        }

        if fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            if !forward(&mut a, &mut b, Side::A)? {
                return Ok(());
            }
        }
        if fds[1].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            if !forward(&mut b, &mut a, Side::B)? {
                return Ok(());
            }
        }
    }
}

/// Read from `from`, transform, and write to `to`. Returns `Ok(false)` if the
/// loop as a whole should stop.
fn forward(from: &mut impl RelaySide, to: &mut impl RelaySide, which: Side) -> Result<bool> {
    let mut buf = [0u8; BUF_SIZE];
    let from_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(from.read_fd()) };
    let n = read(from_fd, &mut buf).context("reading from relay side")?;

    if n == 0 {
        return match from.on_eof()? {
            EofAction::Stop => Ok(false),
            EofAction::Reopen(_new_fd) => {
                // The caller's RelaySide impl is expected to have already
                // swapped its own internal read fd; `read_fd()` on the next
                // iteration picks up the new value. We just keep looping.
                let _ = which;
                Ok(true)
            }
        };
    }

    let transformed = from.transform_outgoing(&buf[..n])?;
    if !transformed.is_empty() {
        write_all(to.write_fd(), &transformed)?;
    }
    Ok(true)
}

fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    while !data.is_empty() {
        let n = write(fd, data).context("writing to relay side")?;
        data = &data[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::io::AsRawFd;

    use super::*;

    struct PipeEnd {
        fd: RawFd,
        eof_action: EofAction,
    }

    impl RelaySide for PipeEnd {
        fn read_fd(&self) -> RawFd {
            self.fd
        }

        fn on_eof(&mut self) -> Result<EofAction> {
            Ok(std::mem::replace(&mut self.eof_action, EofAction::Stop))
        }
    }

    #[test]
    fn relay_forwards_bytes_until_both_sides_close() {
        use std::{io::Write, os::unix::net::UnixStream, thread};

        let (a1, a2) = UnixStream::pair().unwrap();
        let (b1, b2) = UnixStream::pair().unwrap();

        let handle = thread::spawn(move || {
            let side_a = PipeEnd { fd: a1.as_raw_fd(), eof_action: EofAction::Stop };
            let side_b = PipeEnd { fd: b1.as_raw_fd(), eof_action: EofAction::Stop };
            relay(side_a, side_b, || Ok(false)).unwrap();
            // keep the UnixStream alive until the relay loop (which only holds
            // raw fds) has exited
            drop(a1);
            drop(b1);
        });

        let mut a2 = a2;
        let mut b2 = b2;
        a2.write_all(b"hello from a").unwrap();
        drop(a2);
        drop(b2);

        handle.join().unwrap();
    }
}
