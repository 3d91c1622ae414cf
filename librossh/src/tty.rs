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

use std::{
    io,
    os::unix::io::{AsRawFd, RawFd},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
};

use anyhow::Context;
use nix::{
    sys::{
        signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal},
        termios,
        termios::{ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg},
    },
    unistd::{isatty, write},
};
use serde_derive::{Deserialize, Serialize};
use tracing::error;

use rossh_protocol as protocol;

// see `man ioctl_tty` for info on these ioctl commands
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
}

impl Size {
    /// from_fd returns the terminal size for the given terminal.
    pub fn from_fd(fd: RawFd) -> anyhow::Result<Size> {
        let mut term_size = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };

        // Saftey: term_size is stack allocated and live for the whole
        //         call.
        unsafe {
            tiocgwinsz(fd, &mut term_size).context("fetching term size")?;
        }

        Ok(Size { rows: term_size.ws_row, cols: term_size.ws_col })
    }

    /// set_fd sets the tty indicated by the given file descriptor
    /// to have this size.
    pub fn set_fd(&self, fd: RawFd) -> anyhow::Result<()> {
        let term_size =
            libc::winsize { ws_row: self.rows, ws_col: self.cols, ws_xpixel: 0, ws_ypixel: 0 };

        unsafe {
            tiocswinsz(fd, &term_size).context("setting term size")?;
        }

        Ok(())
    }
}

pub fn set_attach_flags() -> anyhow::Result<AttachFlagsGuard> {
    let fd = 0;

    if !isatty(io::stdin().as_raw_fd())?
        || !isatty(io::stdout().as_raw_fd())?
        || !isatty(io::stderr().as_raw_fd())?
    {
        // We are not attached to a terminal, so don't futz with its flags.
        return Ok(AttachFlagsGuard { fd, old: None });
    }

    // grab settings from the stdin terminal
    let old = termios::tcgetattr(fd).context("grabbing term flags")?;

    // Set the input terminal to raw mode so we immediately get the input chars.
    // The terminal for the remote shell is the one that will apply all the logic.
    let mut new = old.clone();
    new.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IXON);
    new.output_flags &= !OutputFlags::OPOST;
    new.local_flags &= !(LocalFlags::ECHO
        | LocalFlags::ECHONL
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);
    new.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
    new.control_flags |= ControlFlags::CS8;
    termios::tcsetattr(fd, SetArg::TCSANOW, &new)?;

    Ok(AttachFlagsGuard { fd, old: Some(old) })
}

pub struct AttachFlagsGuard {
    fd: RawFd,
    old: Option<termios::Termios>,
}

impl std::ops::Drop for AttachFlagsGuard {
    fn drop(&mut self) {
        if let Some(old) = &self.old {
            if let Err(e) = termios::tcsetattr(self.fd, SetArg::TCSANOW, old) {
                error!("error restoring terminal settings: {:?}", e);
            }
        }
    }
}

// The SIGWINCH handler has to reach these without capturing an environment,
// so the forwarding target lives behind these globals for the lifetime of a
// `ResizeForwarder` scope.
static RESIZE_SRC_FD: AtomicI32 = AtomicI32::new(-1);
static RESIZE_DST_FD: AtomicI32 = AtomicI32::new(-1);
static RESIZE_MODE: AtomicI32 = AtomicI32::new(0); // 0 = none, 1 = direct ioctl, 2 = WS frame

extern "C" fn handle_sigwinch(_: libc::c_int) {
    let mode = RESIZE_MODE.load(Ordering::SeqCst);
    if mode == 0 {
        return;
    }
    let src = RESIZE_SRC_FD.load(Ordering::SeqCst);
    let dst = RESIZE_DST_FD.load(Ordering::SeqCst);
    if src < 0 || dst < 0 {
        return;
    }

    let size = match Size::from_fd(src) {
        Ok(s) => s,
        Err(_) => return,
    };

    match mode {
        1 => {
            let _ = size.set_fd(dst);
        }
        2 => {
            let payload = protocol::pack_winsize(size.rows, size.cols, 0, 0);
            let frame = protocol::encode(protocol::opcode::WINSIZE, &payload);
            let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(dst) };
            let _ = write(fd, &frame);
        }
        _ => {}
    }
}

/// Where a [`ResizeForwarder`] should push window-size updates: a local pty
/// master via direct ioctl, or a remote input pipe as a `WS` control frame.
pub enum ResizeMode {
    Direct(RawFd),
    Frame(RawFd),
}

/// Scoped window-resize forwarder. Installs a `SIGWINCH` handler on
/// construction that pushes `src`'s current window size to the configured
/// target every time it changes, applies the current size once immediately
/// (so a resize that happened before the loop started isn't missed), and
/// restores whatever handler was previously installed on drop.
pub struct ResizeForwarder {
    prev: SigAction,
}

impl ResizeForwarder {
    pub fn install(src: RawFd, mode: ResizeMode) -> anyhow::Result<Self> {
        let (rmode, dst) = match mode {
            ResizeMode::Direct(fd) => (1, fd),
            ResizeMode::Frame(fd) => (2, fd),
        };
        RESIZE_SRC_FD.store(src, Ordering::SeqCst);
        RESIZE_DST_FD.store(dst, Ordering::SeqCst);
        RESIZE_MODE.store(rmode, Ordering::SeqCst);

        let action =
            SigAction::new(SigHandler::Handler(handle_sigwinch), SaFlags::SA_RESTART, SigSet::empty());
        // Safety: handle_sigwinch only touches the statics above and does
        // plain ioctl/write syscalls.
        let prev = unsafe { signal::sigaction(Signal::SIGWINCH, &action) }
            .context("installing SIGWINCH handler")?;

        handle_sigwinch(0);

        Ok(ResizeForwarder { prev })
    }
}

impl Drop for ResizeForwarder {
    fn drop(&mut self) {
        RESIZE_MODE.store(0, Ordering::SeqCst);
        // Safety: restoring the previously installed handler is always valid.
        if let Err(e) = unsafe { signal::sigaction(Signal::SIGWINCH, &self.prev) } {
            error!("error restoring SIGWINCH handler: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tty_tests {
    use super::*;

    #[test]
    fn size_round_trips_through_a_pty() {
        use nix::pty::openpty;

        let pty = openpty(None, None).expect("openpty");
        let size = Size { rows: 40, cols: 120 };
        size.set_fd(pty.master.as_raw_fd()).unwrap();
        let got = Size::from_fd(pty.master.as_raw_fd()).unwrap();
        assert_eq!(got.rows, 40);
        assert_eq!(got.cols, 120);
    }
}
