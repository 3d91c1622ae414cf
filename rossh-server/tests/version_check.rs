//! The version-check step runs before any filesystem or daemon work, so it
//! is cheap to exercise as a real subprocess: feed a mismatched `-V` and
//! check the control frame that comes back on stdout.

use std::process::{Command, Stdio};

use anyhow::{Context, Result};

fn run_with_client_version(version: u32) -> Result<(i32, Vec<u8>)> {
    let output = Command::new(env!("CARGO_BIN_EXE_rossh-server"))
        .args(["-V", &version.to_string(), "-t", "version-check-test"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("running rossh-server")?;

    Ok((output.status.code().unwrap_or(-1), output.stdout))
}

#[test]
fn older_client_gets_server_update_flag() -> Result<()> {
    let (code, stdout) = run_with_client_version(rossh_protocol::VERSION_INDEX + 1)?;
    assert_eq!(code, 1);
    let frame = rossh_protocol::encode_fixed(rossh_protocol::opcode::SERVER_UPDATE);
    assert_eq!(stdout, frame);
    Ok(())
}

#[test]
fn newer_client_is_fatal() -> Result<()> {
    if rossh_protocol::VERSION_INDEX == 0 {
        // nothing smaller than 0 to probe this branch with
        return Ok(());
    }
    let (code, stdout) = run_with_client_version(rossh_protocol::VERSION_INDEX - 1)?;
    assert_eq!(code, 1);
    let frame = rossh_protocol::encode_fixed(rossh_protocol::opcode::CLIENT_TOO_OLD);
    assert_eq!(stdout, frame);
    Ok(())
}
