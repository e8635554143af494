//! Process module.
//!
//! This module contains cross platform helpers around the
//! `std::process` crate, used to run compression hooks and prompt
//! commands.

use log::{debug, trace};
use std::{
    env,
    io::{self, prelude::*},
    process::{Command, Stdio},
    result,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot spawn process for command {1:?}")]
    SpawnProcessError(#[source] io::Error, String),
    #[error("cannot get standard input")]
    GetStdinError,
    #[error("cannot write data to standard input")]
    WriteStdinError(#[source] io::Error),
    #[error("cannot wait for command {1:?}")]
    WaitProcessError(#[source] io::Error, String),
    #[error("command {0:?} exited with status {1}: {2}")]
    ExitStatusError(String, i32, String),
}

pub type Result<T> = result::Result<T, Error>;

/// Runs the given shell command, feeding it the given input, and
/// returns its standard output. A non-zero exit status is an error.
pub fn run(cmd: &str, input: &[u8]) -> Result<Vec<u8>> {
    debug!("running command: {}", cmd);

    let windows = cfg!(target_os = "windows")
        && env::var("MSYSTEM")
            .map(|env| !env.starts_with("MINGW"))
            .unwrap_or_default();

    let mut child = if windows {
        Command::new("cmd")
            .args(["/C", cmd])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    } else {
        Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
    .map_err(|err| Error::SpawnProcessError(err, cmd.to_owned()))?;

    {
        // stdin is closed when dropped, so the child sees EOF
        let mut stdin = child.stdin.take().ok_or(Error::GetStdinError)?;
        if !input.is_empty() {
            stdin.write_all(input).map_err(Error::WriteStdinError)?;
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|err| Error::WaitProcessError(err, cmd.to_owned()))?;
    trace!("command output: {:?}", String::from_utf8_lossy(&output.stdout));

    if !output.status.success() {
        return Err(Error::ExitStatusError(
            cmd.to_owned(),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ));
    }

    Ok(output.stdout)
}
