//! Invocation of external tools.
//!
//! Every collaborator outside this crate (crypto toolchain, datastore client,
//! admin tool) is a command whose only contract is its exit status. A
//! non-zero exit becomes `ToolFailed` carrying the tool's stderr.

use std::io::Write;
use std::process::{Command, ExitStatus, Output, Stdio};

use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Run `cmd` to completion; stdout is discarded, stderr is captured for errors.
pub fn run_checked(cmd: &mut Command, tool: &str) -> Result<()> {
    debug!(tool, command = ?cmd, "running");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let output = cmd.output().map_err(|e| spawn_error(tool, e))?;
    check_output(tool, &output)
}

/// Run `cmd`, feeding `input` on stdin (e.g. a SQL batch).
pub fn run_with_stdin(cmd: &mut Command, tool: &str, input: &[u8]) -> Result<()> {
    debug!(tool, command = ?cmd, bytes = input.len(), "running with stdin");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A tool that exits early closes the pipe; its exit status is the
        // error worth reporting, not EPIPE.
        if let Err(e) = stdin.write_all(input) {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
    }

    let output = child.wait_with_output()?;
    check_output(tool, &output)
}

/// True if `cmd` exits zero. All output is discarded; spawn failures count as
/// "not yet".
pub fn succeeds(cmd: &mut Command) -> bool {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.status().map(|s| s.success()).unwrap_or(false)
}

fn check_output(tool: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(ProvisionError::ToolFailed {
        tool: tool.to_string(),
        status: describe_status(output.status),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn spawn_error(tool: &str, e: std::io::Error) -> ProvisionError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProvisionError::ToolNotFound(tool.to_string())
    } else {
        ProvisionError::Io(e)
    }
}

pub fn describe_status(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("killed by signal {sig}"),
        (None, None) => "unknown status".to_string(),
    }
}
