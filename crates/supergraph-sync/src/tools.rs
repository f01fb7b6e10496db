//! Running external command-line tools.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Why an external tool invocation failed.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("'{program}' timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("'{program}' exited with {status}: {}", .stderr.trim())]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Runs `program` with `args`, returning stdout on a zero exit status.
///
/// The child is killed if the timeout elapses.
pub async fn run_tool<S: AsRef<str>>(
    program: &str,
    args: &[S],
    timeout: Duration,
) -> Result<Vec<u8>, ToolError> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    debug!(program, args = ?args, "running tool");

    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ToolError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|e| ToolError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output.stdout)
}
