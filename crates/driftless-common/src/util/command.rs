//! Subprocess helpers for the CLIs the engine drives (`aws`, `helm`).

use std::{ffi::OsStr, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info};

use crate::error::{DriftError, DriftResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `program` to completion and captures its output. A non-zero exit
/// status becomes `FailedToRunCommand` carrying stderr.
pub async fn run_command<K, V>(
    program: &str,
    args: &[&str],
    envs: impl IntoIterator<Item = (K, V)>,
) -> DriftResult<CommandOutput>
where
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    debug!(command = %describe(program, args), "running command");
    let output = Command::new(program)
        .args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DriftError::FailedToRunCommand(format!("{program}: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(DriftError::FailedToRunCommand(format!(
            "`{}` exited with {}: {}",
            describe(program, args),
            output.status,
            stderr.trim()
        )));
    }
    Ok(CommandOutput { stdout, stderr })
}

/// Runs `program`, forwarding every output line to the log as it arrives.
pub async fn stream_command_output<K, V>(
    program: &str,
    args: &[&str],
    envs: impl IntoIterator<Item = (K, V)>,
) -> DriftResult<()>
where
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DriftError::FailedToRunCommand(format!("{program}: {e}")))?;

    let stdout = child.stdout.take().ok_or_else(|| {
        DriftError::FailedToRunCommand(format!("{program}: stdout was not captured"))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        DriftError::FailedToRunCommand(format!("{program}: stderr was not captured"))
    })?;

    let name = program.to_string();
    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(command = %name, "{}", line);
        }
    });
    let name = program.to_string();
    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(command = %name, "{}", line);
            tail.push(line);
        }
        tail
    });

    let status = child.wait().await?;
    let _ = stdout_handle.await;
    let tail = stderr_handle.await.unwrap_or_default();

    if !status.success() {
        let last = tail.last().cloned().unwrap_or_default();
        return Err(DriftError::FailedToRunCommand(format!(
            "`{}` exited with {}: {}",
            describe(program, args),
            status,
            last
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ENV: [(&str, &str); 0] = [];

    #[tokio::test]
    async fn captures_stdout() {
        let output = run_command("sh", &["-c", "echo hello"], NO_ENV).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn passes_environment() {
        let output = run_command("sh", &["-c", "echo $GREETING"], [("GREETING", "hi")])
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"], NO_ENV)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "{err}");
    }

    #[tokio::test]
    async fn streamed_failure_reports_last_line() {
        let err = stream_command_output("sh", &["-c", "echo first >&2; echo last >&2; exit 1"], NO_ENV)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("last"), "{err}");
    }
}
