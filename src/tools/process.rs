//! Subprocess execution for tool adapters.
//!
//! Every invocation runs under the caller's cancellation token and an optional
//! timeout. Children are spawned with `kill_on_drop`, so dropping the future
//! (timeout, cancellation, or an outer deadline dropping the whole category
//! task) kills the process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ToolError;

/// A command line to run for a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// None when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, trimmed; used for error messages.
    pub fn merged_output(&self) -> String {
        let mut merged = String::new();
        if !self.stdout.trim().is_empty() {
            merged.push_str(self.stdout.trim());
        }
        if !self.stderr.trim().is_empty() {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str(self.stderr.trim());
        }
        merged
    }

    /// Last few lines of the merged output, for compact error messages.
    pub fn tail(&self, lines: usize) -> String {
        let merged = self.merged_output();
        let all: Vec<&str> = merged.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Run a tool command to completion.
///
/// A non-zero exit code is NOT an error here: linters and scanners signal
/// "findings present" that way. Callers decide what a code means.
pub async fn run_command(
    command: &ToolCommand,
    tool: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    debug!(tool, command = %command, cwd = %command.cwd.display(), "running tool");

    let child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound { tool: tool.to_string() }
            } else {
                ToolError::Spawn { tool: tool.to_string(), source }
            }
        })?;

    let wait = child.wait_with_output();
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(ToolError::Cancelled { tool: tool.to_string() });
        }
        result = with_timeout(timeout, wait) => match result {
            Some(output) => output?,
            None => {
                let after = timeout.unwrap_or_default();
                warn!(tool, after = ?after, "tool timed out");
                return Err(ToolError::Timeout { tool: tool.to_string(), after });
            }
        },
    };

    let output = ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(tool, code = ?output.code, stdout_bytes = output.stdout.len(), stderr_bytes = output.stderr.len(), "tool finished");
    Ok(output)
}

/// Await `fut`, giving up after `timeout` when one is set.
pub async fn with_timeout<F: std::future::Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
