//! Hook command executor.
//!
//! Runs a prioritized list of commands one after another, stopping at the
//! first failure. Internal commands are handed to a [`HookHandler`] when one
//! is installed; everything else runs as an external process.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::tools::process::{run_command, with_timeout, ToolCommand};
use crate::tools::ToolError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Commands routed to the installed handler instead of spawned.
pub const INTERNAL_COMMANDS: &[&str] = &["assess", "format", "lint", "security", "dependencies", "validate"];

/// One `[[hooks]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HookEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Lower runs first; ties keep their configured order
    #[serde(default)]
    pub priority: i32,
    /// `30s`, `2m`, `1h`, `500ms` or bare seconds
    #[serde(default)]
    pub timeout: Option<String>,
    /// Command line tried when `command` fails
    #[serde(default)]
    pub fallback: Option<String>,
}

impl HookEntry {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            priority: 0,
            timeout: None,
            fallback: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        parse_timeout(self.timeout.as_deref())
    }

    pub fn is_internal(&self) -> bool {
        INTERNAL_COMMANDS.contains(&self.command.as_str())
    }
}

/// Parse a hook timeout. Missing or unparsable values fall back to two minutes.
pub fn parse_timeout(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return DEFAULT_TIMEOUT;
    };

    let (digits, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let Ok(value) = digits.parse::<u64>() else {
        return DEFAULT_TIMEOUT;
    };
    let secs = match unit.trim() {
        "" | "s" => Some(value),
        "ms" => return Duration::from_millis(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        _ => None,
    };
    secs.map_or(DEFAULT_TIMEOUT, Duration::from_secs)
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("hook '{command}' failed: {message}")]
    Failed { command: String, message: String },

    #[error("Failed to run hook '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: ToolError,
    },

    #[error("hook '{command}' handler error: {message}")]
    Handler { command: String, message: String },
}

/// Executes internal hook commands in-process.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, command: &str, args: &[String], cancel: &CancellationToken) -> Result<(), String>;
}

/// Record of one hook that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub command: String,
    pub elapsed: Duration,
    pub used_fallback: bool,
}

pub struct HookRunner {
    cwd: PathBuf,
    handler: Option<Arc<dyn HookHandler>>,
    cancel: CancellationToken,
}

impl HookRunner {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            handler: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn HookHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `entries` by ascending priority, stopping at the first hook that
    /// fails (after its fallback, if any, also fails).
    #[instrument(skip_all, fields(hooks = entries.len()))]
    pub async fn run(&self, entries: &[HookEntry]) -> Result<Vec<HookOutcome>, HookError> {
        let mut ordered: Vec<&HookEntry> = entries.iter().collect();
        ordered.sort_by_key(|entry| entry.priority);

        let mut completed = Vec::with_capacity(ordered.len());
        for entry in ordered {
            let started = Instant::now();
            let used_fallback = match self.run_entry(entry).await {
                Ok(()) => false,
                Err(err) => {
                    let Some(fallback) = entry.fallback.as_deref() else {
                        return Err(err);
                    };
                    warn!(command = %entry.command, error = %err, fallback, "hook failed, trying fallback");
                    self.run_fallback(fallback, entry.timeout()).await?;
                    true
                }
            };
            info!(command = %entry.command, elapsed = ?started.elapsed(), used_fallback, "hook finished");
            completed.push(HookOutcome {
                command: entry.command.clone(),
                elapsed: started.elapsed(),
                used_fallback,
            });
        }
        Ok(completed)
    }

    async fn run_entry(&self, entry: &HookEntry) -> Result<(), HookError> {
        let timeout = entry.timeout();
        if let (true, Some(handler)) = (entry.is_internal(), &self.handler) {
            return match with_timeout(Some(timeout), handler.handle(&entry.command, &entry.args, &self.cancel)).await {
                Some(Ok(())) => Ok(()),
                Some(Err(message)) => Err(HookError::Handler {
                    command: entry.command.clone(),
                    message,
                }),
                None => Err(HookError::Timeout {
                    command: entry.command.clone(),
                    after: timeout,
                }),
            };
        }

        let command = ToolCommand::new(entry.command.as_str(), &self.cwd).args(entry.args.iter().cloned());
        self.run_external(command, timeout).await
    }

    async fn run_fallback(&self, line: &str, timeout: Duration) -> Result<(), HookError> {
        let mut parts = line.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(HookError::Failed {
                command: line.to_string(),
                message: "empty fallback command".to_string(),
            });
        };
        self.run_external(ToolCommand::new(program, &self.cwd).args(parts), timeout).await
    }

    async fn run_external(&self, command: ToolCommand, timeout: Duration) -> Result<(), HookError> {
        let label = command.to_string();
        match run_command(&command, &command.program, Some(timeout), &self.cancel).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(HookError::Failed {
                message: match output.code {
                    Some(code) => format!("exit code {code}: {}", output.tail(5)),
                    None => format!("terminated by signal: {}", output.tail(5)),
                },
                command: label,
            }),
            Err(ToolError::Timeout { after, .. }) => Err(HookError::Timeout { command: label, after }),
            Err(source) => Err(HookError::Spawn { command: label, source }),
        }
    }
}
