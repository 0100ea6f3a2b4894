use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_command, ToolCommand};
use super::{SeverityTable, ToolAdapter, ToolContext, ToolError};
use crate::detect;
use crate::report::types::{Category, Issue, Severity};

pub const SUB_CATEGORY: &str = "rust:cargo-deny";

/// Findings are reported against the lockfile; cargo-deny has no source spans
/// for advisories or bans.
const LOCKFILE: &str = "Cargo.lock";

const SEVERITIES: SeverityTable = SeverityTable::new(&[
    ("error", Severity::High),
    ("warning", Severity::Medium),
    ("note", Severity::Low),
    ("help", Severity::Info),
]);

/// `cargo deny check` wrapper: advisories, bans, licenses and sources.
pub struct CargoDenyAdapter {
    target: PathBuf,
    /// Directories searched for the tool binary; `PATH` when unset
    search_path: Option<OsString>,
}

impl CargoDenyAdapter {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            search_path: None,
        }
    }

    #[cfg(test)]
    pub fn with_search_path(mut self, dirs: impl Into<OsString>) -> Self {
        self.search_path = Some(dirs.into());
        self
    }

    fn command(&self, ctx: &ToolContext) -> ToolCommand {
        ToolCommand::new("cargo", &ctx.target).args(["deny", "--format", "json", "check"])
    }
}

/// cargo-deny writes one JSON object per line to stderr. Diagnostics come
/// wrapped as `{"type":"diagnostic","fields":{...}}`; older versions emit the
/// fields object directly.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    fields: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DenyDiagnostic {
    severity: String,
    message: String,
    code: Option<String>,
}

pub fn parse_output(stderr: &str) -> Result<Vec<Issue>, ToolError> {
    let mut issues = Vec::new();
    for line in stderr.lines().map(str::trim).filter(|l| l.starts_with('{')) {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ToolError::parse("cargo-deny", format!("invalid JSON line: {e}")))?;

        let fields = if value.get("type").is_some() {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|e| ToolError::parse("cargo-deny", format!("invalid envelope: {e}")))?;
            if envelope.kind != "diagnostic" {
                // Summary and log records.
                continue;
            }
            envelope.fields
        } else {
            value
        };

        let diag: DenyDiagnostic = serde_json::from_value(fields)
            .map_err(|e| ToolError::parse("cargo-deny", format!("invalid diagnostic: {e}")))?;
        let message = match &diag.code {
            Some(code) => format!("{} [{}]", diag.message, code),
            None => diag.message,
        };
        issues.push(Issue::new(LOCKFILE, SEVERITIES.lookup(&diag.severity), Category::Security, SUB_CATEGORY, message));
    }
    Ok(issues)
}

#[async_trait]
impl ToolAdapter for CargoDenyAdapter {
    fn name(&self) -> &str {
        "cargo-deny"
    }

    fn is_available(&self) -> bool {
        detect::is_rust_project(&self.target) && detect::binary_available("cargo-deny", self.search_path.as_deref())
    }

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
        let output = run_command(&self.command(ctx), self.name(), ctx.timeout, &ctx.cancel).await?;
        let issues = parse_output(&output.stderr)?;
        if !output.success() && issues.is_empty() {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message: output.tail(5),
            });
        }
        Ok(issues)
    }

    fn commands(&self, ctx: &ToolContext) -> Vec<String> {
        vec![self.command(ctx).to_string()]
    }

    fn estimated_time(&self) -> Duration {
        Duration::from_secs(45)
    }
}
