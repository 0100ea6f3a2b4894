use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_command, ToolCommand};
use super::suppressions::{self, SourceKind};
use super::{SeverityTable, SuppressingAdapter, ToolAdapter, ToolContext, ToolError};
use crate::config::Mode;
use crate::detect;
use crate::report::types::{Category, Issue, Severity, Suppression};

pub const SUB_CATEGORY: &str = "rust:clippy";

const SEVERITIES: SeverityTable = SeverityTable::new(&[
    ("error", Severity::High),
    ("warning", Severity::Medium),
    ("note", Severity::Low),
    ("help", Severity::Low),
]);

/// `cargo clippy` wrapper reading `--message-format=json` diagnostics.
pub struct ClippyAdapter {
    target: PathBuf,
    /// Directories searched for the tool binary; `PATH` when unset
    search_path: Option<OsString>,
}

impl ClippyAdapter {
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
        let cmd = ToolCommand::new("cargo", &ctx.target).args(["clippy", "--all-targets", "--message-format=json", "--quiet"]);
        match ctx.mode {
            Mode::Fix => cmd.args(["--fix", "--allow-dirty", "--allow-staged"]),
            _ => cmd,
        }
    }
}

/// One line of cargo's JSON stream.
#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: Option<String>,
    message: Option<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    message: String,
    level: String,
    code: Option<DiagnosticCode>,
    #[serde(default)]
    spans: Vec<Span>,
    #[serde(default)]
    children: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct Span {
    file_name: String,
    line_start: u32,
    column_start: u32,
    #[serde(default)]
    is_primary: bool,
    suggestion_applicability: Option<String>,
}

impl Diagnostic {
    fn machine_applicable(&self) -> bool {
        let here = self
            .spans
            .iter()
            .any(|s| s.suggestion_applicability.as_deref() == Some("MachineApplicable"));
        here || self.children.iter().any(Diagnostic::machine_applicable)
    }
}

/// Parse clippy's stdout. Accepted shapes, tried in order:
/// 1. newline-delimited cargo messages (`{"reason": ...}` per line)
/// 2. a single JSON array of cargo messages or bare diagnostics
pub fn parse_output(ctx: &ToolContext, stdout: &str) -> Result<Vec<Issue>, ToolError> {
    let diagnostics = parse_ndjson(stdout).or_else(|| parse_array(stdout)).ok_or_else(|| {
        ToolError::parse("clippy", "output is neither newline-delimited cargo messages nor a JSON array")
    })?;

    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    for diag in diagnostics {
        let Some(span) = diag.spans.iter().find(|s| s.is_primary).or_else(|| diag.spans.first()) else {
            // Summary lines such as "N warnings emitted" carry no span.
            continue;
        };
        let file = ctx.relative_path(&span.file_name);
        let key = (file.clone(), span.line_start, span.column_start, diag.message.clone());
        if !seen.insert(key) {
            continue;
        }

        let message = match &diag.code {
            Some(code) => format!("{} [{}]", diag.message, code.code),
            None => diag.message.clone(),
        };
        let severity = SEVERITIES.lookup(&diag.level);
        let fixable = diag.machine_applicable();
        let mut issue = Issue::new(file, severity, Category::Lint, SUB_CATEGORY, message)
            .at(Some(span.line_start), Some(span.column_start))
            .fixable(fixable);
        if fixable {
            issue = issue.estimate(Duration::from_secs(60));
        }
        issues.push(issue);
    }
    Ok(issues)
}

fn parse_ndjson(stdout: &str) -> Option<Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let msg: CargoMessage = serde_json::from_str(line).ok()?;
        msg.reason.as_ref()?;
        if msg.reason.as_deref() == Some("compiler-message") {
            diagnostics.extend(msg.message);
        }
    }
    Some(diagnostics)
}

fn parse_array(stdout: &str) -> Option<Vec<Diagnostic>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(stdout.trim()).ok()?;
    let mut diagnostics = Vec::new();
    for value in entries {
        // A wrapper carries "reason"; anything else must be a bare diagnostic.
        if value.get("reason").is_some() {
            let msg: CargoMessage = serde_json::from_value(value).ok()?;
            if msg.reason.as_deref() == Some("compiler-message") {
                diagnostics.extend(msg.message);
            }
        } else {
            diagnostics.push(serde_json::from_value(value).ok()?);
        }
    }
    Some(diagnostics)
}

#[async_trait]
impl ToolAdapter for ClippyAdapter {
    fn name(&self) -> &str {
        "clippy"
    }

    fn is_available(&self) -> bool {
        detect::is_rust_project(&self.target) && detect::binary_available("cargo", self.search_path.as_deref())
    }

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
        let output = run_command(&self.command(ctx), self.name(), ctx.timeout, &ctx.cancel).await?;
        let issues = parse_output(ctx, &output.stdout)?;
        // Non-zero exit with findings is the normal "lints fired" case.
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
        Duration::from_secs(90)
    }

    fn as_suppressing(&self) -> Option<&dyn SuppressingAdapter> {
        Some(self)
    }
}

#[async_trait]
impl SuppressingAdapter for ClippyAdapter {
    async fn run_with_suppressions(&self, ctx: &ToolContext) -> Result<(Vec<Issue>, Vec<Suppression>), ToolError> {
        let issues = self.run(ctx).await?;
        let root = ctx.target.clone();
        let found = tokio::task::spawn_blocking(move || suppressions::scan(&root, SourceKind::Rust))
            .await
            .map_err(|e| ToolError::Failed {
                tool: self.name().to_string(),
                message: format!("suppression scan failed: {e}"),
            })?;
        Ok((issues, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(Path::new("/work/repo"), Mode::Check)
    }

    const NDJSON: &str = r#"{"reason":"compiler-artifact","package_id":"x","target":{},"profile":{},"features":[],"filenames":[],"executable":null,"fresh":true}
{"reason":"compiler-message","package_id":"x","message":{"message":"used `unwrap()` on an `Option` value","level":"warning","code":{"code":"clippy::unwrap_used","explanation":null},"spans":[{"file_name":"src/main.rs","line_start":12,"column_start":5,"is_primary":true,"suggestion_applicability":null}],"children":[]}}
{"reason":"compiler-message","package_id":"x","message":{"message":"redundant clone","level":"warning","code":{"code":"clippy::redundant_clone"},"spans":[{"file_name":"/work/repo/src/lib.rs","line_start":3,"column_start":9,"is_primary":true}],"children":[{"message":"remove this","level":"help","spans":[{"file_name":"src/lib.rs","line_start":3,"column_start":9,"is_primary":true,"suggestion_applicability":"MachineApplicable"}],"children":[]}]}}
{"reason":"compiler-message","package_id":"x","message":{"message":"mismatched types","level":"error","code":{"code":"E0308"},"spans":[{"file_name":"src/lib.rs","line_start":8,"column_start":1,"is_primary":true}],"children":[]}}
{"reason":"compiler-message","package_id":"x","message":{"message":"2 warnings emitted","level":"warning","code":null,"spans":[],"children":[]}}
{"reason":"build-finished","success":false}
"#;

    #[test]
    fn test_parse_ndjson_stream() {
        let issues = parse_output(&ctx(), NDJSON).unwrap();
        assert_eq!(issues.len(), 3);

        assert_eq!(issues[0].file, "src/main.rs");
        assert_eq!(issues[0].line, Some(12));
        assert_eq!(issues[0].severity, Severity::Medium);
        assert!(issues[0].message.contains("clippy::unwrap_used"));
        assert!(!issues[0].auto_fixable);

        assert_eq!(issues[1].file, "src/lib.rs");
        assert!(issues[1].auto_fixable);

        assert_eq!(issues[2].severity, Severity::High);
        assert!(issues.iter().all(|i| i.sub_category == SUB_CATEGORY && i.category == Category::Lint));
    }

    #[test]
    fn test_duplicate_diagnostics_are_collapsed() {
        let line = NDJSON.lines().nth(1).unwrap();
        let doubled = format!("{line}\n{line}\n");
        assert_eq!(parse_output(&ctx(), &doubled).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_json_array_of_bare_diagnostics() {
        let stdout = r#"[{"message":"this looks like a bug","level":"error","code":{"code":"clippy::eq_op"},"spans":[{"file_name":"src/a.rs","line_start":1,"column_start":2,"is_primary":true}]}]"#;
        let issues = parse_output(&ctx(), stdout).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_empty_output_is_clean() {
        assert!(parse_output(&ctx(), "").unwrap().is_empty());
    }

    #[test]
    fn test_unrecognized_output_fails_closed() {
        let err = parse_output(&ctx(), "error: could not compile `x`").unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }

    #[test]
    fn test_unknown_level_maps_to_medium() {
        assert_eq!(SEVERITIES.lookup("failure-note"), Severity::Medium);
        assert_eq!(SEVERITIES.lookup("error"), Severity::High);
    }

    #[test]
    fn test_fix_mode_adds_fix_flags() {
        let adapter = ClippyAdapter::new(Path::new("."));
        let fix = ToolContext::new(Path::new("."), Mode::Fix);
        assert!(adapter.commands(&fix)[0].contains("--fix"));
        assert!(!adapter.commands(&ctx())[0].contains("--fix"));
    }

    #[test]
    fn test_unavailable_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!ClippyAdapter::new(dir.path()).is_available());
    }
}
