use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_command, ToolCommand};
use super::{ToolAdapter, ToolContext, ToolError};
use crate::config::Mode;
use crate::detect;
use crate::report::types::{Category, Issue, Severity};

pub const SUB_CATEGORY: &str = "rust:rustfmt";

pub struct RustfmtAdapter {
    target: PathBuf,
    /// Directories searched for the tool binary; `PATH` when unset
    search_path: Option<OsString>,
}

impl RustfmtAdapter {
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
        let cmd = ToolCommand::new("cargo", &ctx.target).args(["fmt", "--all"]);
        match ctx.mode {
            Mode::Fix => cmd,
            _ => cmd.args(["--", "--check", "-l"]),
        }
    }
}

/// Parse `cargo fmt -- --check -l` output.
///
/// Recognizes `Diff in <path> at line N:` headers and bare `.rs` paths (the
/// `-l` listing). One issue per file, anchored at its first differing line.
pub fn parse_output(ctx: &ToolContext, stdout: &str) -> Result<Vec<Issue>, ToolError> {
    let mut files: BTreeMap<String, Option<u32>> = BTreeMap::new();
    let mut unrecognized = None;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((path, line_no)) = parse_diff_header(line) {
            let entry = files.entry(ctx.relative_path(path)).or_insert(Some(line_no));
            *entry = Some(entry.map_or(line_no, |l| l.min(line_no)));
        } else if line.ends_with(".rs") && !line.contains(char::is_whitespace) {
            files.entry(ctx.relative_path(line)).or_insert(None);
        } else if is_diff_body(line) {
            continue;
        } else {
            unrecognized.get_or_insert(line);
        }
    }

    if files.is_empty() {
        if let Some(line) = unrecognized {
            return Err(ToolError::parse("rustfmt", format!("unexpected output line: {line}")));
        }
    }

    Ok(files
        .into_iter()
        .map(|(file, line)| {
            Issue::new(file, Severity::Low, Category::Format, SUB_CATEGORY, "File is not formatted according to rustfmt")
                .at(line, None)
                .fixable(true)
                .estimate(Duration::from_secs(30))
        })
        .collect())
}

fn parse_diff_header(line: &str) -> Option<(&str, u32)> {
    let rest = line.strip_prefix("Diff in ")?;
    let (path, tail) = rest.rsplit_once(" at line ")?;
    let number = tail.trim_end_matches(':').trim().parse().ok()?;
    Some((path, number))
}

fn is_diff_body(line: &str) -> bool {
    line.starts_with('+') || line.starts_with('-') || line.starts_with(' ')
}

#[async_trait]
impl ToolAdapter for RustfmtAdapter {
    fn name(&self) -> &str {
        "rustfmt"
    }

    fn is_available(&self) -> bool {
        detect::is_rust_project(&self.target) && detect::binary_available("cargo", self.search_path.as_deref())
    }

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
        let output = run_command(&self.command(ctx), self.name(), ctx.timeout, &ctx.cancel).await?;
        if ctx.mode == Mode::Fix {
            if !output.success() {
                return Err(ToolError::Failed {
                    tool: self.name().to_string(),
                    message: output.tail(5),
                });
            }
            return Ok(Vec::new());
        }

        let issues = parse_output(ctx, &output.stdout)?;
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
        Duration::from_secs(10)
    }
}
