use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_command, ToolCommand};
use super::suppressions::{self, SourceKind};
use super::{SeverityTable, SuppressingAdapter, ToolAdapter, ToolContext, ToolError};
use crate::config::Mode;
use crate::detect;
use crate::report::types::{Category, Issue, Severity, Suppression, REPOSITORY_SENTINEL};

const SEVERITIES: SeverityTable = SeverityTable::new(&[
    ("fatal", Severity::Critical),
    ("error", Severity::High),
    ("warning", Severity::Medium),
    ("information", Severity::Low),
    ("hint", Severity::Info),
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Lint,
    Format,
}

impl Subcommand {
    fn as_str(&self) -> &'static str {
        match self {
            Subcommand::Lint => "lint",
            Subcommand::Format => "format",
        }
    }
}

/// Biome wrapper; one instance per subcommand.
pub struct BiomeAdapter {
    target: PathBuf,
    /// Directories searched for the tool binary; `PATH` when unset
    search_path: Option<OsString>,
    subcommand: Subcommand,
}

impl BiomeAdapter {
    pub fn lint(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            search_path: None,
            subcommand: Subcommand::Lint,
        }
    }

    pub fn format(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            search_path: None,
            subcommand: Subcommand::Format,
        }
    }

    #[cfg(test)]
    pub fn with_search_path(mut self, dirs: impl Into<OsString>) -> Self {
        self.search_path = Some(dirs.into());
        self
    }

    pub fn sub_category(&self) -> &'static str {
        match self.subcommand {
            Subcommand::Lint => "js:biome-lint",
            Subcommand::Format => "js:biome-format",
        }
    }

    fn category(&self) -> Category {
        match self.subcommand {
            Subcommand::Lint => Category::Lint,
            Subcommand::Format => Category::Format,
        }
    }

    fn command(&self, ctx: &ToolContext) -> ToolCommand {
        let cmd = ToolCommand::new("biome", &ctx.target).args([self.subcommand.as_str(), "--reporter=json"]);
        let cmd = match ctx.mode {
            Mode::Fix => cmd.arg("--write"),
            _ => cmd,
        };
        cmd.arg(".")
    }

    /// Parse Biome's JSON reporter output. Accepts a report object with a
    /// `diagnostics` array, or one diagnostic object per line.
    pub fn parse_output(&self, ctx: &ToolContext, stdout: &str) -> Result<Vec<Issue>, ToolError> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let diagnostics = match serde_json::from_str::<Report>(trimmed) {
            Ok(report) => report.diagnostics,
            Err(_) => trimmed
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(serde_json::from_str::<BiomeDiagnostic>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ToolError::parse("biome", format!("not a JSON report or diagnostic stream: {e}")))?,
        };

        Ok(diagnostics
            .into_iter()
            .map(|diag| self.to_issue(ctx, diag))
            .collect())
    }

    fn to_issue(&self, ctx: &ToolContext, diag: BiomeDiagnostic) -> Issue {
        let location = diag.location.unwrap_or_default();
        let file = location
            .path
            .map(|p| ctx.relative_path(p.as_str()))
            .unwrap_or_else(|| REPOSITORY_SENTINEL.to_string());
        let mut message = diag
            .description
            .or_else(|| diag.message.map(|m| m.text()))
            .unwrap_or_else(|| "biome diagnostic".to_string());
        if let Some(category) = &diag.category {
            message = format!("{message} [{category}]");
        }

        let (line, column) = location.start.map_or((None, None), |s| (Some(s.line), s.column));
        // Formatting differences are always fixable by `biome format --write`.
        let fixable = self.subcommand == Subcommand::Format || diag.tags.iter().any(|t| t == "fixable");

        let mut issue = Issue::new(
            file,
            SEVERITIES.lookup(diag.severity.as_deref().unwrap_or_default()),
            self.category(),
            self.sub_category(),
            message,
        )
        .at(line, column)
        .fixable(fixable);
        if fixable {
            issue = issue.estimate(Duration::from_secs(30));
        }
        issue
    }
}

#[derive(Debug, Deserialize)]
struct Report {
    diagnostics: Vec<BiomeDiagnostic>,
}

#[derive(Debug, Deserialize)]
struct BiomeDiagnostic {
    severity: Option<String>,
    category: Option<String>,
    description: Option<String>,
    message: Option<MessageText>,
    location: Option<Location>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageText {
    Plain(String),
    Markup(Vec<MarkupNode>),
}

#[derive(Debug, Deserialize)]
struct MarkupNode {
    content: String,
}

impl MessageText {
    fn text(self) -> String {
        match self {
            MessageText::Plain(text) => text,
            MessageText::Markup(nodes) => nodes.into_iter().map(|n| n.content).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    path: Option<LocationPath>,
    start: Option<Position>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationPath {
    Plain(String),
    File { file: String },
}

impl LocationPath {
    fn as_str(&self) -> &str {
        match self {
            LocationPath::Plain(path) | LocationPath::File { file: path } => path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
    column: Option<u32>,
}

#[async_trait]
impl ToolAdapter for BiomeAdapter {
    fn name(&self) -> &str {
        self.sub_category()
    }

    fn is_available(&self) -> bool {
        detect::is_js_project(&self.target) && detect::binary_available("biome", self.search_path.as_deref())
    }

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
        let output = run_command(&self.command(ctx), "biome", ctx.timeout, &ctx.cancel).await?;
        let issues = self.parse_output(ctx, &output.stdout)?;
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
        match self.subcommand {
            Subcommand::Lint => Duration::from_secs(20),
            Subcommand::Format => Duration::from_secs(10),
        }
    }

    fn as_suppressing(&self) -> Option<&dyn SuppressingAdapter> {
        match self.subcommand {
            Subcommand::Lint => Some(self),
            Subcommand::Format => None,
        }
    }
}

#[async_trait]
impl SuppressingAdapter for BiomeAdapter {
    async fn run_with_suppressions(&self, ctx: &ToolContext) -> Result<(Vec<Issue>, Vec<Suppression>), ToolError> {
        let issues = self.run(ctx).await?;
        let root = ctx.target.clone();
        let found = tokio::task::spawn_blocking(move || suppressions::scan(&root, SourceKind::JavaScript))
            .await
            .map_err(|e| ToolError::Failed {
                tool: self.name().to_string(),
                message: format!("suppression scan failed: {e}"),
            })?;
        Ok((issues, found))
    }
}
