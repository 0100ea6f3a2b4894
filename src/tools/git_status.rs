use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_command, ToolCommand};
use super::{ToolAdapter, ToolContext, ToolError};
use crate::detect;
use crate::report::types::{Category, Issue, Severity, REPOSITORY_SENTINEL};

pub const SUB_CATEGORY: &str = "repo:git-status";

/// Flags uncommitted changes in the working tree as one repository-wide issue.
pub struct GitStatusAdapter {
    target: PathBuf,
    /// Directories searched for the tool binary; `PATH` when unset
    search_path: Option<OsString>,
}

impl GitStatusAdapter {
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
        ToolCommand::new("git", &ctx.target).args(["status", "--porcelain"])
    }
}

pub fn parse_porcelain(stdout: &str) -> Option<Issue> {
    let changed = stdout.lines().filter(|l| !l.trim().is_empty()).count();
    if changed == 0 {
        return None;
    }
    let noun = if changed == 1 { "path" } else { "paths" };
    Some(Issue::new(
        REPOSITORY_SENTINEL,
        Severity::Low,
        Category::StaticAnalysis,
        SUB_CATEGORY,
        format!("Working tree has {changed} uncommitted {noun}"),
    ))
}

#[async_trait]
impl ToolAdapter for GitStatusAdapter {
    fn name(&self) -> &str {
        "git-status"
    }

    fn is_available(&self) -> bool {
        detect::find_git_root(&self.target).is_some() && detect::binary_available("git", self.search_path.as_deref())
    }

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
        let output = run_command(&self.command(ctx), self.name(), ctx.timeout, &ctx.cancel).await?;
        if !output.success() {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message: output.tail(5),
            });
        }
        Ok(parse_porcelain(&output.stdout).into_iter().collect())
    }

    fn commands(&self, ctx: &ToolContext) -> Vec<String> {
        vec![self.command(ctx).to_string()]
    }

    fn estimated_time(&self) -> Duration {
        Duration::from_secs(2)
    }
}
