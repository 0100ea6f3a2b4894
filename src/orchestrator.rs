use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::{AssessConfig, Config, ConfigError, Mode};
use crate::hooks::HookHandler;
use crate::report;
use crate::report::types::{AssessmentReport, Category, ExecutionStatus};
use crate::runner::executor::Executor;
use crate::runner::RunnerRegistry;

/// Ties a registry, a configuration and a target together.
///
/// The registry is injected rather than looked up, so callers decide whether
/// to share the process-wide one or build their own.
pub struct Orchestrator {
    registry: Arc<RunnerRegistry>,
    config: Config,
    target: PathBuf,
}

impl Orchestrator {
    pub fn new(registry: Arc<RunnerRegistry>, config: Config, target: &Path) -> Self {
        Self {
            registry,
            config,
            target: target.to_path_buf(),
        }
    }

    /// Run every configured category and build the report.
    pub async fn assess(&self, cancel: &CancellationToken) -> Result<AssessmentReport, ConfigError> {
        self.assess_with(self.config.assess.clone(), cancel).await
    }

    #[instrument(skip_all, fields(target = %self.target.display(), mode = %assess.mode))]
    async fn assess_with(&self, assess: AssessConfig, cancel: &CancellationToken) -> Result<AssessmentReport, ConfigError> {
        let mode = assess.mode;
        let executor = Executor::new(&self.registry, assess)?;
        info!(workers = executor.worker_count(), "starting assessment");
        let outcome = executor.execute(&self.target, cancel).await;
        let built = report::build(outcome, &self.target, mode, &self.config.health.weights);
        info!(
            total_issues = built.summary.total_issues,
            health = built.summary.overall_health,
            "assessment complete"
        );
        Ok(built)
    }

    /// Settings for one internal hook command, or None if it is not one.
    fn hook_config(&self, command: &str, args: &[String]) -> Option<AssessConfig> {
        let mut assess = self.config.assess.clone();
        match command {
            "assess" => {}
            // Validation never rewrites files, whatever the configured mode.
            "validate" => assess.mode = Mode::Check,
            "format" => assess.categories = vec![Category::Format],
            "lint" => assess.categories = vec![Category::Lint],
            "security" => assess.categories = vec![Category::Security],
            "dependencies" => assess.categories = vec![Category::Dependencies],
            _ => return None,
        }
        if args.iter().any(|a| a == "--fix") && command != "validate" {
            assess.mode = Mode::Fix;
        }
        Some(assess)
    }
}

#[async_trait]
impl HookHandler for Orchestrator {
    async fn handle(&self, command: &str, args: &[String], cancel: &CancellationToken) -> Result<(), String> {
        let assess = self
            .hook_config(command, args)
            .ok_or_else(|| format!("unknown internal command '{command}'"))?;
        let fail_on = assess.fail_on;
        let built = self.assess_with(assess, cancel).await.map_err(|e| e.to_string())?;

        let errored: Vec<String> = built
            .categories
            .values()
            .filter(|r| r.status == ExecutionStatus::Error)
            .map(|r| format!("{}: {}", r.category, r.error.as_deref().unwrap_or("failed")))
            .collect();
        if !errored.is_empty() {
            return Err(errored.join("; "));
        }
        if report::should_fail(&built, fail_on) {
            return Err(format!(
                "{} issues, highest severity {}",
                built.summary.total_issues,
                built.summary.highest_severity.map_or("none".to_string(), |s| s.to_string())
            ));
        }
        Ok(())
    }
}
