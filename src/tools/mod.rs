pub mod biome;
pub mod cargo_deny;
pub mod clippy;
pub mod git_status;
pub mod process;
pub mod rustfmt;
pub mod suppressions;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AssessConfig, Mode};
use crate::report::types::{Category, Issue, Severity, Suppression};
use crate::runner::{AssessmentResult, AssessmentRunner, RunnerError, RunnerRegistry};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found. Please install it first.")]
    NotFound { tool: String },

    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    #[error("Failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },

    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn parse(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::Parse {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything an adapter needs for one invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub target: PathBuf,
    pub mode: Mode,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(target: &Path, mode: Mode) -> Self {
        Self {
            target: target.to_path_buf(),
            mode,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Express a tool-reported path relative to the target when possible.
    pub fn relative_path(&self, raw: &str) -> String {
        let path = Path::new(raw);
        let relative = path
            .strip_prefix(&self.target)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| raw.to_string());
        relative.strip_prefix("./").map(str::to_string).unwrap_or(relative)
    }
}

/// Wrapper around one external tool.
///
/// `run` must translate a "findings present" exit code into issues; only
/// execution failures (missing binary, malformed output, timeout) are errors.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap probe: PATH lookup and manifest checks only, never a subprocess.
    fn is_available(&self) -> bool;

    async fn run(&self, ctx: &ToolContext) -> Result<Vec<Issue>, ToolError>;

    /// Command lines `run` will execute, for report metadata.
    fn commands(&self, _ctx: &ToolContext) -> Vec<String> {
        Vec::new()
    }

    /// Expected wall time of `run`, used for dispatch ordering.
    fn estimated_time(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Adapters that also report inline suppressions return themselves here.
    fn as_suppressing(&self) -> Option<&dyn SuppressingAdapter> {
        None
    }
}

/// Extended contract for adapters that track suppressions.
#[async_trait]
pub trait SuppressingAdapter: ToolAdapter {
    async fn run_with_suppressions(&self, ctx: &ToolContext) -> Result<(Vec<Issue>, Vec<Suppression>), ToolError>;
}

/// Tool vocabulary → canonical severity. Unknown strings map to medium.
#[derive(Debug, Clone, Copy)]
pub struct SeverityTable {
    entries: &'static [(&'static str, Severity)],
}

impl SeverityTable {
    pub const fn new(entries: &'static [(&'static str, Severity)]) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, raw: &str) -> Severity {
        let raw = raw.trim();
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
            .map(|(_, severity)| *severity)
            .unwrap_or(Severity::Medium)
    }
}

/// An [`AssessmentRunner`] made of the adapters covering one category.
pub struct ToolRunner {
    category: Category,
    priority: u32,
    parallelizable: bool,
    adapters: Vec<Arc<dyn ToolAdapter>>,
}

impl ToolRunner {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            priority: category.default_priority(),
            parallelizable: category.default_parallelizable(),
            adapters: Vec::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn available_adapters(&self) -> impl Iterator<Item = &Arc<dyn ToolAdapter>> {
        self.adapters.iter().filter(|adapter| {
            let available = adapter.is_available();
            if !available {
                info!(tool = adapter.name(), category = %self.category, "tool unavailable, skipping");
            }
            available
        })
    }
}

#[async_trait]
impl AssessmentRunner for ToolRunner {
    fn category(&self) -> Category {
        self.category
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_run_in_parallel(&self) -> bool {
        self.parallelizable
    }

    fn estimated_time(&self, _target: &Path) -> Duration {
        self.adapters.iter().map(|a| a.estimated_time()).sum()
    }

    fn is_available(&self) -> bool {
        self.adapters.iter().any(|a| a.is_available())
    }

    async fn assess(
        &self,
        target: &Path,
        config: &AssessConfig,
        cancel: &CancellationToken,
    ) -> Result<AssessmentResult, RunnerError> {
        let ctx = ToolContext {
            target: target.to_path_buf(),
            mode: config.mode,
            timeout: config.timeout_for(self.category),
            cancel: cancel.clone(),
        };

        let mut result = AssessmentResult::default();
        let mut failures = Vec::new();

        for adapter in self.available_adapters() {
            if cancel.is_cancelled() {
                return Err(RunnerError::Tool(ToolError::Cancelled {
                    tool: adapter.name().to_string(),
                }));
            }

            let started = Instant::now();
            result.commands.extend(adapter.commands(&ctx));
            let outcome = match adapter.as_suppressing() {
                Some(suppressing) => suppressing.run_with_suppressions(&ctx).await,
                None => adapter.run(&ctx).await.map(|issues| (issues, Vec::new())),
            };

            match outcome {
                Ok((issues, suppressions)) => {
                    debug!(
                        tool = adapter.name(),
                        issues = issues.len(),
                        suppressions = suppressions.len(),
                        elapsed = ?started.elapsed(),
                        "tool finished"
                    );
                    result.issues.extend(issues);
                    result.suppressions.extend(suppressions);
                }
                Err(err @ (ToolError::Cancelled { .. } | ToolError::Timeout { .. })) => {
                    return Err(RunnerError::Tool(err));
                }
                Err(err) => {
                    warn!(tool = adapter.name(), error = %err, "tool failed");
                    failures.push(err.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(result)
        } else {
            Err(RunnerError::Failed(failures.join("; ")))
        }
    }
}

/// Build a registry holding the built-in adapters for `target`.
pub fn default_registry(target: &Path) -> RunnerRegistry {
    let registry = RunnerRegistry::new();
    register_defaults(&registry, target);
    registry
}

/// Register the built-in category runners into an existing registry.
pub fn register_defaults(registry: &RunnerRegistry, target: &Path) {
    registry.register_runner(
        Category::Format,
        Arc::new(
            ToolRunner::new(Category::Format)
                .with_adapter(Arc::new(rustfmt::RustfmtAdapter::new(target)))
                .with_adapter(Arc::new(biome::BiomeAdapter::format(target))),
        ),
    );
    registry.register_runner(
        Category::Lint,
        Arc::new(
            ToolRunner::new(Category::Lint)
                .with_adapter(Arc::new(clippy::ClippyAdapter::new(target)))
                .with_adapter(Arc::new(biome::BiomeAdapter::lint(target))),
        ),
    );
    registry.register_runner(
        Category::Security,
        Arc::new(ToolRunner::new(Category::Security).with_adapter(Arc::new(cargo_deny::CargoDenyAdapter::new(target)))),
    );
    registry.register_runner(
        Category::StaticAnalysis,
        Arc::new(
            ToolRunner::new(Category::StaticAnalysis).with_adapter(Arc::new(git_status::GitStatusAdapter::new(target))),
        ),
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter returning canned results, for runner and executor tests.
    pub struct FakeAdapter {
        pub name: &'static str,
        pub available: bool,
        pub result: Result<Vec<Issue>, &'static str>,
        pub suppressions: Option<Vec<Suppression>>,
        pub calls: AtomicUsize,
    }

    impl FakeAdapter {
        pub fn ok(name: &'static str, issues: Vec<Issue>) -> Self {
            Self {
                name,
                available: true,
                result: Ok(issues),
                suppressions: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &'static str, message: &'static str) -> Self {
            Self { result: Err(message), ..Self::ok(name, vec![]) }
        }
    }

    #[async_trait]
    impl ToolAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn run(&self, _ctx: &ToolContext) -> Result<Vec<Issue>, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|message| ToolError::Failed {
                tool: self.name.to_string(),
                message: message.to_string(),
            })
        }

        fn commands(&self, _ctx: &ToolContext) -> Vec<String> {
            vec![format!("{} --check", self.name)]
        }

        fn as_suppressing(&self) -> Option<&dyn SuppressingAdapter> {
            self.suppressions.as_ref().map(|_| self as &dyn SuppressingAdapter)
        }
    }

    #[async_trait]
    impl SuppressingAdapter for FakeAdapter {
        async fn run_with_suppressions(&self, ctx: &ToolContext) -> Result<(Vec<Issue>, Vec<Suppression>), ToolError> {
            let issues = self.run(ctx).await?;
            Ok((issues, self.suppressions.clone().unwrap_or_default()))
        }
    }

    fn issue(file: &str) -> Issue {
        Issue::new(file, Severity::Medium, Category::Lint, "test:fake", "finding")
    }

    #[test]
    fn test_severity_table_defaults_to_medium() {
        const TABLE: SeverityTable = SeverityTable::new(&[("error", Severity::High), ("note", Severity::Low)]);
        assert_eq!(TABLE.lookup("ERROR"), Severity::High);
        assert_eq!(TABLE.lookup(" note "), Severity::Low);
        assert_eq!(TABLE.lookup("catastrophic"), Severity::Medium);
        assert_eq!(TABLE.lookup(""), Severity::Medium);
    }

    #[test]
    fn test_relative_path() {
        let ctx = ToolContext::new(Path::new("/repo"), Mode::Check);
        assert_eq!(ctx.relative_path("/repo/src/main.rs"), "src/main.rs");
        assert_eq!(ctx.relative_path("./src/lib.rs"), "src/lib.rs");
        assert_eq!(ctx.relative_path("/elsewhere/x.rs"), "/elsewhere/x.rs");
    }

    #[tokio::test]
    async fn test_tool_runner_merges_adapters() {
        let runner = ToolRunner::new(Category::Lint)
            .with_adapter(Arc::new(FakeAdapter::ok("one", vec![issue("a.rs")])))
            .with_adapter(Arc::new(FakeAdapter::ok("two", vec![issue("b.rs"), issue("c.rs")])));
        let result = runner
            .assess(Path::new("."), &AssessConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.issues.len(), 3);
        assert_eq!(result.commands, vec!["one --check".to_string(), "two --check".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_runner_skips_unavailable_adapters() {
        let missing = Arc::new(FakeAdapter { available: false, ..FakeAdapter::ok("missing", vec![issue("x.rs")]) });
        let runner = ToolRunner::new(Category::Lint)
            .with_adapter(missing.clone())
            .with_adapter(Arc::new(FakeAdapter::ok("present", vec![])));
        assert!(runner.is_available());
        let result = runner
            .assess(Path::new("."), &AssessConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.issues.is_empty());
        assert_eq!(missing.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tool_runner_reports_failures() {
        let runner = ToolRunner::new(Category::Lint)
            .with_adapter(Arc::new(FakeAdapter::ok("good", vec![issue("a.rs")])))
            .with_adapter(Arc::new(FakeAdapter::failing("bad", "malformed output")));
        let err = runner
            .assess(Path::new("."), &AssessConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad failed: malformed output"));
    }

    #[tokio::test]
    async fn test_tool_runner_collects_suppressions() {
        let adapter = FakeAdapter {
            suppressions: Some(vec![Suppression {
                file: "src/lib.rs".to_string(),
                line: Some(1),
                rule: "clippy::all".to_string(),
                tool: "rust:clippy".to_string(),
                reason: None,
            }]),
            ..FakeAdapter::ok("suppressing", vec![])
        };
        let runner = ToolRunner::new(Category::Lint).with_adapter(Arc::new(adapter));
        let result = runner
            .assess(Path::new("."), &AssessConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.suppressions.len(), 1);
    }

    #[test]
    fn test_runner_unavailable_without_adapters() {
        let runner = ToolRunner::new(Category::Performance);
        assert!(!runner.is_available());
        assert_eq!(runner.priority(), Category::Performance.default_priority());
    }

    #[test]
    fn test_default_registry_covers_builtin_categories() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(dir.path());
        assert_eq!(
            registry.get_all_categories(),
            vec![Category::Format, Category::Lint, Category::Security, Category::StaticAnalysis]
        );
        // An empty directory has no manifests and no .git, so nothing is runnable.
        assert!(registry.get_available_categories().is_empty());
    }

    #[test]
    fn test_manifest_without_binary_is_unavailable() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        std::fs::write(project.path().join("package.json"), "{}").unwrap();
        let empty_bin = tempfile::tempdir().unwrap();
        let dirs = empty_bin.path().as_os_str();

        assert!(!clippy::ClippyAdapter::new(project.path()).with_search_path(dirs).is_available());
        assert!(!rustfmt::RustfmtAdapter::new(project.path()).with_search_path(dirs).is_available());
        assert!(!cargo_deny::CargoDenyAdapter::new(project.path()).with_search_path(dirs).is_available());
        assert!(!biome::BiomeAdapter::lint(project.path()).with_search_path(dirs).is_available());
    }

    #[cfg(unix)]
    #[test]
    fn test_manifest_with_binary_is_available() {
        use std::os::unix::fs::PermissionsExt;
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        let bin = tempfile::tempdir().unwrap();
        let tool = bin.path().join("cargo-deny");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let adapter = cargo_deny::CargoDenyAdapter::new(project.path()).with_search_path(bin.path().as_os_str());
        assert!(adapter.is_available());
    }
}
