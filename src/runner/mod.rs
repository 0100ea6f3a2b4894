pub mod executor;
pub mod filter;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AssessConfig;
use crate::report::types::{Category, Issue, Suppression};
use crate::tools::ToolError;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Failed(String),
}

/// Raw output of one category runner, before the executor wraps it into a
/// [`CategoryResult`](crate::report::types::CategoryResult).
#[derive(Debug, Clone, Default)]
pub struct AssessmentResult {
    pub issues: Vec<Issue>,
    pub suppressions: Vec<Suppression>,
    /// Command lines executed while assessing
    pub commands: Vec<String>,
}

/// Core trait that every category runner implements.
/// Runners must be Send + Sync: the executor runs them on spawned tasks.
#[async_trait]
pub trait AssessmentRunner: Send + Sync {
    fn category(&self) -> Category;

    /// Lower = run and report first
    fn priority(&self) -> u32 {
        self.category().default_priority()
    }

    /// Whether this category may overlap with other non-parallel categories
    fn can_run_in_parallel(&self) -> bool {
        self.category().default_parallelizable()
    }

    /// Expected wall time for `target`
    fn estimated_time(&self, target: &Path) -> Duration;

    /// Cheap availability probe; runs before scheduling.
    fn is_available(&self) -> bool;

    /// Run the category's tools against `target`. Must stop promptly once
    /// `cancel` fires.
    async fn assess(
        &self,
        target: &Path,
        config: &AssessConfig,
        cancel: &CancellationToken,
    ) -> Result<AssessmentResult, RunnerError>;
}

/// Mapping from category to the runner responsible for it.
///
/// Registration is last-write-wins. The registry is read-only while a run is
/// in progress: the executor works from a [`snapshot`](Self::snapshot).
#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<Category, Arc<dyn AssessmentRunner>>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `runner` with `category`, replacing any previous runner.
    pub fn register_runner(&self, category: Category, runner: Arc<dyn AssessmentRunner>) {
        let mut runners = self.runners.write().unwrap_or_else(|e| e.into_inner());
        if runners.insert(category, runner).is_some() {
            tracing::debug!(%category, "replaced registered runner");
        }
    }

    pub fn get_runner(&self, category: Category) -> Option<Arc<dyn AssessmentRunner>> {
        let runners = self.runners.read().unwrap_or_else(|e| e.into_inner());
        runners.get(&category).cloned()
    }

    /// Categories whose runner reports itself available, sorted.
    pub fn get_available_categories(&self) -> Vec<Category> {
        self.snapshot()
            .into_iter()
            .filter(|(_, runner)| runner.is_available())
            .map(|(category, _)| category)
            .collect()
    }

    /// Every registered category regardless of availability, sorted.
    pub fn get_all_categories(&self) -> Vec<Category> {
        let runners = self.runners.read().unwrap_or_else(|e| e.into_inner());
        let mut categories: Vec<Category> = runners.keys().copied().collect();
        categories.sort();
        categories
    }

    /// Registered `(category, runner)` pairs sorted by category.
    pub fn snapshot(&self) -> Vec<(Category, Arc<dyn AssessmentRunner>)> {
        let runners = self.runners.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(Category, Arc<dyn AssessmentRunner>)> =
            runners.iter().map(|(c, r)| (*c, r.clone())).collect();
        entries.sort_by_key(|(category, _)| *category);
        entries
    }
}

/// Process-wide default registry for simple callers. Anything that needs
/// isolation (tests, embedders) builds its own [`RunnerRegistry`].
pub fn global() -> Arc<RunnerRegistry> {
    static GLOBAL: OnceLock<Arc<RunnerRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(RunnerRegistry::new())).clone()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::report::types::Severity;

    /// Runner with a fixed delay and result; drives the executor tests.
    pub struct FakeRunner {
        pub category: Category,
        pub priority: u32,
        pub parallel: bool,
        pub available: bool,
        pub delay: Duration,
        pub issues: Vec<Issue>,
        pub fail_with: Option<&'static str>,
        pub started: Option<Arc<std::sync::Mutex<Vec<Category>>>>,
    }

    impl FakeRunner {
        pub fn new(category: Category) -> Self {
            Self {
                category,
                priority: category.default_priority(),
                parallel: true,
                available: true,
                delay: Duration::ZERO,
                issues: Vec::new(),
                fail_with: None,
                started: None,
            }
        }

        /// Append this category to `log` when its assessment starts.
        pub fn recording(mut self, log: Arc<std::sync::Mutex<Vec<Category>>>) -> Self {
            self.started = Some(log);
            self
        }

        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_priority(mut self, priority: u32) -> Self {
            self.priority = priority;
            self
        }

        pub fn serial(mut self) -> Self {
            self.parallel = false;
            self
        }

        pub fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        pub fn failing(mut self, message: &'static str) -> Self {
            self.fail_with = Some(message);
            self
        }

        pub fn with_issue(mut self, file: &str, severity: Severity) -> Self {
            self.issues
                .push(Issue::new(file, severity, self.category, "test:fake", "finding"));
            self
        }
    }

    #[async_trait]
    impl AssessmentRunner for FakeRunner {
        fn category(&self) -> Category {
            self.category
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn can_run_in_parallel(&self) -> bool {
            self.parallel
        }

        fn estimated_time(&self, _target: &Path) -> Duration {
            self.delay
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn assess(
            &self,
            _target: &Path,
            _config: &AssessConfig,
            _cancel: &CancellationToken,
        ) -> Result<AssessmentResult, RunnerError> {
            if let Some(log) = &self.started {
                log.lock().unwrap().push(self.category);
            }
            tokio::time::sleep(self.delay).await;
            if let Some(message) = self.fail_with {
                return Err(RunnerError::Failed(message.to_string()));
            }
            Ok(AssessmentResult {
                issues: self.issues.clone(),
                suppressions: Vec::new(),
                commands: vec![format!("fake {}", self.category)],
            })
        }
    }

    #[test]
    fn test_register_and_get_runner() {
        let registry = RunnerRegistry::new();
        assert!(registry.get_runner(Category::Lint).is_none());
        registry.register_runner(Category::Lint, Arc::new(FakeRunner::new(Category::Lint)));
        let runner = registry.get_runner(Category::Lint).unwrap();
        assert_eq!(runner.category(), Category::Lint);
    }

    #[test]
    fn test_reregistration_replaces_runner() {
        let registry = RunnerRegistry::new();
        registry.register_runner(Category::Lint, Arc::new(FakeRunner::new(Category::Lint).with_priority(1)));
        registry.register_runner(Category::Lint, Arc::new(FakeRunner::new(Category::Lint).with_priority(9)));
        assert_eq!(registry.get_all_categories(), vec![Category::Lint]);
        assert_eq!(registry.get_runner(Category::Lint).unwrap().priority(), 9);
    }

    #[test]
    fn test_available_categories_filter_unavailable() {
        let registry = RunnerRegistry::new();
        registry.register_runner(Category::Security, Arc::new(FakeRunner::new(Category::Security).unavailable()));
        registry.register_runner(Category::Lint, Arc::new(FakeRunner::new(Category::Lint)));
        registry.register_runner(Category::Format, Arc::new(FakeRunner::new(Category::Format)));

        assert_eq!(registry.get_available_categories(), vec![Category::Format, Category::Lint]);
        assert_eq!(
            registry.get_all_categories(),
            vec![Category::Format, Category::Lint, Category::Security]
        );
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(&global(), &global()));
    }
}
