use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// File key used for findings that are not scoped to a single file
/// (e.g. a dirty working tree).
pub const REPOSITORY_SENTINEL: &str = "repository";

/// Canonical severity of an issue. Every tool vocabulary is funneled into this scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Rough remediation effort used when an adapter has nothing better.
    pub fn default_fix_estimate(&self) -> Duration {
        match self {
            Severity::Info => Duration::from_secs(60),
            Severity::Low => Duration::from_secs(2 * 60),
            Severity::Medium => Duration::from_secs(5 * 60),
            Severity::High => Duration::from_secs(15 * 60),
            Severity::Critical => Duration::from_secs(30 * 60),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity '{s}' (expected info, low, medium, high or critical)"))
    }
}

/// Assessment category. Closed set; one runner per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Format,
    Lint,
    Security,
    Dependencies,
    StaticAnalysis,
    Performance,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Format,
        Category::Lint,
        Category::Security,
        Category::Dependencies,
        Category::StaticAnalysis,
        Category::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Format => "format",
            Category::Lint => "lint",
            Category::Security => "security",
            Category::Dependencies => "dependencies",
            Category::StaticAnalysis => "static-analysis",
            Category::Performance => "performance",
        }
    }

    /// Lower runs and reports first.
    pub fn default_priority(&self) -> u32 {
        match self {
            Category::Format => 1,
            Category::Lint | Category::StaticAnalysis => 2,
            Category::Security | Category::Dependencies => 3,
            Category::Performance => 4,
        }
    }

    /// Security and dependency scans share tool caches (advisory DBs, lockfiles)
    /// and must not overlap each other.
    pub fn default_parallelizable(&self) -> bool {
        !matches!(self, Category::Security | Category::Dependencies)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// A single finding from a tool adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// File path relative to the target, or [`REPOSITORY_SENTINEL`]
    pub file: String,
    /// Line number in the file (if applicable)
    pub line: Option<u32>,
    /// Column number in the file (if applicable)
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
    pub category: Category,
    /// Originating tool, e.g. `rust:clippy`. Stable across runs of the same tool.
    pub sub_category: String,
    /// Whether the tool's fix mode can resolve this issue
    pub auto_fixable: bool,
    /// Estimated remediation effort
    pub estimated_time: Duration,
}

impl Issue {
    pub fn new(
        file: impl Into<String>,
        severity: Severity,
        category: Category,
        sub_category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
            severity,
            message: message.into(),
            category,
            sub_category: sub_category.into(),
            auto_fixable: false,
            estimated_time: severity.default_fix_estimate(),
        }
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }

    pub fn estimate(mut self, estimated_time: Duration) -> Self {
        self.estimated_time = estimated_time;
        self
    }

    pub fn is_repository_scoped(&self) -> bool {
        self.file == REPOSITORY_SENTINEL
    }
}

/// An inline suppression found in source (e.g. `#[allow(clippy::...)]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub file: String,
    pub line: Option<u32>,
    /// Rule or lint being suppressed
    pub rule: String,
    /// Tool that honours the suppression, same vocabulary as `Issue::sub_category`
    pub tool: String,
    /// Justification text attached to the suppression, if any
    pub reason: Option<String>,
}

/// Execution status of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Skipped,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of running one category's assessment.
///
/// Built through the constructors so that `issue_count` and `estimated_time`
/// always agree with `issues`, and `error` is only set for `Status::Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: Category,
    pub issues: Vec<Issue>,
    /// Always `issues.len()`
    pub issue_count: usize,
    /// Lower = run/report first
    pub priority: u32,
    pub parallelizable: bool,
    pub status: ExecutionStatus,
    /// Set exactly when `status` is `Error`
    pub error: Option<String>,
    /// Why the category was skipped, when it was
    pub note: Option<String>,
    /// Sum of the issues' remediation estimates
    pub estimated_time: Duration,
    /// Wall-clock time spent running the category
    pub execution_time: Duration,
    #[serde(default)]
    pub suppressions: Vec<Suppression>,
    /// Command lines the category's adapters executed
    #[serde(default)]
    pub commands: Vec<String>,
}

impl CategoryResult {
    pub fn success(
        category: Category,
        priority: u32,
        parallelizable: bool,
        issues: Vec<Issue>,
        execution_time: Duration,
    ) -> Self {
        let mut result = Self::empty(category, priority, parallelizable, ExecutionStatus::Success);
        result.execution_time = execution_time;
        result.set_issues(issues);
        result
    }

    pub fn error(
        category: Category,
        priority: u32,
        parallelizable: bool,
        error: impl Into<String>,
        execution_time: Duration,
    ) -> Self {
        let mut result = Self::empty(category, priority, parallelizable, ExecutionStatus::Error);
        result.error = Some(error.into());
        result.execution_time = execution_time;
        result
    }

    pub fn skipped(category: Category, priority: u32, parallelizable: bool, note: impl Into<String>) -> Self {
        let mut result = Self::empty(category, priority, parallelizable, ExecutionStatus::Skipped);
        result.note = Some(note.into());
        result
    }

    fn empty(category: Category, priority: u32, parallelizable: bool, status: ExecutionStatus) -> Self {
        Self {
            category,
            issues: Vec::new(),
            issue_count: 0,
            priority,
            parallelizable,
            status,
            error: None,
            note: None,
            estimated_time: Duration::ZERO,
            execution_time: Duration::ZERO,
            suppressions: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_suppressions(mut self, suppressions: Vec<Suppression>) -> Self {
        self.suppressions = suppressions;
        self
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    /// Keep only issues matching `keep`, recomputing the derived fields.
    pub fn retain_issues(&mut self, keep: impl FnMut(&Issue) -> bool) {
        let mut issues = std::mem::take(&mut self.issues);
        issues.retain(keep);
        self.set_issues(issues);
    }

    fn set_issues(&mut self, issues: Vec<Issue>) {
        self.issue_count = issues.len();
        self.estimated_time = issues.iter().map(|i| i.estimated_time).sum();
        self.issues = issues;
    }

    /// Checks the structural invariants; used when reading a report back.
    pub fn validate(&self) -> Result<(), String> {
        if self.issue_count != self.issues.len() {
            return Err(format!(
                "{}: issue_count {} does not match {} issues",
                self.category,
                self.issue_count,
                self.issues.len()
            ));
        }
        if self.error.as_deref().is_some_and(|e| !e.is_empty()) && self.status != ExecutionStatus::Error {
            return Err(format!("{}: error message set on a {} result", self.category, self.status));
        }
        Ok(())
    }
}

/// Run metadata carried by the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub target: String,
    pub mode: String,
    /// Wall-clock time of the whole run
    pub execution_time: Duration,
    pub commands_run: Vec<String>,
}

/// Aggregate statistics. Always recomputable from the category map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// 0.0 (worst) to 1.0 (no issues)
    pub overall_health: f64,
    pub critical_issues: usize,
    pub total_issues: usize,
    pub estimated_fix_time: Duration,
    pub categories_with_issues: usize,
    pub parallel_groups: usize,
    pub suppressed_issues: usize,
    /// Highest severity present, if any issue exists
    pub highest_severity: Option<Severity>,
}

/// One sequential step of the remediation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPhase {
    /// 1-based position in the plan
    pub index: usize,
    pub priority: u32,
    /// Member categories, ordered by name
    pub categories: Vec<Category>,
    pub issue_count: usize,
    pub estimated_time: Duration,
}

/// A cluster of issues whose files overlap; distinct groups can be fixed concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub name: String,
    /// Deduplicated, in first-seen order
    pub files: Vec<String>,
    pub categories: Vec<Category>,
    pub issue_count: usize,
    pub estimated_time: Duration,
}

/// Remediation plan derived from the category results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub phases: Vec<WorkflowPhase>,
    pub parallel_groups: Vec<ParallelGroup>,
    /// Sum of phase times; phases run one after another
    pub total_time: Duration,
}

/// Complete assessment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub categories: BTreeMap<Category, CategoryResult>,
    pub workflow: WorkflowPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_display_and_parse() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!("High".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_category_parse_accepts_snake_case() {
        assert_eq!("static_analysis".parse::<Category>().unwrap(), Category::StaticAnalysis);
        assert_eq!("lint".parse::<Category>().unwrap(), Category::Lint);
        assert!("style".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serializes_kebab_case() {
        let json = serde_json::to_string(&Category::StaticAnalysis).unwrap();
        assert_eq!(json, "\"static-analysis\"");
    }

    #[test]
    fn test_category_result_counts_issues() {
        let issues = vec![
            Issue::new("a.rs", Severity::High, Category::Lint, "rust:clippy", "x"),
            Issue::new("b.rs", Severity::Low, Category::Lint, "rust:clippy", "y"),
        ];
        let result = CategoryResult::success(Category::Lint, 2, true, issues, Duration::ZERO);
        assert_eq!(result.issue_count, 2);
        assert_eq!(
            result.estimated_time,
            Severity::High.default_fix_estimate() + Severity::Low.default_fix_estimate()
        );
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_retain_issues_recomputes_count() {
        let issues = vec![
            Issue::new("a.rs", Severity::High, Category::Lint, "rust:clippy", "x"),
            Issue::new("target/b.rs", Severity::Low, Category::Lint, "rust:clippy", "y"),
        ];
        let mut result = CategoryResult::success(Category::Lint, 2, true, issues, Duration::ZERO);
        result.retain_issues(|i| !i.file.starts_with("target/"));
        assert_eq!(result.issue_count, 1);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.estimated_time, Severity::High.default_fix_estimate());
    }

    #[test]
    fn test_error_result_has_no_issues() {
        let result = CategoryResult::error(Category::Security, 3, false, "boom", Duration::ZERO);
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.issue_count, 0);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_validate_rejects_mismatched_count() {
        let mut result = CategoryResult::success(Category::Format, 1, true, vec![], Duration::ZERO);
        result.issue_count = 3;
        assert!(result.validate().is_err());

        let mut result = CategoryResult::skipped(Category::Format, 1, true, "no-op");
        result.error = Some("oops".to_string());
        assert!(result.validate().is_err());
    }

    #[test]
    fn test_issue_builder() {
        let issue = Issue::new(REPOSITORY_SENTINEL, Severity::Low, Category::StaticAnalysis, "repo:git-status", "dirty")
            .at(Some(3), None)
            .fixable(true)
            .estimate(Duration::from_secs(10));
        assert!(issue.is_repository_scoped());
        assert_eq!(issue.line, Some(3));
        assert!(issue.auto_fixable);
        assert_eq!(issue.estimated_time, Duration::from_secs(10));
    }
}
