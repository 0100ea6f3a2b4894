pub mod summary;
pub mod types;
pub mod workflow;

use chrono::Utc;
use colored::Colorize;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::Mode;
use crate::runner::executor::ExecutionOutcome;
use summary::HealthWeights;
use types::{AssessmentReport, CategoryResult, ExecutionStatus, Issue, ReportMetadata, Severity};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Write(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid report: {0}")]
    Invalid(String),
}

/// How the report is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Console,
    Markdown,
    Json,
}

/// Assemble the final report from an executor run.
///
/// The workflow plan and the summary are both derived from the category map,
/// so the report is self-consistent by construction.
pub fn build(outcome: ExecutionOutcome, target: &Path, mode: Mode, weights: &HealthWeights) -> AssessmentReport {
    let workflow = workflow::plan(&outcome.categories);
    let summary = summary::summarize(&outcome.categories, &workflow, weights);

    AssessmentReport {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            target: target.display().to_string(),
            mode: mode.to_string(),
            execution_time: outcome.elapsed,
            commands_run: outcome.commands_run,
        },
        summary,
        categories: outcome.categories,
        workflow,
    }
}

/// True iff any issue is at or above `threshold`.
pub fn should_fail(report: &AssessmentReport, threshold: Severity) -> bool {
    report
        .categories
        .values()
        .flat_map(|r| r.issues.iter())
        .any(|issue| issue.severity >= threshold)
}

pub fn to_json(report: &AssessmentReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Read a report back from its JSON form, rejecting structurally inconsistent ones.
pub fn from_json(json: &str) -> Result<AssessmentReport, ReportError> {
    let report: AssessmentReport = serde_json::from_str(json)?;
    for (category, result) in &report.categories {
        if *category != result.category {
            return Err(ReportError::Invalid(format!(
                "category key {category} holds a {} result",
                result.category
            )));
        }
        result.validate().map_err(ReportError::Invalid)?;
    }
    Ok(report)
}

/// Render the report and print it to stdout, or write it to `path`.
#[instrument(skip(report), fields(total_issues = report.summary.total_issues))]
pub fn output(report: &AssessmentReport, format: OutputFormat, path: Option<&Path>) -> Result<(), ReportError> {
    let rendered = match format {
        OutputFormat::Console => render_console(report),
        OutputFormat::Markdown => render_markdown(report),
        OutputFormat::Json => to_json(report)?,
    };
    match path {
        None => {
            debug!("writing report to stdout");
            println!("{rendered}");
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            std::fs::write(path, rendered)?;
        }
    }
    Ok(())
}

/// Compact human form: `1h 5m`, `2m 30s`, `45s`, `350ms`.
pub fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0 => format!("{}ms", d.as_millis()),
        1..=59 => format!("{secs}s"),
        60..=3599 => match secs % 60 {
            0 => format!("{}m", secs / 60),
            s => format!("{}m {s}s", secs / 60),
        },
        _ => match (secs % 3600) / 60 {
            0 => format!("{}h", secs / 3600),
            m => format!("{}h {m}m", secs / 3600),
        },
    }
}

/// Categories in presentation order: ascending priority, then name.
fn ordered(report: &AssessmentReport) -> Vec<&CategoryResult> {
    let mut results: Vec<&CategoryResult> = report.categories.values().collect();
    results.sort_by_key(|r| (r.priority, r.category.as_str()));
    results
}

fn location(issue: &Issue) -> String {
    match (issue.line, issue.column) {
        (Some(line), Some(column)) => format!("{}:{line}:{column}", issue.file),
        (Some(line), None) => format!("{}:{line}", issue.file),
        _ => issue.file.clone(),
    }
}

fn health_percent(report: &AssessmentReport) -> String {
    format!("{:.0}%", report.summary.overall_health * 100.0)
}

fn colorize_severity(severity: Severity) -> colored::ColoredString {
    let label = severity.to_string();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.cyan(),
        Severity::Info => label.dimmed(),
    }
}

fn colorize_status(result: &CategoryResult) -> colored::ColoredString {
    match result.status {
        ExecutionStatus::Success if result.issue_count == 0 => "clean".green().bold(),
        ExecutionStatus::Success => format!("{} issues", result.issue_count).yellow().bold(),
        ExecutionStatus::Error => "error".red().bold(),
        ExecutionStatus::Skipped => "skipped".dimmed(),
    }
}

pub fn render_console(report: &AssessmentReport) -> String {
    let mut out = String::new();
    let meta = &report.metadata;
    let summary = &report.summary;

    let _ = writeln!(out);
    let _ = writeln!(out, "Assessment of {} ({} mode)", meta.target.bold(), meta.mode);
    let _ = writeln!(
        out,
        "Health: {} | Issues: {} ({} critical) | Fix time: {} | Ran in {}",
        health_percent(report).bold(),
        summary.total_issues,
        summary.critical_issues,
        human_duration(summary.estimated_fix_time),
        human_duration(meta.execution_time)
    );
    let _ = writeln!(out);

    for result in ordered(report) {
        let _ = writeln!(out, "═══ {} ═══ {}", result.category, colorize_status(result));
        if let Some(error) = &result.error {
            let _ = writeln!(out, "  {}", error.red());
        }
        if let Some(note) = &result.note {
            let _ = writeln!(out, "  {}", note.dimmed());
        }
        for issue in &result.issues {
            let fix = if issue.auto_fixable { " (auto-fixable)" } else { "" };
            let _ = writeln!(
                out,
                "  • [{}] {} {}{}",
                colorize_severity(issue.severity),
                location(issue).bold(),
                issue.message,
                fix.green()
            );
        }
        if !result.suppressions.is_empty() {
            let _ = writeln!(out, "  {} inline suppressions", result.suppressions.len());
        }
        let _ = writeln!(out);
    }

    if !report.workflow.phases.is_empty() {
        let _ = writeln!(out, "═══ Workflow ({}) ═══", human_duration(report.workflow.total_time));
        for phase in &report.workflow.phases {
            let names: Vec<&str> = phase.categories.iter().map(|c| c.as_str()).collect();
            let _ = writeln!(
                out,
                "  {}. {} ({} issues, {})",
                phase.index,
                names.join(", "),
                phase.issue_count,
                human_duration(phase.estimated_time)
            );
        }
        let _ = writeln!(out, "  {} independent groups can be fixed in parallel", report.workflow.parallel_groups.len());
        let _ = writeln!(out);
    }
    out
}

pub fn render_markdown(report: &AssessmentReport) -> String {
    let mut md = String::new();
    let meta = &report.metadata;
    let summary = &report.summary;

    let _ = writeln!(md, "# Assessment of `{}`\n", meta.target);
    let _ = writeln!(
        md,
        "**Health:** {} | **Issues:** {} ({} critical) | **Fix time:** {} | **Mode:** {}\n",
        health_percent(report),
        summary.total_issues,
        summary.critical_issues,
        human_duration(summary.estimated_fix_time),
        meta.mode
    );

    md.push_str("| Category | Status | Issues | Priority | Fix time |\n");
    md.push_str("|---|---|---|---|---|\n");
    for result in ordered(report) {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            result.category,
            result.status,
            result.issue_count,
            result.priority,
            human_duration(result.estimated_time)
        );
    }
    md.push('\n');

    for result in ordered(report) {
        if result.issues.is_empty() && result.error.is_none() {
            continue;
        }
        let _ = writeln!(md, "## {}\n", result.category);
        if let Some(error) = &result.error {
            let _ = writeln!(md, "> **Error:** {error}\n");
        }
        for issue in &result.issues {
            let _ = writeln!(
                md,
                "- **[{}]** {} (`{}`, {})",
                issue.severity,
                issue.message,
                location(issue),
                issue.sub_category
            );
        }
        md.push('\n');
    }

    if !report.workflow.phases.is_empty() {
        let _ = writeln!(md, "## Workflow\n");
        for phase in &report.workflow.phases {
            let names: Vec<&str> = phase.categories.iter().map(|c| c.as_str()).collect();
            let _ = writeln!(
                md,
                "{}. {} ({} issues, {})",
                phase.index,
                names.join(", "),
                phase.issue_count,
                human_duration(phase.estimated_time)
            );
        }
        md.push('\n');
        for group in &report.workflow.parallel_groups {
            let _ = writeln!(md, "- `{}`: {} files, {} issues", group.name, group.files.len(), group.issue_count);
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use types::Category;

    fn issue(file: &str, severity: Severity, category: Category) -> Issue {
        Issue::new(file, severity, category, "test:tool", "finding")
    }

    fn sample_outcome() -> ExecutionOutcome {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::Lint,
            CategoryResult::success(
                Category::Lint,
                2,
                true,
                vec![
                    issue("src/lib.rs", Severity::High, Category::Lint).at(Some(3), Some(1)),
                    issue("src/main.rs", Severity::Low, Category::Lint),
                ],
                Duration::from_secs(4),
            )
            .with_commands(vec!["cargo clippy".to_string()]),
        );
        categories.insert(
            Category::Format,
            CategoryResult::success(
                Category::Format,
                1,
                true,
                vec![issue("src/lib.rs", Severity::Low, Category::Format).fixable(true)],
                Duration::from_secs(1),
            ),
        );
        categories.insert(
            Category::Security,
            CategoryResult::error(Category::Security, 3, false, "cargo-deny failed: boom", Duration::from_secs(2)),
        );
        ExecutionOutcome {
            categories,
            commands_run: vec!["cargo fmt --all -- --check -l".to_string(), "cargo clippy".to_string()],
            elapsed: Duration::from_secs(5),
        }
    }

    fn sample_report() -> AssessmentReport {
        build(sample_outcome(), Path::new("/work/repo"), Mode::Check, &HealthWeights::default())
    }

    #[test]
    fn test_build_derives_summary_and_plan() {
        let report = sample_report();
        assert_eq!(report.summary.total_issues, 3);
        assert_eq!(report.summary.highest_severity, Some(Severity::High));
        assert_eq!(report.workflow.phases.len(), 3);
        // Both lib.rs issues share a group; main.rs stands alone.
        assert_eq!(report.summary.parallel_groups, 2);
        assert_eq!(report.metadata.mode, "check");
        assert_eq!(report.metadata.commands_run.len(), 2);
        assert!(report.summary.overall_health < 1.0);
    }

    #[test]
    fn test_should_fail_threshold() {
        let report = sample_report();
        assert!(should_fail(&report, Severity::High));
        assert!(should_fail(&report, Severity::Low));
        assert!(!should_fail(&report, Severity::Critical));
    }

    #[test]
    fn test_should_fail_on_empty_report() {
        let outcome = ExecutionOutcome {
            categories: BTreeMap::new(),
            commands_run: vec![],
            elapsed: Duration::ZERO,
        };
        let report = build(outcome, Path::new("."), Mode::Check, &HealthWeights::default());
        assert!(!should_fail(&report, Severity::Info));
        assert_eq!(report.summary.overall_health, 1.0);
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let report = sample_report();
        let json = to_json(&report).unwrap();
        assert_eq!(from_json(&json).unwrap(), report);
    }

    #[test]
    fn test_from_json_rejects_inconsistent_counts() {
        let report = sample_report();
        let mut value: serde_json::Value = serde_json::from_str(&to_json(&report).unwrap()).unwrap();
        value["categories"]["lint"]["issue_count"] = serde_json::json!(7);
        let err = from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, ReportError::Invalid(_)));
    }

    #[test]
    fn test_markdown_lists_categories_by_priority() {
        let md = render_markdown(&sample_report());
        let format = md.find("| format |").unwrap();
        let lint = md.find("| lint |").unwrap();
        let security = md.find("| security |").unwrap();
        assert!(format < lint && lint < security);
        assert!(md.contains("> **Error:** cargo-deny failed: boom"));
        assert!(md.contains("(`src/lib.rs:3:1`, test:tool)"));
        assert!(md.contains("## Workflow"));
    }

    #[test]
    fn test_console_rendering_mentions_every_category() {
        let out = render_console(&sample_report());
        for name in ["format", "lint", "security"] {
            assert!(out.contains(name), "missing {name}");
        }
        assert!(out.contains("cargo-deny failed: boom"));
    }

    #[test]
    fn test_output_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = sample_report();
        output(&report, OutputFormat::Json, Some(&path)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(from_json(&written).unwrap(), report);
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(Duration::from_millis(350)), "350ms");
        assert_eq!(human_duration(Duration::from_secs(45)), "45s");
        assert_eq!(human_duration(Duration::from_secs(150)), "2m 30s");
        assert_eq!(human_duration(Duration::from_secs(120)), "2m");
        assert_eq!(human_duration(Duration::from_secs(3900)), "1h 5m");
    }
}
