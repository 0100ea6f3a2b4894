use serde::Deserialize;
use std::collections::BTreeMap;

use super::types::{Category, CategoryResult, ReportSummary, Severity, WorkflowPlan};

/// Health penalty subtracted per issue, by severity.
///
/// Configurable under `[health.weights]`. Negative and NaN values count as zero
/// so that adding an issue can never raise the score; `inf` counts as 1.0, so a
/// single such issue zeroes health.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub info: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            critical: 0.20,
            high: 0.10,
            medium: 0.04,
            low: 0.01,
            info: 0.002,
        }
    }
}

impl HealthWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        let w = match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        };
        if w == f64::INFINITY {
            1.0
        } else if w.is_finite() && w > 0.0 {
            w
        } else {
            0.0
        }
    }
}

/// Compute the health score for a set of category results.
///
/// Starts at 1.0, subtracts `weight(severity)` per issue, floors at 0.0.
pub fn health_score(categories: &BTreeMap<Category, CategoryResult>, weights: &HealthWeights) -> f64 {
    let mut counts = [0usize; Severity::ALL.len()];
    for issue in categories.values().flat_map(|r| r.issues.iter()) {
        counts[issue.severity as usize] += 1;
    }

    let penalty: f64 = Severity::ALL
        .iter()
        .map(|sev| counts[*sev as usize] as f64 * weights.weight(*sev))
        .sum();

    (1.0 - penalty).clamp(0.0, 1.0)
}

/// Derive the report summary from the category map and the workflow plan built from it.
pub fn summarize(
    categories: &BTreeMap<Category, CategoryResult>,
    plan: &WorkflowPlan,
    weights: &HealthWeights,
) -> ReportSummary {
    let issues = || categories.values().flat_map(|r| r.issues.iter());

    ReportSummary {
        overall_health: health_score(categories, weights),
        critical_issues: issues().filter(|i| i.severity == Severity::Critical).count(),
        total_issues: categories.values().map(|r| r.issue_count).sum(),
        estimated_fix_time: categories.values().map(|r| r.estimated_time).sum(),
        categories_with_issues: categories.values().filter(|r| r.issue_count > 0).count(),
        parallel_groups: plan.parallel_groups.len(),
        suppressed_issues: categories.values().map(|r| r.suppressions.len()).sum(),
        highest_severity: issues().map(|i| i.severity).max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::{Issue, Suppression};
    use std::time::Duration;

    fn issue(file: &str, severity: Severity, category: Category) -> Issue {
        Issue::new(file, severity, category, "test:tool", "finding")
    }

    fn categories(results: Vec<CategoryResult>) -> BTreeMap<Category, CategoryResult> {
        results.into_iter().map(|r| (r.category, r)).collect()
    }

    fn result(category: Category, issues: Vec<Issue>) -> CategoryResult {
        CategoryResult::success(category, category.default_priority(), true, issues, Duration::ZERO)
    }

    #[test]
    fn test_empty_report_is_fully_healthy() {
        let map = categories(vec![result(Category::Lint, vec![])]);
        assert_eq!(health_score(&map, &HealthWeights::default()), 1.0);
    }

    #[test]
    fn test_summary_counts() {
        let map = categories(vec![
            result(
                Category::Lint,
                vec![
                    issue("a.rs", Severity::Critical, Category::Lint),
                    issue("b.rs", Severity::Low, Category::Lint),
                ],
            ),
            result(Category::Format, vec![]),
            result(Category::Security, vec![issue("Cargo.lock", Severity::Critical, Category::Security)]),
        ]);
        let summary = summarize(&map, &WorkflowPlan::default(), &HealthWeights::default());
        assert_eq!(summary.total_issues, 3);
        assert_eq!(summary.critical_issues, 2);
        assert_eq!(summary.categories_with_issues, 2);
        assert_eq!(summary.highest_severity, Some(Severity::Critical));
        assert_eq!(summary.total_issues, map.values().map(|r| r.issue_count).sum::<usize>());
    }

    #[test]
    fn test_summary_counts_suppressions() {
        let lint = result(Category::Lint, vec![]).with_suppressions(vec![Suppression {
            file: "src/lib.rs".to_string(),
            line: Some(4),
            rule: "clippy::too_many_arguments".to_string(),
            tool: "rust:clippy".to_string(),
            reason: None,
        }]);
        let summary = summarize(&categories(vec![lint]), &WorkflowPlan::default(), &HealthWeights::default());
        assert_eq!(summary.suppressed_issues, 1);
        assert_eq!(summary.total_issues, 0);
        assert_eq!(summary.highest_severity, None);
    }

    #[test]
    fn test_health_is_monotonic_in_issue_count() {
        let weights = HealthWeights::default();
        let mut issues = Vec::new();
        let mut previous = 1.0;
        for n in 0..60 {
            let sev = Severity::ALL[n % Severity::ALL.len()];
            issues.push(issue("x.rs", sev, Category::Lint));
            let score = health_score(&categories(vec![result(Category::Lint, issues.clone())]), &weights);
            assert!(score <= previous, "adding {sev} raised health");
            assert!((0.0..=1.0).contains(&score));
            previous = score;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_more_severe_costs_more() {
        let weights = HealthWeights::default();
        let scores: Vec<f64> = Severity::ALL
            .iter()
            .map(|sev| health_score(&categories(vec![result(Category::Lint, vec![issue("a", *sev, Category::Lint)])]), &weights))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_negative_weights_are_clamped() {
        let weights = HealthWeights { low: -1.0, info: f64::NAN, ..HealthWeights::default() };
        let map = categories(vec![result(
            Category::Lint,
            vec![issue("a", Severity::Low, Category::Lint), issue("b", Severity::Info, Category::Lint)],
        )]);
        assert_eq!(health_score(&map, &weights), 1.0);
    }

    #[test]
    fn test_infinite_weight_zeroes_health() {
        let weights = HealthWeights { critical: f64::INFINITY, ..HealthWeights::default() };
        assert_eq!(weights.weight(Severity::Critical), 1.0);
        let clean = categories(vec![result(Category::Lint, vec![])]);
        assert_eq!(health_score(&clean, &weights), 1.0);
        let map = categories(vec![result(Category::Lint, vec![issue("a", Severity::Critical, Category::Lint)])]);
        assert_eq!(health_score(&map, &weights), 0.0);
    }
}
