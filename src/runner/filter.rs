use glob::{MatchOptions, Pattern};

use crate::config::{AssessConfig, ConfigError};
use crate::report::types::Issue;

/// Include/exclude globs applied to issue paths after a category completes.
///
/// `force_include` wins over `exclude`; a non-empty `include` list keeps only
/// matching files. Repository-wide findings are never filtered.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    force_include: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| ConfigError::Glob {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

impl PathFilter {
    pub fn from_config(config: &AssessConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile(&config.include)?,
            exclude: compile(&config.exclude)?,
            force_include: compile(&config.force_include)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn keeps(&self, issue: &Issue) -> bool {
        if issue.is_repository_scoped() {
            return true;
        }
        let path = issue.file.strip_prefix("./").unwrap_or(&issue.file);
        let any = |patterns: &[Pattern]| patterns.iter().any(|p| p.matches_with(path, MATCH_OPTIONS));

        if any(&self.force_include) {
            return true;
        }
        if any(&self.exclude) {
            return false;
        }
        self.include.is_empty() || any(&self.include)
    }
}
