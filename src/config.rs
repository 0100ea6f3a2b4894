use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::hooks::HookEntry;
use crate::report::summary::HealthWeights;
use crate::report::types::{Category, Severity};

pub const CONFIG_FILE: &str = ".repo-assess.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Operation mode forwarded to every runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Select categories but invoke nothing
    NoOp,
    #[default]
    Check,
    /// Let tools apply their own fixes
    Fix,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::NoOp => write!(f, "no-op"),
            Mode::Check => write!(f, "check"),
            Mode::Fix => write!(f, "fix"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no-op" | "noop" | "none" => Ok(Mode::NoOp),
            "check" => Ok(Mode::Check),
            "fix" => Ok(Mode::Fix),
            other => Err(format!("unknown mode '{other}' (expected no-op, check or fix)")),
        }
    }
}

/// Top-level configuration loaded from .repo-assess.toml.
/// All fields are optional; a missing file means defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub assess: AssessConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// Hook commands run by `--hook`
    #[serde(default)]
    pub hooks: Vec<HookEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub weights: HealthWeights,
}

/// Settings consumed by the executor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssessConfig {
    pub mode: Mode,
    /// Total run deadline in seconds, 0 = none
    pub timeout_secs: u64,
    /// Default per-category timeout in seconds, 0 = none
    pub category_timeout_secs: u64,
    /// Per-category overrides, keyed by category name
    pub category_timeouts: HashMap<String, u64>,
    /// Explicit worker count; 0 derives it from `cpu_percent`
    pub workers: usize,
    /// Share of available CPUs to use when `workers` is 0
    pub cpu_percent: u32,
    /// Minimum severity that fails the run
    pub fail_on: Severity,
    /// Categories to run; empty runs every available one
    pub categories: Vec<Category>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Globs that win over `exclude`
    pub force_include: Vec<String>,
}

impl Default for AssessConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Check,
            timeout_secs: 0,
            category_timeout_secs: 300,
            category_timeouts: HashMap::new(),
            workers: 0,
            cpu_percent: 50,
            fail_on: Severity::High,
            categories: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            force_include: Vec::new(),
        }
    }
}

impl AssessConfig {
    pub fn total_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Timeout for one category: its override if present, else the default.
    pub fn timeout_for(&self, category: Category) -> Option<Duration> {
        let secs = self
            .category_timeouts
            .iter()
            .find(|(name, _)| name.parse::<Category>().ok() == Some(category))
            .map(|(_, secs)| *secs)
            .unwrap_or(self.category_timeout_secs);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.cpu_percent) {
            return Err(ConfigError::Invalid(format!(
                "cpu_percent must be between 1 and 100, got {}",
                self.cpu_percent
            )));
        }
        for name in self.category_timeouts.keys() {
            name.parse::<Category>().map_err(ConfigError::Invalid)?;
        }
        for pattern in self.include.iter().chain(&self.exclude).chain(&self.force_include) {
            glob::Pattern::new(pattern).map_err(|source| ConfigError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from .repo-assess.toml in the target directory.
    /// Returns default config if the file doesn't exist.
    pub fn load(target: &Path) -> Result<Config, ConfigError> {
        let path = target.join(CONFIG_FILE);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.assess.validate()?;
        Ok(config)
    }
}
