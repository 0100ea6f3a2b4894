//! Concurrency-bounded execution of category runners.
//!
//! Each selected, available category runs on its own task. A semaphore bounds
//! how many run at once; categories that cannot run in parallel additionally
//! take a shared lock so they never overlap each other. Every selected
//! category ends up in the result map with a terminal status, whatever
//! happens to the run.

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use super::filter::PathFilter;
use super::{AssessmentRunner, RunnerRegistry};
use crate::config::{AssessConfig, ConfigError, Mode};
use crate::report::types::{Category, CategoryResult};
use crate::tools::process::with_timeout;

/// Everything the executor produced for one run.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub categories: BTreeMap<Category, CategoryResult>,
    /// Commands executed, in category order
    pub commands_run: Vec<String>,
    pub elapsed: Duration,
}

/// Resolve the worker bound: an explicit count wins, otherwise
/// `max(1, floor(cpus * percent / 100))`.
pub fn resolve_workers(workers: usize, cpu_percent: u32, available_cpus: usize) -> usize {
    if workers > 0 {
        return workers;
    }
    let percent = match cpu_percent {
        0 => 50,
        p => p.min(100) as usize,
    };
    (available_cpus * percent / 100).max(1)
}

fn available_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub struct Executor {
    runners: Vec<(Category, Arc<dyn AssessmentRunner>)>,
    config: Arc<AssessConfig>,
    filter: Arc<PathFilter>,
    available_cpus: usize,
}

impl Executor {
    /// Capture the registry's current runners; later registrations do not
    /// affect this executor.
    pub fn new(registry: &RunnerRegistry, config: AssessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let filter = PathFilter::from_config(&config)?;
        Ok(Self {
            runners: registry.snapshot(),
            config: Arc::new(config),
            filter: Arc::new(filter),
            available_cpus: available_cpus(),
        })
    }

    pub fn with_available_cpus(mut self, cpus: usize) -> Self {
        self.available_cpus = cpus.max(1);
        self
    }

    pub fn worker_count(&self) -> usize {
        resolve_workers(self.config.workers, self.config.cpu_percent, self.available_cpus)
    }

    /// Selected ∩ registered ∩ available, in dispatch order: priority, then
    /// longest estimate first, then name.
    fn select(&self, target: &Path) -> Vec<(Category, Arc<dyn AssessmentRunner>)> {
        let wanted = |category: &Category| self.config.categories.is_empty() || self.config.categories.contains(category);

        for category in self.config.categories.iter() {
            if !self.runners.iter().any(|(c, _)| c == category) {
                info!(%category, "no runner registered for category, skipping");
            }
        }

        let mut selected: Vec<(Category, Arc<dyn AssessmentRunner>)> = self
            .runners
            .iter()
            .filter(|(category, _)| wanted(category))
            .filter(|(category, runner)| {
                let available = runner.is_available();
                if !available {
                    info!(%category, "category unavailable, skipping");
                }
                available
            })
            .map(|(category, runner)| (*category, runner.clone()))
            .collect();

        selected.sort_by_cached_key(|(category, runner)| {
            (runner.priority(), Reverse(runner.estimated_time(target)), category.as_str())
        });
        selected
    }

    #[instrument(skip_all, fields(target = %target.display(), mode = %self.config.mode))]
    pub async fn execute(&self, target: &Path, cancel: &CancellationToken) -> ExecutionOutcome {
        let started = Instant::now();
        let selected = self.select(target);

        if self.config.mode == Mode::NoOp {
            info!(categories = selected.len(), "no-op mode, nothing executed");
            let categories = selected
                .iter()
                .map(|(category, runner)| {
                    let result = CategoryResult::skipped(*category, runner.priority(), runner.can_run_in_parallel(), "no-op mode");
                    (*category, result)
                })
                .collect();
            return ExecutionOutcome {
                categories,
                commands_run: Vec::new(),
                elapsed: started.elapsed(),
            };
        }

        let workers = self.worker_count();
        info!(categories = selected.len(), workers, "dispatching categories");

        let run_token = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let total_timeout = self.config.total_timeout();
        let watchdog = total_timeout.map(|limit| {
            let token = run_token.clone();
            let hit = deadline_hit.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        warn!(limit = ?limit, "run deadline reached, cancelling remaining categories");
                        hit.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let serial = Arc::new(Mutex::new(()));
        let mut pending: VecDeque<CategoryTask> = selected
            .iter()
            .map(|(category, runner)| CategoryTask {
                category: *category,
                runner: runner.clone(),
                target: target.to_path_buf(),
                config: self.config.clone(),
                filter: self.filter.clone(),
                token: run_token.clone(),
                deadline_hit: deadline_hit.clone(),
                total_timeout,
            })
            .collect();
        let mut tasks = JoinSet::new();

        // Permits are taken here, in dispatch order, and moved into each task.
        while !pending.is_empty() {
            let permit = tokio::select! {
                biased;
                _ = run_token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (task, serial_guard) = match next_runnable(&mut pending, &serial) {
                Some(ready) => ready,
                None => {
                    // Only serial categories remain and one of them holds the lock.
                    let Some(task) = pending.pop_front() else { break };
                    tokio::select! {
                        biased;
                        _ = run_token.cancelled() => {
                            pending.push_front(task);
                            break;
                        }
                        guard = serial.clone().lock_owned() => (task, Some(guard)),
                    }
                }
            };
            let span = info_span!("category", category = %task.category);
            tasks.spawn(task.run(permit, serial_guard).instrument(span));
        }

        let mut categories: BTreeMap<Category, CategoryResult> = pending
            .iter()
            .map(|task| (task.category, task.not_started()))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    categories.insert(result.category, result);
                }
                Err(err) => warn!(error = %err, "category task failed"),
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        // A panicked task leaves no result behind; the category still gets an entry.
        for (category, runner) in &selected {
            categories.entry(*category).or_insert_with(|| {
                CategoryResult::error(
                    *category,
                    runner.priority(),
                    runner.can_run_in_parallel(),
                    "category runner panicked",
                    Duration::ZERO,
                )
            });
        }

        let commands_run = categories.values().flat_map(|r| r.commands.iter().cloned()).collect();
        let elapsed = started.elapsed();
        info!(categories = categories.len(), elapsed = ?elapsed, "execution complete");

        ExecutionOutcome {
            categories,
            commands_run,
            elapsed,
        }
    }
}

/// Remove and return the first pending task that can start now, along with
/// the serial lock if it needs one.
fn next_runnable(
    pending: &mut VecDeque<CategoryTask>,
    serial: &Arc<Mutex<()>>,
) -> Option<(CategoryTask, Option<OwnedMutexGuard<()>>)> {
    for idx in 0..pending.len() {
        let guard = if pending[idx].runner.can_run_in_parallel() {
            None
        } else {
            match serial.clone().try_lock_owned() {
                Ok(guard) => Some(guard),
                Err(_) => continue,
            }
        };
        return pending.remove(idx).map(|task| (task, guard));
    }
    None
}

/// One category's slot in the run; the only writer of that category's result.
struct CategoryTask {
    category: Category,
    runner: Arc<dyn AssessmentRunner>,
    target: PathBuf,
    config: Arc<AssessConfig>,
    filter: Arc<PathFilter>,
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
    total_timeout: Option<Duration>,
}

impl CategoryTask {
    async fn run(self, _permit: OwnedSemaphorePermit, _serial_guard: Option<OwnedMutexGuard<()>>) -> CategoryResult {
        if self.token.is_cancelled() {
            return self.not_started();
        }

        let timeout = self.config.timeout_for(self.category);
        let started = Instant::now();
        debug!(timeout = ?timeout, "category started");

        let assess = self.runner.assess(&self.target, &self.config, &self.token);
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.interrupted_message()),
            result = with_timeout(timeout, assess) => match result {
                Some(Ok(result)) => Ok(result),
                Some(Err(err)) => Err(err.to_string()),
                None => Err(format!("{} timed out after {:?}", self.category, timeout.unwrap_or_default())),
            },
        };
        let elapsed = started.elapsed();

        let priority = self.runner.priority();
        let parallel = self.runner.can_run_in_parallel();
        match outcome {
            Ok(assessment) => {
                let mut result = CategoryResult::success(self.category, priority, parallel, assessment.issues, elapsed)
                    .with_suppressions(assessment.suppressions)
                    .with_commands(assessment.commands);
                if !self.filter.is_empty() {
                    let before = result.issue_count;
                    result.retain_issues(|issue| self.filter.keeps(issue));
                    debug!(dropped = before - result.issue_count, "applied path filter");
                }
                info!(issues = result.issue_count, elapsed = ?elapsed, "category complete");
                result
            }
            Err(message) => {
                warn!(error = %message, elapsed = ?elapsed, "category failed");
                CategoryResult::error(self.category, priority, parallel, message, elapsed)
            }
        }
    }

    fn interrupted_message(&self) -> String {
        match self.total_timeout {
            Some(limit) if self.deadline_hit.load(Ordering::SeqCst) => {
                format!("{} timed out after {:?} (run deadline)", self.category, limit)
            }
            _ => format!("{} cancelled", self.category),
        }
    }

    fn not_started(&self) -> CategoryResult {
        let note = match self.total_timeout {
            Some(limit) if self.deadline_hit.load(Ordering::SeqCst) => {
                format!("run deadline of {limit:?} reached before the category started")
            }
            _ => "run cancelled before the category started".to_string(),
        };
        info!(%note, "category skipped");
        CategoryResult::skipped(self.category, self.runner.priority(), self.runner.can_run_in_parallel(), note)
    }
}
