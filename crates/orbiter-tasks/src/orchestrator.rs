//! Single-stage execution

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheEntry, TaskCache};
use crate::executor::{ExecutionOutput, TaskExecutor};
use crate::hasher::TaskHasher;
use crate::life_cycle::{LifeCycle, TaskScope, CRASHED_EXIT_CODE};
use crate::runner::RunnerError;
use crate::task::{Task, TaskId};

/// How a task's result came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskEventKind {
    /// Ran and exited zero
    Success,
    /// Ran and exited non-zero
    Failure,
    /// Served from cache without running
    CacheHit,
    /// Not run because an earlier stage failed
    DependencyFailed,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::CacheHit => "cache",
            Self::DependencyFailed => "skipped",
        }
    }
}

/// Result of a single task
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task the result is for
    pub task: Task,
    /// Whether the task counts as successful
    pub success: bool,
    /// How the result came about
    pub kind: TaskEventKind,
    /// Exit code, when the task ran or was replayed
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

impl TaskResult {
    /// Result for a task skipped because a prerequisite stage failed
    pub fn dependency_failed(task: Task) -> Self {
        Self {
            task,
            success: false,
            kind: TaskEventKind::DependencyFailed,
            code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Start and end of a task's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TaskTiming {
    /// Elapsed milliseconds, if the task finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_milliseconds())
    }
}

/// Stage execution settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Run tasks within a stage concurrently
    pub parallel: bool,
    /// Concurrency limit when parallel; 0 means unlimited
    pub max_parallel: usize,
    /// Targets whose results are cached
    pub cacheable: HashSet<String>,
    /// Persist stderr in cache entries
    pub capture_stderr: bool,
    /// Neither read nor write the cache
    pub skip_cache: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallel: 3,
            cacheable: HashSet::new(),
            capture_stderr: true,
            skip_cache: false,
        }
    }
}

impl OrchestratorOptions {
    /// Number of execution slots
    pub fn slots(&self) -> usize {
        match (self.parallel, self.max_parallel) {
            (false, _) => 1,
            (true, 0) => Semaphore::MAX_PERMITS,
            (true, n) => n,
        }
    }
}

type Timings = Arc<Mutex<HashMap<TaskId, TaskTiming>>>;

/// Shared state handed to each launched task
#[derive(Clone)]
struct LaunchContext {
    cache: Arc<TaskCache>,
    executor: Arc<dyn TaskExecutor>,
    life_cycle: Arc<dyn LifeCycle>,
    timings: Timings,
    capture_stderr: bool,
}

/// Executes one stage at a time
pub struct TaskOrchestrator {
    options: OrchestratorOptions,
    hasher: Arc<TaskHasher>,
    context: LaunchContext,
}

impl TaskOrchestrator {
    pub fn new(
        options: OrchestratorOptions,
        hasher: Arc<TaskHasher>,
        cache: Arc<TaskCache>,
        executor: Arc<dyn TaskExecutor>,
        life_cycle: Arc<dyn LifeCycle>,
    ) -> Self {
        let capture_stderr = options.capture_stderr;
        Self {
            options,
            hasher,
            context: LaunchContext {
                cache,
                executor,
                life_cycle,
                timings: Arc::new(Mutex::new(HashMap::new())),
                capture_stderr,
            },
        }
    }

    /// Start/end timestamps of every task run or replayed so far
    pub fn timings(&self) -> HashMap<TaskId, TaskTiming> {
        self.context
            .timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run every task of one stage, returning results in input order.
    ///
    /// Cacheable tasks are served from cache when possible. The rest are
    /// launched in input order, bounded by the configured slot count, and all
    /// of them are awaited even when some fail.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run(&self, tasks: Vec<Task>) -> Result<Vec<TaskResult>, RunnerError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = self.hash_all(tasks).await?;
        let mut results: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut pending: Vec<(usize, Task, String, bool)> = Vec::new();

        for (idx, task) in tasks.into_iter().enumerate() {
            let hash = task.hash().unwrap_or_default().to_string();
            let cacheable =
                !self.options.skip_cache && self.options.cacheable.contains(&task.id.target);

            if cacheable {
                if let Some(entry) = self.context.cache.get(&hash).await? {
                    results[idx] = Some(self.replay(task, entry).await?);
                    continue;
                }
            }
            pending.push((idx, task, hash, cacheable));
        }

        let semaphore = Arc::new(Semaphore::new(self.options.slots()));
        let mut handles = Vec::with_capacity(pending.len());

        for (idx, task, hash, cacheable) in pending {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| RunnerError::SlotsClosed)?;
            let context = self.context.clone();
            let id = task.id.clone();

            let handle = tokio::spawn(async move {
                let result = launch(context, task, hash, cacheable).await;
                drop(permit);
                result
            });
            handles.push((idx, id, handle));
        }

        let mut fatal: Option<RunnerError> = None;
        for (idx, id, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => results[idx] = Some(result),
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(RunnerError::TaskPanicked {
                        task: id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(results.into_iter().flatten().collect())
    }

    async fn hash_all(&self, tasks: Vec<Task>) -> Result<Vec<Task>, RunnerError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || {
            for task in &tasks {
                hasher.hash_task(task);
            }
            tasks
        })
        .await
        .map_err(|e| RunnerError::Hashing(e.to_string()))
    }

    async fn replay(&self, task: Task, entry: CacheEntry) -> Result<TaskResult, RunnerError> {
        debug!(task = %task.id, hash = %entry.hash, "replaying cached result");
        let started = Utc::now();
        let clock = Instant::now();

        self.context.cache.restore_outputs(&entry).await?;

        let scope = TaskScope::start(self.context.life_cycle.clone(), task.clone());
        for line in entry.stdout.lines() {
            self.context.life_cycle.task_output(&task, line, false);
        }
        for line in entry.stderr.lines() {
            self.context.life_cycle.task_output(&task, line, true);
        }
        scope.end(entry.code);
        record(&self.context.timings, &task.id, started, Some(Utc::now()));

        Ok(TaskResult {
            task,
            success: true,
            kind: TaskEventKind::CacheHit,
            code: Some(entry.code),
            stdout: entry.stdout,
            stderr: entry.stderr,
            duration: clock.elapsed(),
        })
    }
}

async fn launch(
    context: LaunchContext,
    task: Task,
    hash: String,
    cacheable: bool,
) -> Result<TaskResult, RunnerError> {
    let started = Utc::now();
    let clock = Instant::now();
    record(&context.timings, &task.id, started, None);

    let scope = TaskScope::start(context.life_cycle.clone(), task.clone());
    let output = match context.executor.execute(&task, context.life_cycle.as_ref()).await {
        Ok(output) => output,
        Err(e) => {
            warn!(task = %task.id, error = %e, "task could not be executed");
            ExecutionOutput {
                code: CRASHED_EXIT_CODE,
                stdout: String::new(),
                stderr: e.to_string(),
            }
        }
    };
    scope.end(output.code);

    let duration = clock.elapsed();
    record(&context.timings, &task.id, started, Some(Utc::now()));

    let success = output.success();
    if success && cacheable {
        let entry = CacheEntry {
            hash: hash.clone(),
            task_id: task.id.clone(),
            code: output.code,
            stdout: output.stdout.clone(),
            stderr: if context.capture_stderr {
                output.stderr.clone()
            } else {
                String::new()
            },
            outputs: task.outputs.clone(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            created_at: started.to_rfc3339(),
        };
        context.cache.put(&hash, &entry).await?;
    }

    Ok(TaskResult {
        task,
        success,
        kind: if success {
            TaskEventKind::Success
        } else {
            TaskEventKind::Failure
        },
        code: Some(output.code),
        stdout: output.stdout,
        stderr: output.stderr,
        duration,
    })
}

fn record(timings: &Timings, id: &TaskId, start: DateTime<Utc>, end: Option<DateTime<Utc>>) {
    timings
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id.clone(), TaskTiming { start, end });
}
