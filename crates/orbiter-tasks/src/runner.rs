//! Run entry point: stages in sequence, skipping the rest after a failure

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use orbiter_core::config::{Config, TargetDependencyConfig};
use orbiter_core::ProjectGraph;

use crate::cache::{CacheError, TaskCache};
use crate::executor::{ShellExecutor, TaskExecutor};
use crate::hasher::TaskHasher;
use crate::life_cycle::{LifeCycle, NoopLifeCycle};
use crate::orchestrator::{OrchestratorOptions, TaskOrchestrator, TaskResult};
use crate::orderer::{default_dependency_configs, OrderError, Stage, TaskOrderer};
use crate::remote::{DirectoryRemoteCache, RemoteCache};
use crate::task::Task;

/// Environment variable that turns on the timing report
pub const PERF_LOGGING_ENV: &str = "ORBITER_PERF_LOGGING";

/// Settings for a whole run
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Workspace root; relative paths below resolve against it
    pub workspace_root: PathBuf,
    /// Run tasks within a stage concurrently
    pub parallel: bool,
    /// Concurrency limit when parallel; 0 means unlimited
    pub max_parallel: usize,
    /// Targets whose results are cached
    pub cacheable: Vec<String>,
    /// Environment variables folded into task hashes
    pub runtime_cache_inputs: Vec<String>,
    /// Targets that wait on the same target in dependency projects
    pub strictly_ordered_targets: Vec<String>,
    /// Per-target dependency rules replacing the defaults
    pub target_dependencies: HashMap<String, Vec<TargetDependencyConfig>>,
    /// Local cache directory
    pub cache_directory: PathBuf,
    /// Persist stderr in cache entries
    pub capture_stderr: bool,
    /// Neither read nor write the cache
    pub skip_cache: bool,
    /// Produce a timing report after a successful run
    pub perf_logging: bool,
    /// Workspace-level env file
    pub env_file: PathBuf,
    /// Declared outputs of every target, relative to the workspace root.
    /// Kept out of source hashes so a build never invalidates itself.
    pub output_paths: Vec<PathBuf>,
}

impl RunnerOptions {
    /// Options for a workspace, taken from its configuration
    pub fn from_config(config: &Config, workspace_root: impl Into<PathBuf>) -> Self {
        let runner = &config.tasks_runner;
        Self {
            workspace_root: workspace_root.into(),
            parallel: runner.parallel,
            max_parallel: runner.max_parallel,
            cacheable: runner.cacheable(),
            runtime_cache_inputs: runner.runtime_cache_inputs.clone(),
            strictly_ordered_targets: runner.strictly_ordered_targets.clone(),
            target_dependencies: config.target_dependencies.clone(),
            cache_directory: runner.cache_directory.clone(),
            capture_stderr: runner.capture_stderr,
            skip_cache: runner.skip_cache,
            perf_logging: runner.perf_logging || std::env::var_os(PERF_LOGGING_ENV).is_some(),
            env_file: config.env_file.clone(),
            output_paths: declared_outputs(config),
        }
    }

    /// Absolute cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.cache_directory)
    }
}

fn declared_outputs(config: &Config) -> Vec<PathBuf> {
    let mut outputs: Vec<PathBuf> = config
        .projects
        .values()
        .flat_map(|project| project.targets.values())
        .flat_map(|target| target.outputs.iter().map(PathBuf::from))
        .collect();
    outputs.sort();
    outputs.dedup();
    outputs
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One result per requested task, in emission order
    pub results: Vec<TaskResult>,
    /// Task id to duration in milliseconds, when perf logging is on and
    /// every task succeeded
    pub timings: Option<BTreeMap<String, Option<i64>>>,
}

impl RunReport {
    /// Whether every task succeeded
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Drives a run from requested tasks to a result stream
pub struct TasksRunner {
    graph: Arc<ProjectGraph>,
    options: RunnerOptions,
    life_cycle: Arc<dyn LifeCycle>,
    executor: Arc<dyn TaskExecutor>,
    remote_cache: Option<Arc<dyn RemoteCache>>,
}

impl TasksRunner {
    /// Create a runner with the shell executor and no life-cycle listener
    pub fn new(graph: Arc<ProjectGraph>, options: RunnerOptions) -> Self {
        let executor = ShellExecutor::new(&options.workspace_root).with_env_file(&options.env_file);
        Self {
            graph,
            options,
            life_cycle: Arc::new(NoopLifeCycle),
            executor: Arc::new(executor),
            remote_cache: None,
        }
    }

    /// Build a runner for a loaded workspace
    pub fn from_config(
        config: &Config,
        workspace_root: impl Into<PathBuf>,
    ) -> orbiter_core::Result<Self> {
        let workspace_root = workspace_root.into();
        let graph = Arc::new(ProjectGraph::from_config(config)?);
        let mut runner = Self::new(graph, RunnerOptions::from_config(config, &workspace_root));
        if let Some(remote) = &config.tasks_runner.remote_cache {
            runner = runner.with_remote_cache(Arc::new(DirectoryRemoteCache::new(
                workspace_root.join(&remote.directory),
            )));
        }
        Ok(runner)
    }

    pub fn with_life_cycle(mut self, life_cycle: Arc<dyn LifeCycle>) -> Self {
        self.life_cycle = life_cycle;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_remote_cache(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Compute stages without running anything
    pub fn stages(&self, tasks: Vec<Task>) -> Result<Vec<Stage>, RunnerError> {
        let configs = default_dependency_configs(
            &self.options.strictly_ordered_targets,
            &self.options.target_dependencies,
        );
        Ok(TaskOrderer::new(&self.graph, &configs).split_tasks_into_stages(tasks)?)
    }

    /// Run all tasks, collecting every result
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunReport, RunnerError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timings = self.drive(tasks, tx).await?;

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        Ok(RunReport { results, timings })
    }

    /// Run all tasks in the background, delivering results as each stage
    /// settles. The handle resolves to the timing report.
    pub fn spawn(
        self: Arc<Self>,
        tasks: Vec<Task>,
    ) -> (
        mpsc::UnboundedReceiver<TaskResult>,
        JoinHandle<Result<Option<BTreeMap<String, Option<i64>>>, RunnerError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { self.drive(tasks, tx).await });
        (rx, handle)
    }

    #[instrument(skip_all, fields(tasks = tasks.len()))]
    async fn drive(
        &self,
        tasks: Vec<Task>,
        tx: mpsc::UnboundedSender<TaskResult>,
    ) -> Result<Option<BTreeMap<String, Option<i64>>>, RunnerError> {
        let stages = self.stages(tasks).map_err(|e| {
            error!(error = %e, "cannot order tasks");
            e
        })?;
        let orchestrator = self.orchestrator(stages.iter().flatten());

        let mut remaining = stages.into_iter().enumerate();
        while let Some((index, stage)) = remaining.next() {
            info!(stage = index, tasks = stage.len(), "starting stage");
            let results = orchestrator
                .run(stage)
                .await
                .map_err(|e| {
                    error!(stage = index, error = %e, "stage aborted");
                    e
                })?;

            let failed = results.iter().any(|r| !r.success);
            for result in results {
                let _ = tx.send(result);
            }

            if failed {
                info!(stage = index, "stage failed, skipping remaining stages");
                for (_, stage) in remaining.by_ref() {
                    for task in stage {
                        let _ = tx.send(TaskResult::dependency_failed(task));
                    }
                }
                return Ok(None);
            }
        }

        if !self.options.perf_logging {
            return Ok(None);
        }
        let report: BTreeMap<String, Option<i64>> = orchestrator
            .timings()
            .into_iter()
            .map(|(id, timing)| (id.to_string(), timing.duration_ms()))
            .collect();
        info!(
            timings = %serde_json::to_string(&report).unwrap_or_default(),
            "task timings"
        );
        Ok(Some(report))
    }

    fn orchestrator<'t>(&self, tasks: impl Iterator<Item = &'t Task>) -> TaskOrchestrator {
        let options = &self.options;
        let cache_dir = options.cache_dir();

        let excluded = std::iter::once(cache_dir.clone())
            .chain(options.output_paths.iter().cloned())
            .chain(tasks.flat_map(|t| t.outputs.iter().map(PathBuf::from)));
        let hasher = TaskHasher::new(
            &options.workspace_root,
            self.graph.clone(),
            options.runtime_cache_inputs.clone(),
        )
        .with_excluded(excluded);

        let mut cache = TaskCache::new(cache_dir, &options.workspace_root);
        if let Some(remote) = &self.remote_cache {
            cache = cache.with_remote(remote.clone());
        }

        TaskOrchestrator::new(
            OrchestratorOptions {
                parallel: options.parallel,
                max_parallel: options.max_parallel,
                cacheable: options.cacheable.iter().cloned().collect(),
                capture_stderr: options.capture_stderr,
                skip_cache: options.skip_cache,
            },
            Arc::new(hasher),
            Arc::new(cache),
            self.executor.clone(),
            self.life_cycle.clone(),
        )
    }
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Tasks could not be ordered
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The local cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A task's execution crashed
    #[error("Task {task} crashed: {message}")]
    TaskPanicked { task: String, message: String },

    /// Hashing could not complete
    #[error("Failed to hash tasks: {0}")]
    Hashing(String),

    /// The execution slot pool was closed
    #[error("Execution slots are no longer available")]
    SlotsClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionOutput, ExecutorError};
    use crate::life_cycle::CollectingLifeCycle;
    use crate::orchestrator::TaskEventKind;
    use async_trait::async_trait;
    use orbiter_core::config::{DependencyKind, ProjectConfig, TargetConfig};
    use orbiter_core::DependencyEdge;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Executor that records spawned tasks and fails the listed projects
    #[derive(Default)]
    struct RecordingExecutor {
        failing: Vec<String>,
        spawned: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn failing(projects: &[&str]) -> Self {
            Self {
                failing: projects.iter().map(|p| p.to_string()).collect(),
                spawned: Mutex::new(Vec::new()),
            }
        }

        fn spawned(&self) -> Vec<String> {
            self.spawned.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(
            &self,
            task: &Task,
            _life_cycle: &dyn LifeCycle,
        ) -> Result<ExecutionOutput, ExecutorError> {
            self.spawned.lock().unwrap().push(task.id.to_string());
            let code = i32::from(self.failing.contains(&task.id.project));
            Ok(ExecutionOutput {
                code,
                ..Default::default()
            })
        }
    }

    fn chain_graph() -> Arc<ProjectGraph> {
        let edge = |p: &str| DependencyEdge {
            project: p.to_string(),
            kind: DependencyKind::Static,
        };
        Arc::new(
            ProjectGraph::from_nodes(vec![
                ("a".to_string(), PathBuf::from("a"), vec![]),
                ("b".to_string(), PathBuf::from("b"), vec![edge("a")]),
                ("c".to_string(), PathBuf::from("c"), vec![edge("b")]),
            ])
            .unwrap(),
        )
    }

    fn options(root: &TempDir) -> RunnerOptions {
        RunnerOptions::from_config(&Config::default(), root.path())
    }

    fn chain_tasks() -> Vec<Task> {
        vec![
            Task::new("c", "build"),
            Task::new("b", "build"),
            Task::new("a", "build"),
        ]
    }

    #[tokio::test]
    async fn test_failure_skips_later_stages() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::failing(&["a"]));
        let runner = TasksRunner::new(chain_graph(), options(&temp)).with_executor(executor.clone());

        let report = runner.run(chain_tasks()).await.unwrap();

        let kinds: Vec<(String, TaskEventKind)> = report
            .results
            .iter()
            .map(|r| (r.task.id.to_string(), r.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a:build".to_string(), TaskEventKind::Failure),
                ("b:build".to_string(), TaskEventKind::DependencyFailed),
                ("c:build".to_string(), TaskEventKind::DependencyFailed),
            ]
        );
        assert_eq!(executor.spawned(), vec!["a:build"]);
        assert!(!report.success());
        assert!(report.timings.is_none());
    }

    #[tokio::test]
    async fn test_successful_run_covers_every_task() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let life_cycle = Arc::new(CollectingLifeCycle::default());
        let runner = TasksRunner::new(chain_graph(), options(&temp))
            .with_executor(executor.clone())
            .with_life_cycle(life_cycle.clone());

        let report = runner.run(chain_tasks()).await.unwrap();

        assert!(report.success());
        assert_eq!(report.results.len(), 3);
        assert_eq!(executor.spawned(), vec!["a:build", "b:build", "c:build"]);
        assert_eq!(life_cycle.ended().len(), 3);
    }

    #[tokio::test]
    async fn test_perf_logging_reports_timings() {
        let temp = TempDir::new().unwrap();
        let mut opts = options(&temp);
        opts.perf_logging = true;
        let runner = TasksRunner::new(chain_graph(), opts)
            .with_executor(Arc::new(RecordingExecutor::default()));

        let report = runner.run(chain_tasks()).await.unwrap();

        let timings = report.timings.unwrap();
        assert_eq!(timings.len(), 3);
        assert!(timings.values().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_spawn_streams_results() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(
            TasksRunner::new(chain_graph(), options(&temp))
                .with_executor(Arc::new(RecordingExecutor::failing(&["b"]))),
        );

        let (mut rx, handle) = runner.spawn(chain_tasks());
        let mut seen = Vec::new();
        while let Some(result) = rx.recv().await {
            seen.push((result.task.id.project.clone(), result.kind));
        }
        handle.await.unwrap().unwrap();

        assert_eq!(
            seen,
            vec![
                ("a".to_string(), TaskEventKind::Success),
                ("b".to_string(), TaskEventKind::Failure),
                ("c".to_string(), TaskEventKind::DependencyFailed),
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_is_fatal_before_execution() {
        let temp = TempDir::new().unwrap();
        let edge = |p: &str| DependencyEdge {
            project: p.to_string(),
            kind: DependencyKind::Static,
        };
        let graph = Arc::new(
            ProjectGraph::from_nodes(vec![
                ("a".to_string(), PathBuf::from("a"), vec![edge("b")]),
                ("b".to_string(), PathBuf::from("b"), vec![edge("a")]),
            ])
            .unwrap(),
        );
        let executor = Arc::new(RecordingExecutor::default());
        let runner = TasksRunner::new(graph, options(&temp)).with_executor(executor.clone());

        let err = runner
            .run(vec![Task::new("a", "build"), Task::new("b", "build")])
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Order(OrderError::CyclicDependency(_))));
        assert!(executor.spawned().is_empty());
    }

    /// Executor that writes a fresh artifact into `<project>/dist` on every run
    struct ArtifactExecutor {
        root: PathBuf,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskExecutor for ArtifactExecutor {
        async fn execute(
            &self,
            task: &Task,
            _life_cycle: &dyn LifeCycle,
        ) -> Result<ExecutionOutput, ExecutorError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let dist = self.root.join(&task.project_root).join("dist");
            std::fs::create_dir_all(&dist).unwrap();
            std::fs::write(dist.join("out.txt"), format!("build {run}")).unwrap();
            Ok(ExecutionOutput::default())
        }
    }

    #[tokio::test]
    async fn test_outputs_under_project_root_do_not_invalidate_cache() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("app/src")).unwrap();
        std::fs::write(temp.path().join("app/src/main.rs"), "fn main() {}").unwrap();
        let graph = Arc::new(
            ProjectGraph::from_nodes(vec![("app".to_string(), PathBuf::from("app"), vec![])])
                .unwrap(),
        );
        let executor = Arc::new(ArtifactExecutor {
            root: temp.path().to_path_buf(),
            runs: AtomicUsize::new(0),
        });
        let runner = TasksRunner::new(graph, options(&temp)).with_executor(executor.clone());
        let build = || {
            vec![Task::new("app", "build")
                .with_root("app")
                .with_outputs(vec!["app/dist".to_string()])]
        };

        let first = runner.run(build()).await.unwrap();
        let second = runner.run(build()).await.unwrap();

        assert_eq!(first.results[0].kind, TaskEventKind::Success);
        assert_eq!(second.results[0].kind, TaskEventKind::CacheHit);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        let restored = std::fs::read_to_string(temp.path().join("app/dist/out.txt")).unwrap();
        assert_eq!(restored, "build 1");
    }

    #[test]
    fn test_options_collect_declared_outputs() {
        let mut config = Config::default();
        for (name, output) in [("core", "libs/core/dist"), ("app", "apps/app/dist")] {
            let mut project = ProjectConfig::default();
            project.targets.insert(
                "build".to_string(),
                TargetConfig {
                    command: Some("true".to_string()),
                    outputs: vec![output.to_string()],
                    ..Default::default()
                },
            );
            config.projects.insert(name.to_string(), project);
        }

        let options = RunnerOptions::from_config(&config, "/ws");
        assert_eq!(
            options.output_paths,
            vec![PathBuf::from("apps/app/dist"), PathBuf::from("libs/core/dist")]
        );
    }

    #[tokio::test]
    async fn test_shell_run_end_to_end() {
        let temp = TempDir::new().unwrap();
        for dir in ["a", "b", "c"] {
            std::fs::create_dir_all(temp.path().join(dir)).unwrap();
        }
        let tasks = vec![
            Task::new("a", "build").with_root("a").with_command("echo built-a"),
            Task::new("b", "build").with_root("b").with_command("exit 1"),
            Task::new("c", "build").with_root("c").with_command("echo built-c"),
        ];
        let runner = TasksRunner::new(chain_graph(), options(&temp));

        let report = runner.run(tasks).await.unwrap();

        assert_eq!(report.results[0].stdout, "built-a\n");
        assert_eq!(report.results[1].code, Some(1));
        assert_eq!(report.results[2].kind, TaskEventKind::DependencyFailed);
    }
}
