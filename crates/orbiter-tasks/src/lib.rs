//! Orbiter Tasks - Task orchestration engine
//!
//! This crate splits requested tasks into dependency-ordered stages, runs
//! each stage with bounded parallelism, and serves repeat work from a
//! content-addressable cache with an optional remote tier.

pub mod cache;
pub mod executor;
pub mod hasher;
pub mod life_cycle;
pub mod orchestrator;
pub mod orderer;
pub mod remote;
pub mod runner;
pub mod task;

pub use cache::{CacheEntry, CacheError, CacheStats, PruneStats, TaskCache};
pub use executor::{ExecutionOutput, ExecutorError, ShellExecutor, TaskExecutor};
pub use hasher::TaskHasher;
pub use life_cycle::{
    CollectingLifeCycle, CompositeLifeCycle, LifeCycle, LifeCycleEvent, NoopLifeCycle,
    TracingLifeCycle,
};
pub use orchestrator::{
    OrchestratorOptions, TaskEventKind, TaskOrchestrator, TaskResult, TaskTiming,
};
pub use orderer::{default_dependency_configs, DependencyConfigs, OrderError, Stage, TaskOrderer};
pub use remote::{DirectoryRemoteCache, RemoteCache, RemoteCacheError};
pub use runner::{RunReport, RunnerError, RunnerOptions, TasksRunner, PERF_LOGGING_ENV};
pub use task::{Task, TaskId};
