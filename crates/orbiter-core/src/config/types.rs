//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Main configuration for an Orbiter workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Workspace name
    pub name: Option<String>,

    /// Workspace-level env file, relative to the workspace root
    pub env_file: PathBuf,

    /// Projects keyed by name
    pub projects: BTreeMap<String, ProjectConfig>,

    /// Per-target dependency rules, overriding the defaults derived from
    /// `tasks_runner.strictly_ordered_targets`
    pub target_dependencies: HashMap<String, Vec<TargetDependencyConfig>>,

    /// Task runner configuration
    pub tasks_runner: TasksRunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: None,
            name: None,
            env_file: PathBuf::from(".env"),
            projects: BTreeMap::new(),
            target_dependencies: HashMap::new(),
            tasks_runner: TasksRunnerConfig::default(),
        }
    }
}

impl Config {
    /// Look up a project by name
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }

    /// Names of every project that defines the given target
    pub fn projects_with_target(&self, target: &str) -> Vec<&str> {
        self.projects
            .iter()
            .filter(|(_, p)| p.targets.contains_key(target))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A project in the workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root, relative to the workspace root
    pub root: PathBuf,

    /// Declared dependencies on other projects
    pub dependencies: Vec<ProjectDependencyConfig>,

    /// Shorthand for dependencies of kind `implicit`
    pub implicit_dependencies: Vec<String>,

    /// Targets this project can run
    pub targets: BTreeMap<String, TargetConfig>,
}

/// A declared edge to another project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDependencyConfig {
    /// Name of the project depended upon
    pub project: String,

    /// Edge kind
    #[serde(default)]
    pub kind: DependencyKind,
}

/// Kind of a project dependency edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Import known at build time
    #[default]
    Static,
    /// Lazily loaded import
    Dynamic,
    /// Declared by hand, not derived from sources
    Implicit,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Implicit => "implicit",
        }
    }
}

/// A runnable target of a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Single shell command
    pub command: Option<String>,

    /// Several shell commands, run in order
    pub commands: Vec<String>,

    /// Working directory relative to the workspace root (default: project root)
    pub cwd: Option<PathBuf>,

    /// Env file layered over the workspace env file
    pub env_file: Option<PathBuf>,

    /// Input globs relative to the project root (default: the whole project)
    pub inputs: Vec<String>,

    /// Output paths relative to the workspace root, captured into the cache
    pub outputs: Vec<String>,

    /// Resolved options, folded into the cache hash
    pub options: BTreeMap<String, serde_json::Value>,
}

impl TargetConfig {
    /// All commands of this target, `command` first
    pub fn all_commands(&self) -> Vec<String> {
        self.command
            .iter()
            .chain(self.commands.iter())
            .cloned()
            .collect()
    }
}

/// Rule stating that a target must wait on another target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDependencyConfig {
    /// Target that must complete first
    pub target: String,

    /// Which projects the rule applies to
    pub projects: DependencyScope,
}

/// Scope of a target dependency rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    /// The same project
    #[serde(rename = "self")]
    SelfProject,
    /// Every project the task's project depends on
    Dependencies,
}

/// Task runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksRunnerConfig {
    /// Run tasks of a stage concurrently
    pub parallel: bool,

    /// Maximum concurrent tasks when `parallel` is set (0 = unlimited)
    pub max_parallel: usize,

    /// Targets whose results may be cached
    pub cacheable_operations: Vec<String>,

    /// Additional cacheable targets
    pub cacheable_targets: Vec<String>,

    /// Environment variable names folded into every cache hash
    pub runtime_cache_inputs: Vec<String>,

    /// Targets that must complete on dependency projects first
    pub strictly_ordered_targets: Vec<String>,

    /// Local cache directory, relative to the workspace root
    pub cache_directory: PathBuf,

    /// Persist stderr in cache entries
    pub capture_stderr: bool,

    /// Bypass the cache entirely
    pub skip_cache: bool,

    /// Report per-task timings after a run
    pub perf_logging: bool,

    /// Optional remote cache
    pub remote_cache: Option<RemoteCacheConfig>,
}

impl Default for TasksRunnerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallel: 3,
            cacheable_operations: vec!["build".to_string(), "lint".to_string(), "test".to_string()],
            cacheable_targets: Vec::new(),
            runtime_cache_inputs: Vec::new(),
            strictly_ordered_targets: vec!["build".to_string()],
            cache_directory: PathBuf::from(".orbiter/cache"),
            capture_stderr: true,
            skip_cache: false,
            perf_logging: false,
            remote_cache: None,
        }
    }
}

impl TasksRunnerConfig {
    /// Union of `cacheable_operations` and `cacheable_targets`
    pub fn cacheable(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .cacheable_operations
            .iter()
            .chain(self.cacheable_targets.iter())
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

/// Remote cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Shared directory (e.g. a network mount) holding cache entries
    pub directory: PathBuf,
}
