//! Task types and definitions

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use orbiter_core::config::Config;
use orbiter_core::interpolate::interpolate_args;
use orbiter_core::GraphError;

/// Unique identifier for a task within a run
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Project name
    pub project: String,
    /// Target name (e.g., "build", "test", "lint")
    pub target: String,
}

impl TaskId {
    /// Create a new task ID
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            target: target.into(),
        }
    }

    /// Parse a task ID from "project:target" format
    pub fn parse(s: &str) -> Option<Self> {
        let (project, target) = s.split_once(':')?;
        if project.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self::new(project, target))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.target)
    }
}

/// One unit of work: a target on a project, with resolved options.
///
/// Tasks are never mutated once created; the cache hash is filled in lazily
/// the first time it is computed.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Shell commands, with `{args.*}` placeholders already resolved
    pub commands: Vec<String>,
    /// Project root relative to the workspace root
    pub project_root: PathBuf,
    /// Working directory relative to the workspace root
    pub cwd: PathBuf,
    /// Env file layered over the workspace env file
    pub env_file: Option<PathBuf>,
    /// Input globs relative to the project root
    pub inputs: Vec<String>,
    /// Output paths relative to the workspace root
    pub outputs: Vec<String>,
    /// Resolved options
    pub options: BTreeMap<String, serde_json::Value>,
    /// CLI-supplied overrides
    pub overrides: BTreeMap<String, String>,
    hash: OnceLock<String>,
}

impl Task {
    /// Create a new task with no commands, rooted at the project name
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        let id = TaskId::new(project, target);
        let root = PathBuf::from(&id.project);
        Self {
            id,
            commands: Vec::new(),
            project_root: root.clone(),
            cwd: root,
            env_file: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            options: BTreeMap::new(),
            overrides: BTreeMap::new(),
            hash: OnceLock::new(),
        }
    }

    /// Resolve a task from workspace configuration.
    ///
    /// `{args.<name>}` placeholders in the target's commands are replaced
    /// with matching overrides.
    pub fn from_config(
        config: &Config,
        project: &str,
        target: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, GraphError> {
        let project_config = config
            .project(project)
            .ok_or_else(|| GraphError::UnknownProject(project.to_string()))?;
        let target_config =
            project_config
                .targets
                .get(target)
                .ok_or_else(|| GraphError::UnknownTarget {
                    project: project.to_string(),
                    target: target.to_string(),
                })?;

        let commands = target_config
            .all_commands()
            .iter()
            .map(|c| interpolate_args(c, overrides))
            .collect();

        Ok(Self {
            id: TaskId::new(project, target),
            commands,
            project_root: project_config.root.clone(),
            cwd: target_config
                .cwd
                .clone()
                .unwrap_or_else(|| project_config.root.clone()),
            env_file: target_config.env_file.clone(),
            inputs: target_config.inputs.clone(),
            outputs: target_config.outputs.clone(),
            options: target_config.options.clone(),
            overrides: overrides.clone(),
            hash: OnceLock::new(),
        })
    }

    /// Set the project root (also used as the working directory)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self.cwd = self.project_root.clone();
        self
    }

    /// Add a command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Set output paths
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set an option value
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Set the env file
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// The cache hash, if it has been computed
    pub fn hash(&self) -> Option<&str> {
        self.hash.get().map(String::as_str)
    }

    /// Return the cache hash, computing it with `compute` on first use
    pub(crate) fn hash_or_init(&self, compute: impl FnOnce() -> String) -> &str {
        self.hash.get_or_init(compute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbiter_core::config::{ProjectConfig, TargetConfig};

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("core", "build");
        assert_eq!(id.to_string(), "core:build");
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::parse("core:build").unwrap();
        assert_eq!(id.project, "core");
        assert_eq!(id.target, "build");
        assert!(TaskId::parse("nobuild").is_none());
        assert!(TaskId::parse(":build").is_none());
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("app", "build")
            .with_root("apps/app")
            .with_command("make")
            .with_outputs(vec!["dist/apps/app".to_string()]);

        assert_eq!(task.cwd, PathBuf::from("apps/app"));
        assert_eq!(task.commands, vec!["make"]);
        assert!(task.hash().is_none());
    }

    #[test]
    fn test_hash_is_computed_once() {
        let task = Task::new("app", "build");
        assert_eq!(task.hash_or_init(|| "first".to_string()), "first");
        assert_eq!(task.hash_or_init(|| "second".to_string()), "first");
        assert_eq!(task.hash(), Some("first"));
    }

    #[test]
    fn test_from_config_interpolates_overrides() {
        let mut config = Config::default();
        let mut project = ProjectConfig {
            root: "apps/myapp".into(),
            ..Default::default()
        };
        project.targets.insert(
            "echo".to_string(),
            TargetConfig {
                commands: vec![
                    "echo 'print: {args.var1}'".to_string(),
                    "echo 'print: {args.var2}'".to_string(),
                ],
                ..Default::default()
            },
        );
        config.projects.insert("myapp".to_string(), project);

        let mut overrides = BTreeMap::new();
        overrides.insert("var1".to_string(), "x".to_string());
        overrides.insert("var2".to_string(), "y".to_string());

        let task = Task::from_config(&config, "myapp", "echo", &overrides).unwrap();
        assert_eq!(task.commands, vec!["echo 'print: x'", "echo 'print: y'"]);
        assert_eq!(task.cwd, PathBuf::from("apps/myapp"));
        assert_eq!(task.overrides, overrides);
    }

    #[test]
    fn test_from_config_unknown_target() {
        let mut config = Config::default();
        config
            .projects
            .insert("myapp".to_string(), ProjectConfig::default());

        let err = Task::from_config(&config, "myapp", "deploy", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTarget { .. }));
        assert!(Task::from_config(&config, "ghost", "build", &BTreeMap::new()).is_err());
    }
}
