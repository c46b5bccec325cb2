//! Stage computation for a requested task set

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument, warn};

use orbiter_core::config::{DependencyScope, TargetDependencyConfig};
use orbiter_core::ProjectGraph;

use crate::task::{Task, TaskId};

/// A set of tasks with no ordering dependency among them
pub type Stage = Vec<Task>;

/// Dependency rules keyed by the target they apply to
pub type DependencyConfigs = HashMap<String, Vec<TargetDependencyConfig>>;

/// Build the effective dependency rules for a run.
///
/// Every strictly ordered target waits on the same target in its dependency
/// projects. Entries in `overrides` replace the default for their target.
pub fn default_dependency_configs(
    strictly_ordered_targets: &[String],
    overrides: &DependencyConfigs,
) -> DependencyConfigs {
    let mut configs: DependencyConfigs = strictly_ordered_targets
        .iter()
        .map(|target| {
            (
                target.clone(),
                vec![TargetDependencyConfig {
                    target: target.clone(),
                    projects: DependencyScope::Dependencies,
                }],
            )
        })
        .collect();

    for (target, rules) in overrides {
        configs.insert(target.clone(), rules.clone());
    }
    configs
}

/// Splits requested tasks into sequential stages
pub struct TaskOrderer<'a> {
    graph: &'a ProjectGraph,
    dependency_configs: &'a DependencyConfigs,
}

impl<'a> TaskOrderer<'a> {
    /// Create an orderer over a project graph and dependency rules
    pub fn new(graph: &'a ProjectGraph, dependency_configs: &'a DependencyConfigs) -> Self {
        Self {
            graph,
            dependency_configs,
        }
    }

    /// Place each task in the earliest stage after all of its in-run
    /// prerequisites.
    ///
    /// Prerequisites that were not requested are treated as satisfied. Stage
    /// contents keep the input order. Duplicate task ids keep their first
    /// occurrence.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn split_tasks_into_stages(&self, tasks: Vec<Task>) -> Result<Vec<Stage>, OrderError> {
        let tasks = dedupe(tasks);
        let prerequisites = self.prerequisites(&tasks)?;
        let n = tasks.len();

        let mut in_degree: Vec<usize> = prerequisites.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, prereqs) in prerequisites.iter().enumerate() {
            for &p in prereqs {
                dependents[p].push(idx);
            }
        }

        let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut levels: Vec<Vec<usize>> = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = Vec::new();
            for &idx in &current {
                for &dependent in &dependents[idx] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            placed += current.len();
            levels.push(std::mem::replace(&mut current, next));
        }

        if placed < n {
            let mut cyclic: Vec<String> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| tasks[i].id.to_string())
                .collect();
            cyclic.sort();
            return Err(OrderError::CyclicDependency(cyclic.join(", ")));
        }

        let mut slots: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
        let stages: Vec<Stage> = levels
            .into_iter()
            .map(|level| level.into_iter().filter_map(|i| slots[i].take()).collect())
            .collect();

        info!(stages = stages.len(), tasks = n, "computed execution stages");
        Ok(stages)
    }

    /// Indices of each task's prerequisites within `tasks`
    fn prerequisites(&self, tasks: &[Task]) -> Result<Vec<Vec<usize>>, OrderError> {
        let index: HashMap<&TaskId, usize> =
            tasks.iter().enumerate().map(|(i, t)| (&t.id, i)).collect();

        let mut result = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !self.graph.contains(&task.id.project) {
                return Err(OrderError::UnknownProject(task.id.project.clone()));
            }

            let mut prereqs: Vec<usize> = Vec::new();
            let rules = self
                .dependency_configs
                .get(&task.id.target)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for rule in rules {
                let candidates: Vec<TaskId> = match rule.projects {
                    DependencyScope::SelfProject => {
                        vec![TaskId::new(&task.id.project, &rule.target)]
                    }
                    DependencyScope::Dependencies => self
                        .graph
                        .dependencies(&task.id.project)
                        .iter()
                        .map(|edge| TaskId::new(&edge.project, &rule.target))
                        .collect(),
                };

                for candidate in candidates {
                    if candidate == task.id {
                        continue;
                    }
                    match index.get(&candidate) {
                        Some(&i) if !prereqs.contains(&i) => prereqs.push(i),
                        Some(_) => {}
                        None => debug!(
                            task = %task.id,
                            prerequisite = %candidate,
                            "prerequisite not requested, treating as satisfied"
                        ),
                    }
                }
            }
            result.push(prereqs);
        }
        Ok(result)
    }
}

fn dedupe(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen: HashSet<TaskId> = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| {
            let fresh = seen.insert(task.id.clone());
            if !fresh {
                warn!(task = %task.id, "duplicate task requested, ignoring");
            }
            fresh
        })
        .collect()
}

/// Errors during stage computation
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// Requested tasks depend on each other in a cycle
    #[error("Cyclic dependency detected among tasks: {0}")]
    CyclicDependency(String),

    /// A task names a project missing from the project graph
    #[error("Task refers to unknown project '{0}'")]
    UnknownProject(String),
}
