//! Project dependency graph
//!
//! An immutable, pre-resolved adjacency structure built once per run from the
//! workspace configuration. Nothing in a run mutates it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{Config, DependencyKind};
use crate::error::{GraphError, Result};

/// A dependency edge to another project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Project depended upon
    pub project: String,
    /// Edge kind
    pub kind: DependencyKind,
}

/// A node in the project graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNode {
    /// Project name
    pub name: String,
    /// Project root relative to the workspace root
    pub root: PathBuf,
    /// Outgoing edges, in declaration order
    pub dependencies: Vec<DependencyEdge>,
    /// Projects that depend on this project
    pub dependents: Vec<String>,
}

/// Dependency graph for workspace projects
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    nodes: HashMap<String, ProjectNode>,
}

impl ProjectGraph {
    /// Build the graph from workspace configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut graph = Self::default();

        for (name, project) in &config.projects {
            let mut edges: Vec<DependencyEdge> = project
                .dependencies
                .iter()
                .map(|d| DependencyEdge {
                    project: d.project.clone(),
                    kind: d.kind,
                })
                .collect();
            for implicit in &project.implicit_dependencies {
                if !edges.iter().any(|e| &e.project == implicit) {
                    edges.push(DependencyEdge {
                        project: implicit.clone(),
                        kind: DependencyKind::Implicit,
                    });
                }
            }
            graph.add_project(name, &project.root, edges);
        }

        graph.link()?;
        Ok(graph)
    }

    /// Build a graph directly from `(name, root, edges)` triples
    pub fn from_nodes<I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, PathBuf, Vec<DependencyEdge>)>,
    {
        let mut graph = Self::default();
        for (name, root, edges) in nodes {
            graph.add_project(&name, &root, edges);
        }
        graph.link()?;
        Ok(graph)
    }

    fn add_project(&mut self, name: &str, root: &Path, dependencies: Vec<DependencyEdge>) {
        self.nodes.insert(
            name.to_string(),
            ProjectNode {
                name: name.to_string(),
                root: root.to_path_buf(),
                dependencies,
                dependents: Vec::new(),
            },
        );
    }

    /// Verify every edge target exists and fill in reverse edges
    fn link(&mut self) -> Result<()> {
        let mut reverse: Vec<(String, String)> = Vec::new();
        for node in self.nodes.values() {
            for edge in &node.dependencies {
                if !self.nodes.contains_key(&edge.project) {
                    return Err(GraphError::UnknownDependency {
                        project: node.name.clone(),
                        dependency: edge.project.clone(),
                    }
                    .into());
                }
                reverse.push((edge.project.clone(), node.name.clone()));
            }
        }

        for (dependency, dependent) in reverse {
            if let Some(node) = self.nodes.get_mut(&dependency) {
                node.dependents.push(dependent);
            }
        }
        for node in self.nodes.values_mut() {
            node.dependents.sort();
            node.dependents.dedup();
        }
        Ok(())
    }

    /// Get a project node
    pub fn get(&self, name: &str) -> Option<&ProjectNode> {
        self.nodes.get(name)
    }

    /// Whether the project exists
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Number of projects
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no projects
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Project names, sorted
    pub fn project_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Direct dependency edges of a project, in declaration order
    pub fn dependencies(&self, name: &str) -> &[DependencyEdge] {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Projects that directly depend on a project
    pub fn dependents(&self, name: &str) -> HashSet<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All transitive dependencies of a project, sorted by name
    pub fn transitive_dependencies(&self, name: &str) -> Vec<String> {
        let mut deps: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);

        while let Some(current) = queue.pop_front() {
            for edge in self.dependencies(current) {
                if edge.project != name && deps.insert(edge.project.clone()) {
                    queue.push_back(&edge.project);
                }
            }
        }

        deps.into_iter().collect()
    }

    /// Cycles in the project graph.
    ///
    /// Project-level cycles are allowed; only cycles among requested tasks
    /// are an error. This is reported for diagnostics.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.name.as_str(), n.dependencies.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut resolved: HashSet<&str> = HashSet::new();

        while let Some(name) = queue.pop_front() {
            resolved.insert(name);
            if let Some(node) = self.nodes.get(name) {
                for dependent in &node.dependents {
                    let edges = self.nodes[dependent]
                        .dependencies
                        .iter()
                        .filter(|e| e.project == name)
                        .count();
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(edges);
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        let mut cyclic: Vec<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|n| !resolved.contains(n))
            .collect();
        cyclic.sort_unstable();

        let mut cycles: Vec<Vec<String>> = Vec::new();
        for start in &cyclic {
            if cycles.iter().any(|c| c.iter().any(|n| n == start)) {
                continue;
            }
            if let Some(cycle) = self.find_cycle(start, &cyclic) {
                cycles.push(cycle);
            }
        }
        cycles
    }

    fn find_cycle(&self, start: &str, cyclic: &[&str]) -> Option<Vec<String>> {
        fn dfs(
            graph: &ProjectGraph,
            current: &str,
            start: &str,
            visited: &mut HashSet<String>,
            path: &mut Vec<String>,
            cyclic: &[&str],
        ) -> bool {
            if current == start && !path.is_empty() {
                return true;
            }
            if !cyclic.contains(&current) || !visited.insert(current.to_string()) {
                return false;
            }

            path.push(current.to_string());
            for edge in graph.dependencies(current) {
                if dfs(graph, &edge.project, start, visited, path, cyclic) {
                    return true;
                }
            }
            path.pop();
            false
        }

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        dfs(self, start, start, &mut visited, &mut path, cyclic).then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, ProjectDependencyConfig};

    fn edge(project: &str) -> DependencyEdge {
        DependencyEdge {
            project: project.to_string(),
            kind: DependencyKind::Static,
        }
    }

    fn sample_graph() -> ProjectGraph {
        ProjectGraph::from_nodes(vec![
            ("core".to_string(), PathBuf::from("libs/core"), vec![]),
            ("utils".to_string(), PathBuf::from("libs/utils"), vec![edge("core")]),
            (
                "app".to_string(),
                PathBuf::from("apps/app"),
                vec![edge("utils"), edge("core")],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_dependencies_keep_declaration_order() {
        let graph = sample_graph();
        let deps: Vec<&str> = graph
            .dependencies("app")
            .iter()
            .map(|e| e.project.as_str())
            .collect();
        assert_eq!(deps, vec!["utils", "core"]);
        assert!(graph.dependencies("missing").is_empty());
    }

    #[test]
    fn test_dependents() {
        let graph = sample_graph();
        let core_dependents = graph.dependents("core");
        assert!(core_dependents.contains("utils"));
        assert!(core_dependents.contains("app"));
        assert!(graph.dependents("app").is_empty());
    }

    #[test]
    fn test_transitive_dependencies() {
        let graph = sample_graph();
        assert_eq!(graph.transitive_dependencies("app"), vec!["core", "utils"]);
        assert_eq!(graph.transitive_dependencies("utils"), vec!["core"]);
        assert!(graph.transitive_dependencies("core").is_empty());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = ProjectGraph::from_nodes(vec![(
            "app".to_string(),
            PathBuf::from("app"),
            vec![edge("ghost")],
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_merges_implicit_dependencies() {
        let mut config = Config::default();
        config.projects.insert("core".to_string(), ProjectConfig::default());
        config.projects.insert("docs".to_string(), ProjectConfig::default());
        config.projects.insert(
            "app".to_string(),
            ProjectConfig {
                root: "apps/app".into(),
                dependencies: vec![ProjectDependencyConfig {
                    project: "core".to_string(),
                    kind: DependencyKind::Static,
                }],
                implicit_dependencies: vec!["docs".to_string(), "core".to_string()],
                ..Default::default()
            },
        );

        let graph = ProjectGraph::from_config(&config).unwrap();
        let deps = graph.dependencies("app");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].kind, DependencyKind::Static);
        assert_eq!(deps[1].project, "docs");
        assert_eq!(deps[1].kind, DependencyKind::Implicit);
        assert_eq!(graph.get("app").unwrap().root, PathBuf::from("apps/app"));
    }

    #[test]
    fn test_cycle_detection() {
        let graph = ProjectGraph::from_nodes(vec![
            ("a".to_string(), PathBuf::from("a"), vec![edge("b")]),
            ("b".to_string(), PathBuf::from("b"), vec![edge("c")]),
            ("c".to_string(), PathBuf::from("c"), vec![edge("a")]),
            ("d".to_string(), PathBuf::from("d"), vec![]),
        ])
        .unwrap();

        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a", "b", "c"]);
        assert!(sample_graph().cycles().is_empty());
    }
}
