//! Task hashing
//!
//! A task's hash covers its identity, commands, options and overrides, the
//! source files of its project and of every project in its dependency
//! closure, and the values of declared runtime cache inputs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use orbiter_core::ProjectGraph;

use crate::task::Task;

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Computes and memoizes task hashes
pub struct TaskHasher {
    workspace_root: PathBuf,
    graph: Arc<ProjectGraph>,
    runtime_cache_inputs: Vec<String>,
    excluded: Vec<PathBuf>,
    project_hashes: Mutex<HashMap<String, String>>,
}

impl TaskHasher {
    /// Create a hasher for a workspace
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        graph: Arc<ProjectGraph>,
        runtime_cache_inputs: Vec<String>,
    ) -> Self {
        let mut runtime_cache_inputs = runtime_cache_inputs;
        runtime_cache_inputs.sort();
        runtime_cache_inputs.dedup();
        Self {
            workspace_root: workspace_root.into(),
            graph,
            runtime_cache_inputs,
            excluded: Vec::new(),
            project_hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Exclude paths (relative to the workspace root, or absolute) from
    /// source hashing
    pub fn with_excluded(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let root = self.workspace_root.clone();
        self.excluded
            .extend(paths.into_iter().map(|p| if p.is_absolute() { p } else { root.join(p) }));
        self
    }

    /// Hash a task, reusing a previously computed value
    pub fn hash_task<'t>(&self, task: &'t Task) -> &'t str {
        task.hash_or_init(|| self.compute(task))
    }

    fn compute(&self, task: &Task) -> String {
        let mut hasher = Sha256::new();

        hasher.update(task.id.project.as_bytes());
        hasher.update(b":");
        hasher.update(task.id.target.as_bytes());

        for command in &task.commands {
            hasher.update(b"\0cmd:");
            hasher.update(command.as_bytes());
        }
        hasher.update(b"\0cwd:");
        hasher.update(task.cwd.to_string_lossy().as_bytes());

        // BTreeMaps serialize with sorted keys
        hasher.update(b"\0options:");
        hasher.update(serde_json::to_string(&task.options).unwrap_or_default().as_bytes());
        for (key, value) in &task.overrides {
            hasher.update(b"\0override:");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        hasher.update(b"\0sources:");
        if task.inputs.is_empty() {
            hasher.update(self.project_source_hash(&task.id.project).as_bytes());
        } else {
            let root = self.workspace_root.join(&task.project_root);
            hasher.update(self.hash_inputs(&root, &task.inputs).as_bytes());
        }

        for dependency in self.graph.transitive_dependencies(&task.id.project) {
            hasher.update(b"\0dep:");
            hasher.update(dependency.as_bytes());
            hasher.update(self.project_source_hash(&dependency).as_bytes());
        }

        if let Some(env_file) = &task.env_file {
            if let Ok(contents) = fs::read(self.workspace_root.join(env_file)) {
                hasher.update(b"\0env_file:");
                hasher.update(&contents);
            }
        }

        for name in &self.runtime_cache_inputs {
            hasher.update(b"\0runtime:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            match std::env::var(name) {
                Ok(value) => hasher.update(value.as_bytes()),
                Err(_) => hasher.update(b"\0unset"),
            }
        }

        let hash = format!("{:x}", hasher.finalize());
        debug!(task = %task.id, hash = %hash, "computed task hash");
        hash
    }

    /// Hash of every source file under a project's root, memoized per run
    pub fn project_source_hash(&self, project: &str) -> String {
        let mut memo = self
            .project_hashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hash) = memo.get(project) {
            return hash.clone();
        }

        let hash = match self.graph.get(project) {
            Some(node) => self.hash_tree(&self.workspace_root.join(&node.root)),
            None => String::new(),
        };
        memo.insert(project.to_string(), hash.clone());
        hash
    }

    fn hash_tree(&self, root: &Path) -> String {
        let mut files: BTreeMap<String, String> = BTreeMap::new();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_skipped(entry));

        for entry in walker.flatten() {
            if entry.file_type().is_file() {
                if let Some(hash) = hash_file(entry.path()) {
                    files.insert(relative(root, entry.path()), hash);
                }
            }
        }

        digest_files(&files)
    }

    fn hash_inputs(&self, root: &Path, inputs: &[String]) -> String {
        let mut files: BTreeMap<String, String> = BTreeMap::new();

        for pattern in inputs {
            let full_pattern = root.join(pattern).to_string_lossy().to_string();
            let Ok(paths) = glob::glob(&full_pattern) else {
                debug!(pattern = %pattern, "invalid input glob, ignoring");
                continue;
            };
            for path in paths.flatten() {
                if path.is_file() && !self.excluded.iter().any(|e| path.starts_with(e)) {
                    if let Some(hash) = hash_file(&path) {
                        files.insert(relative(root, &path), hash);
                    }
                }
            }
        }

        digest_files(&files)
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()) {
            return true;
        }
        self.excluded.iter().any(|e| entry.path().starts_with(e))
    }
}

fn hash_file(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(contents) => Some(format!("{:x}", Sha256::digest(&contents))),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable source file, skipping");
            None
        }
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn digest_files(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, hash) in files {
        hasher.update(path.as_bytes());
        hasher.update(b"=");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
