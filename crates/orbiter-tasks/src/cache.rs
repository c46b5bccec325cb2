//! Content-addressable task cache
//!
//! Entries live under `<cache_dir>/<hash>/` as a `metadata.json` plus an
//! `outputs/` snapshot of declared outputs. An entry is only visible once its
//! `<cache_dir>/<hash>.commit` marker exists.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::remote::RemoteCache;
use crate::task::TaskId;

const METADATA_FILE: &str = "metadata.json";
const OUTPUTS_DIR: &str = "outputs";

/// A cached task result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Task hash
    pub hash: String,
    /// Task ID
    pub task_id: TaskId,
    /// Exit code of the run that produced the entry
    pub code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Output paths relative to the workspace root
    pub outputs: Vec<String>,
    /// Original task duration
    pub duration_ms: u64,
    /// When this entry was created
    pub created_at: String,
}

/// Content-addressable task cache
#[derive(Clone)]
pub struct TaskCache {
    cache_dir: PathBuf,
    workspace_root: PathBuf,
    remote: Option<Arc<dyn RemoteCache>>,
}

impl TaskCache {
    /// Create a new task cache
    pub fn new(cache_dir: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            workspace_root: workspace_root.into(),
            remote: None,
        }
    }

    /// Attach a remote cache consulted on local misses
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Look up an entry locally, then remotely
    pub async fn get(&self, hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(entry) = self.read_local(hash)? {
            debug!(hash, "local cache hit");
            return Ok(Some(entry));
        }

        let Some(remote) = &self.remote else {
            debug!(hash, "cache miss");
            return Ok(None);
        };

        fs::create_dir_all(&self.cache_dir)?;
        match remote.retrieve(hash, &self.cache_dir).await {
            Ok(true) => match self.read_local(hash) {
                Ok(Some(entry)) => {
                    debug!(hash, "remote cache hit");
                    Ok(Some(entry))
                }
                Ok(None) => {
                    warn!(hash, "remote cache reported a hit but left no entry");
                    Ok(None)
                }
                Err(e) => {
                    warn!(hash, error = %e, "discarding unreadable entry from remote cache");
                    self.discard(hash)?;
                    Ok(None)
                }
            },
            Ok(false) => {
                debug!(hash, "cache miss");
                Ok(None)
            }
            Err(e) => {
                warn!(hash, error = %e, "remote cache retrieve failed, continuing without it");
                Ok(None)
            }
        }
    }

    /// Store an entry locally and push it to the remote cache
    pub async fn put(&self, hash: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let local = self.clone();
        let (key, stored) = (hash.to_string(), entry.clone());
        blocking(move || local.write_local(&key, &stored)).await?;

        if let Some(remote) = &self.remote {
            match remote.store(hash, &self.cache_dir).await {
                Ok(true) => debug!(hash, "stored in remote cache"),
                Ok(false) => debug!(hash, "remote cache declined entry"),
                Err(e) => debug!(hash, error = %e, "remote cache store failed"),
            }
        }
        Ok(())
    }

    /// Copy an entry's output snapshot back into the workspace
    pub async fn restore_outputs(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let snapshot = self.entry_dir(&entry.hash).join(OUTPUTS_DIR);
        let workspace_root = self.workspace_root.clone();
        let outputs = entry.outputs.clone();

        blocking(move || {
            for output in &outputs {
                let cached = snapshot.join(output);
                if !cached.exists() {
                    continue;
                }
                let target = workspace_root.join(output);
                remove_path(&target)?;
                copy_tree(&cached, &target)?;
                debug!(output = %output, "restored cached output");
            }
            Ok(())
        })
        .await
    }

    /// Drop a local entry, marker first so it is never half-visible
    fn discard(&self, hash: &str) -> Result<(), CacheError> {
        remove_path(&self.commit_marker(hash))?;
        remove_path(&self.entry_dir(hash))?;
        Ok(())
    }

    fn read_local(&self, hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        if !self.commit_marker(hash).exists() {
            return Ok(None);
        }
        let metadata_path = self.entry_dir(hash).join(METADATA_FILE);
        if !metadata_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&metadata_path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write_local(&self, hash: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        if self.commit_marker(hash).exists() {
            debug!(hash, "entry already stored");
            return Ok(());
        }

        let entry_dir = self.entry_dir(hash);
        remove_path(&entry_dir)?;
        fs::create_dir_all(&entry_dir)?;

        let snapshot = entry_dir.join(OUTPUTS_DIR);
        for output in &entry.outputs {
            let source = self.workspace_root.join(output);
            if source.exists() {
                copy_tree(&source, &snapshot.join(output))?;
            }
        }

        let json = serde_json::to_string_pretty(entry)?;
        fs::write(entry_dir.join(METADATA_FILE), json)?;
        fs::write(self.commit_marker(hash), b"true")?;

        info!(task = %entry.task_id, hash, "stored result in cache");
        Ok(())
    }

    fn entry_dir(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(hash)
    }

    fn commit_marker(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{hash}.commit"))
    }

    /// Remove entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            stats.total += 1;

            let expired = fs::read_to_string(path.join(METADATA_FILE))
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok())
                .and_then(|entry| chrono::DateTime::parse_from_rfc3339(&entry.created_at).ok())
                .is_some_and(|created| created < cutoff);

            if expired {
                if let Some(hash) = path.file_name().and_then(|n| n.to_str()) {
                    remove_path(&self.commit_marker(hash))?;
                }
                fs::remove_dir_all(&path)?;
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            stats.entries += 1;
            stats.total_size += WalkDir::new(&path)
                .into_iter()
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum::<u64>();
        }

        Ok(stats)
    }

    /// Delete every entry
    pub fn clean(&self) -> Result<(), CacheError> {
        remove_path(&self.cache_dir)?;
        info!(dir = %self.cache_dir.display(), "cache cleaned");
        Ok(())
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Run filesystem work off the async worker threads
async fn blocking<T, F>(work: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
}

/// Recursively copy a file or directory
pub(crate) fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    if source.is_file() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    }
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        let size = self.total_size as f64;
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if size < 1024.0 * 1024.0 {
            format!("{:.1} KB", size / 1024.0)
        } else if size < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.1} MB", size / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", size / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

/// Local cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
