//! Remote cache seam

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::cache::copy_tree;

/// A best-effort store shared between machines.
///
/// Both operations exchange whole entries with the local cache directory:
/// `<dir>/<hash>/` plus its `<dir>/<hash>.commit` marker. `retrieve` returns
/// whether the entry was found and written locally; `store` returns whether
/// the remote accepted it.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Copy an entry from the remote into `cache_dir`
    async fn retrieve(&self, hash: &str, cache_dir: &Path) -> Result<bool, RemoteCacheError>;

    /// Copy an entry from `cache_dir` to the remote
    async fn store(&self, hash: &str, cache_dir: &Path) -> Result<bool, RemoteCacheError>;
}

/// Remote cache backed by a shared directory, such as a network mount
#[derive(Debug, Clone)]
pub struct DirectoryRemoteCache {
    directory: PathBuf,
}

impl DirectoryRemoteCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl RemoteCache for DirectoryRemoteCache {
    async fn retrieve(&self, hash: &str, cache_dir: &Path) -> Result<bool, RemoteCacheError> {
        if !transfer(hash, &self.directory, cache_dir).await? {
            return Ok(false);
        }
        debug!(hash, remote = %self.directory.display(), "retrieved entry");
        Ok(true)
    }

    async fn store(&self, hash: &str, cache_dir: &Path) -> Result<bool, RemoteCacheError> {
        if self.directory.join(format!("{hash}.commit")).exists() {
            return Ok(true);
        }
        if !transfer(hash, cache_dir, &self.directory).await? {
            return Ok(false);
        }
        debug!(hash, remote = %self.directory.display(), "stored entry");
        Ok(true)
    }
}

/// Copy a committed entry between cache directories, committing it last
async fn transfer(hash: &str, from: &Path, to: &Path) -> Result<bool, RemoteCacheError> {
    let (hash, from, to) = (hash.to_string(), from.to_path_buf(), to.to_path_buf());
    tokio::task::spawn_blocking(move || -> Result<bool, RemoteCacheError> {
        let marker = format!("{hash}.commit");
        if !from.join(&marker).exists() || !from.join(&hash).is_dir() {
            return Ok(false);
        }

        fs::create_dir_all(&to)?;
        copy_tree(&from.join(&hash), &to.join(&hash))?;
        fs::write(to.join(&marker), b"true")?;
        Ok(true)
    })
    .await
    .map_err(|e| RemoteCacheError::Unavailable(e.to_string()))?
}

/// Remote cache errors. These never fail a run.
#[derive(Debug, thiserror::Error)]
pub enum RemoteCacheError {
    /// IO error talking to the remote
    #[error("Remote cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote could not be reached
    #[error("Remote cache unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn committed_entry(dir: &Path, hash: &str) {
        fs::create_dir_all(dir.join(hash)).unwrap();
        fs::write(dir.join(hash).join("metadata.json"), "{}").unwrap();
        fs::write(dir.join(format!("{hash}.commit")), "true").unwrap();
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        let other = temp.path().join("other");
        committed_entry(&local, "h1");

        let remote = DirectoryRemoteCache::new(temp.path().join("remote"));
        assert!(remote.store("h1", &local).await.unwrap());
        assert!(remote.retrieve("h1", &other).await.unwrap());
        assert!(other.join("h1/metadata.json").exists());
        assert!(other.join("h1.commit").exists());
    }

    #[tokio::test]
    async fn test_retrieve_missing() {
        let temp = TempDir::new().unwrap();
        let remote = DirectoryRemoteCache::new(temp.path().join("remote"));
        assert!(!remote.retrieve("nope", temp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_entry_is_not_stored() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        fs::create_dir_all(local.join("h1")).unwrap();

        let remote = DirectoryRemoteCache::new(temp.path().join("remote"));
        assert!(!remote.store("h1", &local).await.unwrap());
    }
}
