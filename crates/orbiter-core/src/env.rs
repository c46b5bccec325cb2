//! Layered env files
//!
//! Env files are parsed without touching the process environment. Layers are
//! given broadest first (workspace `.env`, then a target's own file). A key
//! already present in the process environment is never overridden, and a key
//! set by a broader layer is not replaced by a narrower one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{EnvError, Result};

/// Load env files, broadest first, into an overlay for a child process.
pub fn load_layered_env(layers: &[PathBuf]) -> Result<BTreeMap<String, String>> {
    layer_env_files(layers, |key| std::env::var_os(key).is_some())
}

/// Like [`load_layered_env`], with an explicit check for keys that are
/// already set in the environment the overlay will be applied to.
pub fn layer_env_files<F>(layers: &[PathBuf], already_set: F) -> Result<BTreeMap<String, String>>
where
    F: Fn(&str) -> bool,
{
    let mut overlay = BTreeMap::new();

    for path in layers {
        if !path.is_file() {
            debug!(path = %path.display(), "env file not present, skipping");
            continue;
        }

        for (key, value) in read_env_file(path)? {
            if already_set(&key) || overlay.contains_key(&key) {
                continue;
            }
            overlay.insert(key, value);
        }
    }

    Ok(overlay)
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let to_error = |source| EnvError::Load {
        path: path.to_path_buf(),
        source,
    };

    let iter = dotenvy::from_path_iter(path).map_err(to_error)?;
    let mut entries = Vec::new();
    for item in iter {
        entries.push(item.map_err(to_error)?);
    }
    debug!(path = %path.display(), count = entries.len(), "read env file");
    Ok(entries)
}
