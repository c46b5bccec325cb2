//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), projects = config.projects.len(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories).
///
/// Returns the config together with the workspace root, i.e. the directory
/// holding the config file.
pub fn load_workspace(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    let root = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.to_path_buf());
    Ok((config, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyKind, DependencyScope};
    use tempfile::TempDir;

    const SAMPLE_TOML: &str = r#"
name = "demo"

[tasks_runner]
parallel = true
max_parallel = 2
runtime_cache_inputs = ["NODE_ENV"]

[projects.core]
root = "libs/core"

[projects.core.targets.build]
command = "echo core"

[projects.app]
root = "apps/app"
dependencies = [{ project = "core", kind = "dynamic" }]

[projects.app.targets.build]
commands = ["echo one", "echo two"]
outputs = ["dist/apps/app"]

[[target_dependencies.test]]
target = "build"
projects = "self"
"#;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("orbiter.toml");
        std::fs::write(&config_path, "name = \"x\"").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("orbiter.toml");
        std::fs::write(&config_path, "name = \"x\"").unwrap();
        let nested = temp.path().join("apps").join("app");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config(&nested), Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("orbiter.toml");
        std::fs::write(&toml_path, "name = \"x\"").unwrap();
        std::fs::write(temp.path().join("orbiter.yaml"), "name: x").unwrap();

        assert_eq!(find_config(temp.path()).unwrap(), toml_path);
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("orbiter.toml");
        std::fs::write(&config_path, SAMPLE_TOML).unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.name.as_deref(), Some("demo"));
        assert!(config.tasks_runner.parallel);
        assert_eq!(config.tasks_runner.max_parallel, 2);
        assert_eq!(config.tasks_runner.runtime_cache_inputs, vec!["NODE_ENV"]);

        let app = config.project("app").unwrap();
        assert_eq!(app.dependencies[0].kind, DependencyKind::Dynamic);
        assert_eq!(app.targets["build"].all_commands(), vec!["echo one", "echo two"]);

        let rules = &config.target_dependencies["test"];
        assert_eq!(rules[0].projects, DependencyScope::SelfProject);
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("orbiter.yaml");
        std::fs::write(
            &config_path,
            "projects:\n  web:\n    root: apps/web\n    targets:\n      lint:\n        command: eslint .\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.projects_with_target("lint"), vec!["web"]);
    }

    #[test]
    fn test_load_workspace_returns_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("orbiter.toml"), SAMPLE_TOML).unwrap();
        let nested = temp.path().join("libs");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, root) = load_workspace(&nested).unwrap();
        assert_eq!(root, temp.path());
        assert_eq!(config.projects.len(), 2);
    }

    #[test]
    fn test_load_config_rejects_unknown_dependency() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("orbiter.toml");
        std::fs::write(
            &config_path,
            "[projects.app]\nroot = \"app\"\nimplicit_dependencies = [\"ghost\"]\n",
        )
        .unwrap();

        assert!(load_config(&config_path).is_err());
    }
}
