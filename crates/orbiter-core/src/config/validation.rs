//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_projects(config)?;
    validate_target_dependencies(config)?;
    validate_tasks_runner(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_projects(config: &Config) -> Result<()> {
    for (name, project) in &config.projects {
        let declared = project
            .dependencies
            .iter()
            .map(|d| d.project.as_str())
            .chain(project.implicit_dependencies.iter().map(String::as_str));

        for dep in declared {
            if !config.projects.contains_key(dep) {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.dependencies", name),
                    message: format!("unknown project '{}'", dep),
                }
                .into());
            }
            if dep == name {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.dependencies", name),
                    message: "a project cannot depend on itself".to_string(),
                }
                .into());
            }
        }

        for (target_name, target) in &project.targets {
            if target.all_commands().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.targets.{}", name, target_name),
                    message: "must define `command` or `commands`".to_string(),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn validate_target_dependencies(config: &Config) -> Result<()> {
    for (target, rules) in &config.target_dependencies {
        for rule in rules {
            if rule.target.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("target_dependencies.{}", target),
                    message: "target cannot be empty".to_string(),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn validate_tasks_runner(config: &Config) -> Result<()> {
    let runner = &config.tasks_runner;
    if runner.cache_directory.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "tasks_runner.cache_directory".to_string(),
            message: "cannot be empty".to_string(),
        }
        .into());
    }
    if let Some(remote) = &runner.remote_cache {
        if remote.directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tasks_runner.remote_cache.directory".to_string(),
                message: "cannot be empty".to_string(),
            }
            .into());
        }
        if remote.directory == runner.cache_directory {
            return Err(ConfigError::InvalidValue {
                field: "tasks_runner.remote_cache.directory".to_string(),
                message: "must differ from cache_directory".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DependencyScope, ProjectConfig, RemoteCacheConfig, TargetConfig, TargetDependencyConfig,
    };

    fn project_with_build(root: &str) -> ProjectConfig {
        let mut project = ProjectConfig {
            root: root.into(),
            ..Default::default()
        };
        project.targets.insert(
            "build".to_string(),
            TargetConfig {
                command: Some("make".to_string()),
                ..Default::default()
            },
        );
        project
    }

    #[test]
    fn test_valid_config() {
        let mut config = Config::default();
        config.projects.insert("core".to_string(), project_with_build("core"));
        let mut app = project_with_build("app");
        app.implicit_dependencies.push("core".to_string());
        config.projects.insert("app".to_string(), app);

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut config = Config::default();
        let mut app = project_with_build("app");
        app.implicit_dependencies.push("app".to_string());
        config.projects.insert("app".to_string(), app);

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_target_without_command_rejected() {
        let mut config = Config::default();
        let mut app = project_with_build("app");
        app.targets.insert("lint".to_string(), TargetConfig::default());
        config.projects.insert("app".to_string(), app);

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_dependency_target_rejected() {
        let mut config = Config::default();
        config.target_dependencies.insert(
            "test".to_string(),
            vec![TargetDependencyConfig {
                target: String::new(),
                projects: DependencyScope::SelfProject,
            }],
        );

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_remote_cache_must_differ_from_local() {
        let mut config = Config::default();
        config.tasks_runner.remote_cache = Some(RemoteCacheConfig {
            directory: config.tasks_runner.cache_directory.clone(),
        });
        assert!(validate_config(&config).is_err());

        config.tasks_runner.remote_cache = Some(RemoteCacheConfig {
            directory: "/mnt/shared/orbiter".into(),
        });
        assert!(validate_config(&config).is_ok());
    }
}
