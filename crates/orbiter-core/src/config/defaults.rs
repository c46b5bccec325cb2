//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "orbiter.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "orbiter.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".orbiter.toml",
        ".orbiter.yaml",
    ]
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Orbiter Configuration

name = "workspace"

[tasks_runner]
parallel = true
max_parallel = 3
cacheable_operations = ["build", "lint", "test"]
strictly_ordered_targets = ["build"]

[projects.core]
root = "libs/core"

[projects.core.targets.build]
command = "echo building core"
outputs = ["dist/libs/core"]

[projects.app]
root = "apps/app"
implicit_dependencies = ["core"]

[projects.app.targets.build]
command = "echo building app"
outputs = ["dist/apps/app"]

[projects.app.targets.test]
command = "echo testing app"

[[target_dependencies.test]]
target = "build"
projects = "self"
"#;
