//! Error types for Orbiter

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using OrbiterError
pub type Result<T> = std::result::Result<T, OrbiterError>;

/// Main error type for Orbiter core operations
#[derive(Debug, Error)]
pub enum OrbiterError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Project graph errors
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Environment file errors
    #[error(transparent)]
    Env(#[from] EnvError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Project graph errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// A dependency edge names a project that is not in the workspace
    #[error("Project '{project}' depends on unknown project '{dependency}'")]
    UnknownDependency { project: String, dependency: String },

    /// A project was looked up that does not exist
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    /// The requested target is not defined for the project
    #[error("Project '{project}' has no target '{target}'")]
    UnknownTarget { project: String, target: String },
}

/// Environment file errors
#[derive(Debug, Error)]
pub enum EnvError {
    /// Failed to read or parse an env file
    #[error("Failed to load env file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

impl OrbiterError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
