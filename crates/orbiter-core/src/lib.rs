//! Orbiter Core - shared foundations for the Orbiter task runner
//!
//! This crate provides configuration loading, the error taxonomy, the
//! immutable project graph, env-file layering and argument interpolation.

pub mod config;
pub mod env;
pub mod error;
pub mod graph;
pub mod interpolate;

pub use config::{Config, TasksRunnerConfig};
pub use error::{ConfigError, EnvError, GraphError, OrbiterError, Result};
pub use graph::{DependencyEdge, ProjectGraph, ProjectNode};
