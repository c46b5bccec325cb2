//! Exit codes for the CLI

use orbiter_core::{ConfigError, GraphError, OrbiterError};
use orbiter_tasks::RunnerError;

/// Success
pub const SUCCESS: i32 = 0;

/// At least one task failed
pub const TASK_FAILURE: i32 = 1;

/// Configuration error, including cyclic task dependencies
pub const CONFIG_ERROR: i32 = 2;

/// The runner itself could not proceed
pub const ORCHESTRATOR_ERROR: i32 = 3;

/// Map a fatal error to its exit code
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<RunnerError>() {
        return match e {
            RunnerError::Order(_) => CONFIG_ERROR,
            _ => ORCHESTRATOR_ERROR,
        };
    }
    if err.downcast_ref::<OrbiterError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<GraphError>().is_some()
    {
        return CONFIG_ERROR;
    }
    ORCHESTRATOR_ERROR
}
