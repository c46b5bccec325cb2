//! Task execution seam and the shell executor

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use orbiter_core::env::load_layered_env;

use crate::life_cycle::LifeCycle;
use crate::task::Task;

/// Captured result of running a task's commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Exit code of the last command run
    pub code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a single task to completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute a task, forwarding output lines to `life_cycle`.
    ///
    /// A non-zero exit is a normal `Ok` result; `Err` means the task could
    /// not be run at all.
    async fn execute(
        &self,
        task: &Task,
        life_cycle: &dyn LifeCycle,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// Executes target commands with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workspace_root: PathBuf,
    env_files: Vec<PathBuf>,
}

impl ShellExecutor {
    /// Create an executor rooted at the workspace
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            env_files: Vec::new(),
        }
    }

    /// Add a workspace-level env file, relative to the workspace root
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }

    fn env_layers(&self, task: &Task) -> Vec<PathBuf> {
        self.env_files
            .iter()
            .chain(task.env_file.iter())
            .map(|p| self.workspace_root.join(p))
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(
        &self,
        task: &Task,
        life_cycle: &dyn LifeCycle,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let overlay = load_layered_env(&self.env_layers(task))
            .map_err(|e| ExecutorError::Env(e.to_string()))?;
        let cwd = self.workspace_root.join(&task.cwd);
        let mut output = ExecutionOutput::default();

        for command in &task.commands {
            debug!(task = %task.id, command = %command, cwd = %cwd.display(), "running command");

            let mut child = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&cwd)
                .envs(&overlay)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|source| ExecutorError::Spawn {
                    command: command.clone(),
                    source,
                })?;

            let (stdout, stderr) = tokio::join!(
                forward_lines(child.stdout.take(), task, life_cycle, false),
                forward_lines(child.stderr.take(), task, life_cycle, true),
            );
            let status = child.wait().await.map_err(ExecutorError::Wait)?;

            output.stdout.push_str(&stdout);
            output.stderr.push_str(&stderr);
            output.code = status.code().unwrap_or(-1);

            if !status.success() {
                debug!(task = %task.id, code = output.code, "command failed, stopping");
                break;
            }
        }

        Ok(output)
    }
}

async fn forward_lines<R>(
    reader: Option<R>,
    task: &Task,
    life_cycle: &dyn LifeCycle,
    is_stderr: bool,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return captured;
    };

    // Raw reads: a non-UTF-8 line must not stop draining the pipe
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buf);
                let line = decoded.trim_end_matches(|c: char| c == '\n' || c == '\r');
                life_cycle.task_output(task, line, is_stderr);
                captured.push_str(line);
                captured.push('\n');
            }
            Err(e) => {
                debug!(task = %task.id, error = %e, "output stream closed");
                break;
            }
        }
    }
    captured
}

/// Errors that prevent a task from running
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The command could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the command failed
    #[error("Failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// Env files could not be loaded
    #[error("Failed to load env files: {0}")]
    Env(String),
}
