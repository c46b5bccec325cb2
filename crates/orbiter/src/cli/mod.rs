//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{CacheCommand, InitCommand, RunCommand};

/// Orbiter - stage-ordered, cached task runner
#[derive(Debug, Parser)]
#[command(name = "orbiter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run targets across workspace projects
    Run(RunCommand),

    /// Task cache management
    Cache(CacheCommand),

    /// Write a starter workspace configuration
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> anyhow::Result<i32> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Cache(ref cmd) => cmd.execute(&self),
            Commands::Init(ref cmd) => cmd.execute(&self),
        }
    }
}
