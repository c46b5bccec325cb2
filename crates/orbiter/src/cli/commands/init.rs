//! Init command

use std::path::PathBuf;

use clap::Args;
use dialoguer::Confirm;
use tracing::info;

use orbiter_core::config::{load_config, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};

use crate::cli::output;
use crate::cli::Cli;
use crate::exit_codes;

/// Write a starter workspace configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Use defaults without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!(force = self.force, yes = self.yes, "executing init command");
        let config_path = match &self.output {
            Some(path) => path.clone(),
            None => std::env::current_dir()?.join(DEFAULT_CONFIG_TOML),
        };

        if config_path.exists() && !self.force {
            if self.yes {
                anyhow::bail!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                );
            }

            let overwrite = Confirm::new()
                .with_prompt(format!(
                    "Configuration file already exists at {}. Overwrite?",
                    config_path.display()
                ))
                .default(false)
                .interact()?;

            if !overwrite {
                output::warning("Aborted.");
                return Ok(exit_codes::SUCCESS);
            }
        }

        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;
        // The template must stay loadable
        load_config(&config_path)?;

        if !cli.quiet {
            output::success(&format!(
                "Created {}",
                output::path_style().apply_to(config_path.display())
            ));
            output::info("Run `orbiter run build --dry-run` to see the execution plan");
        }

        Ok(exit_codes::SUCCESS)
    }
}
