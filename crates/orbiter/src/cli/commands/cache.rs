//! Cache management command

use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;

use orbiter_core::config::{find_config, load_workspace, Config};
use orbiter_tasks::{RunnerOptions, TaskCache};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Task cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: 7)
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cache = workspace_cache(&std::env::current_dir()?)?;
        match &self.action {
            CacheAction::Prune(cmd) => cmd.execute(cli, &cache)?,
            CacheAction::Status(cmd) => cmd.execute(cli, &cache)?,
            CacheAction::Clean(cmd) => cmd.execute(cli, &cache)?,
        }
        Ok(exit_codes::SUCCESS)
    }
}

/// The cache of the enclosing workspace, or the default location under `cwd`
fn workspace_cache(cwd: &Path) -> anyhow::Result<TaskCache> {
    let (config, root) = match find_config(cwd) {
        Some(_) => load_workspace(cwd)?,
        None => (Config::default(), cwd.to_path_buf()),
    };
    let options = RunnerOptions::from_config(&config, &root);
    Ok(TaskCache::new(options.cache_dir(), root))
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let max_age = Duration::from_secs(self.max_age_days * 24 * 60 * 60);

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "Pruning cache entries older than {} days...",
                self.max_age_days
            ));
        }

        let stats = cache.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let stats = cache.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": cache.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Task Cache Status"));
            println!();
            println!(
                "{}",
                output::key_value(
                    "Location",
                    &output::path_style()
                        .apply_to(cache.cache_dir().display())
                        .to_string()
                )
            );
            println!("{}", output::key_value("Entries", &stats.entries.to_string()));
            println!(
                "{}",
                output::key_value("Size", &style(stats.formatted_size()).yellow().to_string())
            );
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let cache_dir = cache.cache_dir().to_path_buf();

        if !cache_dir.exists() {
            if !cli.quiet {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                output::warning("Aborted.");
                return Ok(());
            }
        }

        cache.clean()?;

        if !cli.quiet {
            output::success(&format!(
                "Cache cleared at {}",
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_cache_location_without_config() {
        let temp = TempDir::new().unwrap();
        let cache = workspace_cache(temp.path()).unwrap();
        assert_eq!(cache.cache_dir(), temp.path().join(".orbiter/cache"));
    }

    #[test]
    fn test_cache_location_from_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("orbiter.toml"),
            "[tasks_runner]\ncache_directory = \"tmp/cache\"\n",
        )
        .unwrap();
        let nested = temp.path().join("apps/app");
        std::fs::create_dir_all(&nested).unwrap();

        let cache = workspace_cache(&nested).unwrap();
        assert!(cache.cache_dir().ends_with("tmp/cache"));
    }
}
