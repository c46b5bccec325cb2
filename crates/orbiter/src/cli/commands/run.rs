//! Run command: execute targets across the workspace

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use orbiter_core::config::{load_workspace, Config};
use orbiter_core::interpolate::parse_overrides;
use orbiter_tasks::{
    CompositeLifeCycle, LifeCycle, RunReport, Stage, Task, TaskEventKind, TaskId, TasksRunner,
    TracingLifeCycle,
};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Run targets across the workspace
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run, as `project:target` or a bare target for every project
    /// that defines it
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Run tasks within a stage concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Maximum concurrent tasks per stage (0 = unlimited)
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Neither read nor write the task cache
    #[arg(long)]
    pub skip_cache: bool,

    /// Show the execution stages without running
    #[arg(long)]
    pub dry_run: bool,

    /// Overrides for `{args.<name>}` placeholders, e.g. `-- --var1=x`
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let (mut config, root) =
            load_workspace(&cwd).context("Failed to load workspace configuration")?;
        self.apply_flags(&mut config);

        let overrides = parse_overrides(&self.args);
        let tasks = resolve_tasks(&config, &self.tasks, &overrides)?;
        info!(tasks = tasks.len(), root = %root.display(), "resolved tasks");

        let runner = TasksRunner::from_config(&config, &root)?;

        if self.dry_run {
            let stages = runner.stages(tasks)?;
            print_stages(cli, &stages)?;
            return Ok(exit_codes::SUCCESS);
        }

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!();
            output::info(&format!(
                "Running {} across {}",
                output::plural(tasks.len(), "task"),
                output::plural(config.projects.len(), "project")
            ));
            println!();
        }

        let mut life_cycle = CompositeLifeCycle::new().with(Arc::new(TracingLifeCycle));
        if !cli.quiet && cli.format == OutputFormat::Text {
            life_cycle.register(Arc::new(ConsoleLifeCycle::new(cli.verbose)));
        }
        let runner = runner.with_life_cycle(Arc::new(life_cycle));

        let runtime = tokio::runtime::Runtime::new()?;
        let report = runtime.block_on(runner.run(tasks))?;

        print_report(cli, &report)?;
        Ok(if report.success() {
            exit_codes::SUCCESS
        } else {
            exit_codes::TASK_FAILURE
        })
    }

    fn apply_flags(&self, config: &mut Config) {
        let runner = &mut config.tasks_runner;
        runner.parallel |= self.parallel;
        runner.skip_cache |= self.skip_cache;
        if let Some(max) = self.max_parallel {
            runner.max_parallel = max;
        }
    }
}

/// Expand requested task strings into tasks
fn resolve_tasks(
    config: &Config,
    requested: &[String],
    overrides: &BTreeMap<String, String>,
) -> anyhow::Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for name in requested {
        if let Some(id) = TaskId::parse(name) {
            tasks.push(Task::from_config(config, &id.project, &id.target, overrides)?);
            continue;
        }

        let projects = config.projects_with_target(name);
        if projects.is_empty() {
            anyhow::bail!("No project defines target '{}'", name);
        }
        for project in projects {
            tasks.push(Task::from_config(config, project, name, overrides)?);
        }
    }
    Ok(tasks)
}

fn print_stages(cli: &Cli, stages: &[Stage]) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        let plan: Vec<serde_json::Value> = stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                serde_json::json!({
                    "stage": i,
                    "tasks": stage.iter().map(|t| t.id.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}", output::header("Execution plan"));
    for (i, stage) in stages.iter().enumerate() {
        println!();
        println!("  {} {}", style(format!("Stage {}", i)).dim(), style("─").dim());
        for task in stage {
            println!("    {}", output::task_style().apply_to(&task.id));
        }
    }
    println!();
    println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
    Ok(())
}

fn print_report(cli: &Cli, report: &RunReport) -> anyhow::Result<()> {
    let count = |kind: TaskEventKind| report.results.iter().filter(|r| r.kind == kind).count();
    let succeeded = count(TaskEventKind::Success);
    let failed = count(TaskEventKind::Failure);
    let cached = count(TaskEventKind::CacheHit);
    let skipped = count(TaskEventKind::DependencyFailed);

    if cli.format == OutputFormat::Json {
        let summary = serde_json::json!({
            "total": report.results.len(),
            "succeeded": succeeded,
            "failed": failed,
            "cached": cached,
            "skipped": skipped,
            "tasks": report.results.iter().map(|r| {
                serde_json::json!({
                    "id": r.task.id.to_string(),
                    "status": r.kind.as_str(),
                    "code": r.code,
                    "duration_ms": r.duration.as_millis(),
                })
            }).collect::<Vec<_>>(),
            "timings": report.timings,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if cli.quiet {
        return Ok(());
    }

    for result in &report.results {
        match result.kind {
            TaskEventKind::Failure if !cli.verbose => {
                println!();
                output::error(&format!(
                    "{} exited with code {}",
                    result.task.id,
                    result.code.unwrap_or_default()
                ));
                for line in result.stdout.lines().chain(result.stderr.lines()) {
                    println!("    {}", line);
                }
            }
            TaskEventKind::DependencyFailed => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(&result.task.id).yellow(),
                    style("(skipped: prerequisite failed)").dim()
                );
            }
            _ => {}
        }
    }

    println!();
    let line = format!(
        "{}/{} succeeded, {} failed, {} cached, {} skipped",
        succeeded + cached,
        report.results.len(),
        failed,
        cached,
        skipped
    );
    if failed == 0 && skipped == 0 {
        output::success(&line);
    } else {
        output::error(&line);
    }

    if let Some(timings) = &report.timings {
        println!();
        println!("{}", output::header("Task timings (ms)"));
        println!("{}", serde_json::to_string_pretty(timings)?);
    }
    Ok(())
}

/// Console life cycle with live output
struct ConsoleLifeCycle {
    verbose: bool,
}

impl ConsoleLifeCycle {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl LifeCycle for ConsoleLifeCycle {
    fn start_task(&self, task: &Task) {
        println!(
            "  {} {} {}",
            style("▸").dim(),
            style(&task.id).bold(),
            if self.verbose {
                style(format!("({})", task.commands.join(" && "))).dim().to_string()
            } else {
                String::new()
            }
        );
    }

    fn end_task(&self, task: &Task, code: i32) {
        if code == 0 {
            println!("  {} {}", style("✓").green(), style(&task.id).green());
        } else {
            println!(
                "  {} {} {}",
                style("✗").red(),
                style(&task.id).red(),
                style(format!("(exit {})", code)).dim()
            );
        }
    }

    fn task_output(&self, task: &Task, line: &str, is_stderr: bool) {
        if !self.verbose {
            return;
        }
        if is_stderr {
            println!("    {} {}", style(format!("[{}]", task.id)).red().dim(), line);
        } else {
            println!("    {} {}", style(format!("[{}]", task.id)).dim(), line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbiter_core::config::{ProjectConfig, TargetConfig};

    fn config() -> Config {
        let mut config = Config::default();
        for name in ["core", "app"] {
            let mut project = ProjectConfig {
                root: name.into(),
                ..Default::default()
            };
            project.targets.insert(
                "build".to_string(),
                TargetConfig {
                    command: Some("echo {args.mode}".to_string()),
                    ..Default::default()
                },
            );
            config.projects.insert(name.to_string(), project);
        }
        config
    }

    #[test]
    fn test_bare_target_expands_to_projects() {
        let tasks = resolve_tasks(&config(), &["build".to_string()], &BTreeMap::new()).unwrap();
        let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["app:build", "core:build"]);
    }

    #[test]
    fn test_qualified_task_with_overrides() {
        let overrides = parse_overrides(&["--mode=release"]);
        let tasks = resolve_tasks(&config(), &["core:build".to_string()], &overrides).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].commands, vec!["echo release"]);
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        assert!(resolve_tasks(&config(), &["deploy".to_string()], &BTreeMap::new()).is_err());
        assert!(resolve_tasks(&config(), &["ghost:build".to_string()], &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cmd = RunCommand {
            tasks: vec!["build".to_string()],
            parallel: true,
            max_parallel: Some(0),
            skip_cache: true,
            dry_run: false,
            args: vec![],
        };
        let mut config = config();
        cmd.apply_flags(&mut config);
        assert!(config.tasks_runner.parallel);
        assert!(config.tasks_runner.skip_cache);
        assert_eq!(config.tasks_runner.max_parallel, 0);
    }
}
