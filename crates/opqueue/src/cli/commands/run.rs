//! Run command: submit a scenario and wait for the queue to drain

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use opqueue_tasks::{
    CollectingReporter, OperationQueue, Task, TaskDag, TaskEvent, TaskReporter,
    TaskReporterRegistry, TaskState, TracingReporter,
};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::scenario::Scenario;

/// Submit a scenario to a queue and wait for it to drain
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Scenario file (default: search the working directory and its parents)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the queue's maximum concurrency
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub concurrency: Option<usize>,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Returned when at least one task ended in `Failed`
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {total} tasks failed")]
pub struct TasksFailed {
    pub failed: usize,
    pub total: usize,
}

/// Final state of one task, as printed in the summary
#[derive(Debug, serde::Serialize)]
struct TaskSummary {
    id: u64,
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip)]
    state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u128>,
}

impl TaskSummary {
    fn new(task: &Task, durations: &HashMap<u64, Duration>) -> Self {
        let state = task.state();
        let error = match state {
            TaskState::Failed(ref err) => Some(err.clone()),
            _ => None,
        };
        Self {
            id: task.id().as_u64(),
            name: task.name().to_string(),
            status: state.label(),
            error,
            state,
            duration_ms: durations.get(&task.id().as_u64()).map(|d| d.as_millis()),
        }
    }
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            config = ?self.config,
            concurrency = ?self.concurrency,
            dry_run = self.dry_run,
            "executing run command"
        );
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (scenario, config_path) =
            Scenario::load(self.config.as_deref(), &cwd, self.concurrency)?;

        let dag = TaskDag::build(&scenario.tasks)?;
        let text = cli.format == OutputFormat::Text;

        if text && !cli.quiet {
            println!();
            output::info(&format!(
                "{} on {} (max concurrency {}) from {}",
                output::plural(dag.len(), "task"),
                style(&scenario.options.name).cyan(),
                scenario.options.max_concurrency,
                output::path_style().apply_to(config_path.display()),
            ));

            if cli.verbose || self.dry_run {
                println!();
                println!("{}", dag.execution_plan());
            }
        }

        if self.dry_run {
            if text {
                if !cli.quiet {
                    println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&dag.to_json())?);
            }
            return Ok(());
        }

        if dag.is_empty() {
            if text && !cli.quiet {
                output::success("No tasks to run.");
            }
            return Ok(());
        }

        let collector = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        registry.register_shared(collector.clone());
        if text && !cli.quiet {
            registry.register(ConsoleReporter::new(cli.verbose));
        } else {
            registry.register(TracingReporter);
        }

        let queue = OperationQueue::new(scenario.options.clone(), Arc::new(registry))
            .context("creating operation queue")?;

        if text && !cli.quiet {
            println!();
        }
        queue
            .submit(scenario.tasks.clone(), true)
            .await
            .context("submitting scenario")?;

        let durations = durations_by_id(&collector.events());
        let summaries: Vec<TaskSummary> = scenario
            .tasks
            .iter()
            .map(|task| TaskSummary::new(task, &durations))
            .collect();

        let total = summaries.len();
        let succeeded = summaries.iter().filter(|s| s.state.is_success()).count();
        let failed: Vec<&TaskSummary> = summaries
            .iter()
            .filter(|s| matches!(s.state, TaskState::Failed(_)))
            .collect();
        let cancelled = summaries
            .iter()
            .filter(|s| s.state == TaskState::Cancelled)
            .count();

        match cli.format {
            OutputFormat::Json => {
                let summary = serde_json::json!({
                    "queue": queue.name(),
                    "max_concurrency": queue.max_concurrency(),
                    "peak_running": queue.peak_running(),
                    "total": total,
                    "succeeded": succeeded,
                    "failed": failed.len(),
                    "cancelled": cancelled,
                    "tasks": summaries,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!();
                    println!(
                        "  {} {}/{} succeeded, {} failed, {} cancelled (peak {} running)",
                        if failed.is_empty() {
                            style("✓").green().bold()
                        } else {
                            style("✗").red().bold()
                        },
                        succeeded,
                        total,
                        failed.len(),
                        cancelled,
                        queue.peak_running(),
                    );
                    for summary in &failed {
                        if let TaskState::Failed(ref err) = summary.state {
                            println!("    {} {}: {}", style("✗").red(), summary.name, err);
                        }
                    }
                    if cli.verbose {
                        println!();
                        for summary in &summaries {
                            let (marker, marker_style) = output::state_marker(&summary.state);
                            println!(
                                "    {} {} {}",
                                marker_style.apply_to(marker),
                                summary.name,
                                style(summary.status).dim()
                            );
                        }
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(TasksFailed {
                failed: failed.len(),
                total,
            }
            .into());
        }

        Ok(())
    }
}

/// Body run time per task, taken from completion and failure events
fn durations_by_id(events: &[TaskEvent]) -> HashMap<u64, Duration> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::Completed { id, duration, .. } | TaskEvent::Failed { id, duration, .. } => {
                Some((id.as_u64(), *duration))
            }
            _ => None,
        })
        .collect()
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted { id, name, .. } => {
                if self.verbose {
                    println!("  {} {} {}", style("+").dim(), name, style(id).dim());
                }
            }
            TaskEvent::Started { id, name, .. } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(name).bold(),
                    if self.verbose {
                        style(format!("({})", id)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Completed { name, duration, .. } => {
                println!(
                    "  {} {} {}",
                    style("✓").green(),
                    style(name).green(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                );
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
                ..
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(name).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Cancelled { name, ran, .. } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(name).yellow(),
                    style(if *ran { "(cancelled while running)" } else { "(cancelled)" }).dim()
                );
            }
            TaskEvent::Drained { queue, .. } => {
                if self.verbose {
                    println!("  {} {} drained", style("─").dim(), queue);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_tasks_failed_message() {
        let err = TasksFailed { failed: 1, total: 3 };
        assert_eq!(err.to_string(), "1 of 3 tasks failed");
    }

    #[test]
    fn test_durations_by_id_skips_other_events() {
        let done = Task::noop("a").id();
        let broken = Task::noop("b").id();
        let events = vec![
            TaskEvent::Started {
                queue: "q".into(),
                id: done,
                name: "a".into(),
                at: Utc::now(),
            },
            TaskEvent::Completed {
                queue: "q".into(),
                id: done,
                name: "a".into(),
                duration: Duration::from_millis(12),
                at: Utc::now(),
            },
            TaskEvent::Failed {
                queue: "q".into(),
                id: broken,
                name: "b".into(),
                duration: Duration::from_millis(3),
                error: "boom".into(),
            },
            TaskEvent::Drained {
                queue: "q".into(),
                at: Utc::now(),
            },
        ];

        let durations = durations_by_id(&events);
        assert_eq!(durations.len(), 2);
        assert_eq!(durations[&done.as_u64()], Duration::from_millis(12));
        assert_eq!(durations[&broken.as_u64()], Duration::from_millis(3));
    }

    #[test]
    fn test_summary_of_unsubmitted_task() {
        let task = Task::noop("compile");
        let summary = TaskSummary::new(&task, &HashMap::new());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["name"], "compile");
        assert_eq!(json["status"], "pending");
        assert!(json.get("error").is_none());
        assert!(json.get("duration_ms").is_none());
    }
}
