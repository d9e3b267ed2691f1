//! Plan command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use opqueue_tasks::TaskDag;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::scenario::Scenario;

/// Show the execution waves of a scenario without running it
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Scenario file (default: search the working directory and its parents)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl PlanCommand {
    /// Execute the plan command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(config = ?self.config, "executing plan command");
        let cwd = std::env::current_dir()?;
        let (scenario, config_path) = Scenario::load(self.config.as_deref(), &cwd, None)?;
        let dag = TaskDag::build(&scenario.tasks)?;

        match cli.format {
            OutputFormat::Json => {
                let mut plan = dag.to_json();
                plan["queue"] = serde_json::json!(scenario.options.name);
                plan["max_concurrency"] = serde_json::json!(scenario.options.max_concurrency);
                plan["critical_path"] = serde_json::json!(dag.critical_path_len());
                println!("{}", serde_json::to_string_pretty(&plan)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", output::header("Execution Plan"));
                    println!();
                    println!(
                        "{}",
                        output::key_value(
                            "Config",
                            &output::path_style()
                                .apply_to(config_path.display())
                                .to_string()
                        )
                    );
                    println!("{}", output::key_value("Queue", &scenario.options.name));
                    println!(
                        "{}",
                        output::key_value(
                            "Max concurrency",
                            &scenario.options.max_concurrency.to_string()
                        )
                    );
                    println!(
                        "{}",
                        output::key_value(
                            "Critical path",
                            &output::plural(dag.critical_path_len(), "wave")
                        )
                    );
                    println!();
                    print!("{}", dag.execution_plan());
                }
            }
        }

        Ok(())
    }
}
