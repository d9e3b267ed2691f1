//! Validate command

use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use opqueue_core::config::{resolve_config, Config};

use crate::cli::{Cli, OutputFormat};
use crate::scenario::Scenario;

/// Validate a scenario configuration
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Scenario file (default: search the working directory and its parents)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(config = ?self.config, strict = self.strict, "executing validate command");
        let cwd = std::env::current_dir()?;

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let (config, config_path) = match resolve_config(self.config.as_deref(), &cwd) {
            Ok((c, p)) => (Some(c), Some(p)),
            Err(e) => {
                errors.push(format!("Configuration: {}", e));
                (None, None)
            }
        };

        if let Some(ref cfg) = config {
            if let Err(e) = Scenario::from_config(cfg, None) {
                errors.push(format!("Dependencies: {:#}", e));
            }
            warnings.extend(scenario_warnings(cfg));
        }

        if self.strict {
            errors.append(&mut warnings);
        }

        let passed = errors.is_empty();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "errors": errors,
                    "warnings": warnings
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    if let Some(path) = config_path {
                        println!("Config: {}", style(path.display()).cyan());
                        println!();
                    }

                    if !errors.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &errors {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    if !warnings.is_empty() {
                        println!("{}", style("Warnings:").yellow().bold());
                        for warning in &warnings {
                            println!("  {} {}", style("!").yellow(), warning);
                        }
                        println!();
                    }

                    if passed {
                        if warnings.is_empty() {
                            println!("{}", style("✓ All checks passed").green().bold());
                        } else {
                            println!(
                                "{} with {} warning(s)",
                                style("✓ Validation passed").green().bold(),
                                warnings.len()
                            );
                        }
                    }
                }
            }
        }

        if !passed {
            anyhow::bail!("validation failed with {} error(s)", errors.len());
        }

        Ok(())
    }
}

/// Things that load fine but are probably not what the author meant
fn scenario_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.tasks.is_empty() {
        warnings.push("Scenario has no tasks".to_string());
    }

    for task in &config.tasks {
        if task.fail {
            warnings.push(format!("Task '{}' is set to fail", task.name));
        }
        if task.cancel {
            warnings.push(format!("Task '{}' is cancelled before submission", task.name));
        }
        if task.duration_ms == 0 {
            warnings.push(format!("Task '{}' has zero duration", task.name));
        }
    }

    warnings
}
