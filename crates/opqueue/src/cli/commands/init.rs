//! Init command

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use tracing::info;

use opqueue_core::config::defaults::{
    DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_YAML,
};
use opqueue_core::config::Config;

use crate::cli::Cli;

/// Write a starter scenario configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Write TOML instead of YAML
    #[arg(long)]
    pub toml: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, toml = self.toml, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self.target_path(&cwd);

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Configuration file already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
        }

        let content = render_template(self.toml)?;
        std::fs::write(&config_path, &content)?;

        if !cli.quiet {
            println!(
                "{} Created configuration at {}",
                style("✓").green().bold(),
                style(config_path.display()).cyan()
            );
            println!();
            println!("Next steps:");
            println!("  1. Edit {} to describe your tasks", config_path.display());
            println!("  2. Run {} to check it", style("opqueue validate").cyan());
            println!("  3. Run {} to execute the scenario", style("opqueue run").cyan());
        }

        Ok(())
    }

    fn target_path(&self, cwd: &Path) -> PathBuf {
        match &self.output {
            Some(path) if self.toml && path.extension().is_some_and(|e| e == "yaml") => {
                path.with_extension("toml")
            }
            Some(path) => path.clone(),
            None if self.toml => cwd.join(DEFAULT_CONFIG_TOML),
            None => cwd.join(DEFAULT_CONFIG_YAML),
        }
    }
}

/// Starter scenario in the requested format
fn render_template(toml: bool) -> anyhow::Result<String> {
    if toml {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE)?;
        Ok(toml::to_string_pretty(&config)?)
    } else {
        Ok(DEFAULT_CONFIG_TEMPLATE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(toml: bool, output: Option<&str>) -> InitCommand {
        InitCommand {
            force: false,
            toml,
            output: output.map(PathBuf::from),
        }
    }

    #[test]
    fn test_target_path_defaults() {
        let cwd = Path::new("/work");
        assert_eq!(command(false, None).target_path(cwd), cwd.join("opqueue.yaml"));
        assert_eq!(command(true, None).target_path(cwd), cwd.join("opqueue.toml"));
    }

    #[test]
    fn test_target_path_swaps_extension_for_toml() {
        let cwd = Path::new("/work");
        assert_eq!(
            command(true, Some("custom.yaml")).target_path(cwd),
            PathBuf::from("custom.toml")
        );
        assert_eq!(
            command(false, Some("custom.yaml")).target_path(cwd),
            PathBuf::from("custom.yaml")
        );
    }

    #[test]
    fn test_rendered_templates_load() {
        let dir = tempfile::TempDir::new().unwrap();

        let yaml_path = dir.path().join("opqueue.yaml");
        std::fs::write(&yaml_path, render_template(false).unwrap()).unwrap();
        let yaml = opqueue_core::config::load_config(&yaml_path).unwrap();

        let toml_path = dir.path().join("opqueue.toml");
        std::fs::write(&toml_path, render_template(true).unwrap()).unwrap();
        let toml = opqueue_core::config::load_config(&toml_path).unwrap();

        assert_eq!(yaml.tasks.len(), 10);
        assert_eq!(toml.tasks.len(), yaml.tasks.len());
        assert_eq!(toml.queue.name, yaml.queue.name);
    }
}
