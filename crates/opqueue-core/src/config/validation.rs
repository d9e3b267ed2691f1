//! Configuration validation

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Pattern for queue labels: dot-separated segments, reverse-DNS style
const QUEUE_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$";

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_queue(config)?;
    validate_tasks(config)?;
    debug!("configuration validation passed");
    Ok(())
}

/// Check whether a queue label is well formed
pub fn is_valid_queue_name(name: &str) -> bool {
    Regex::new(QUEUE_NAME_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn validate_queue(config: &Config) -> Result<()> {
    if !is_valid_queue_name(&config.queue.name) {
        return Err(ConfigError::InvalidValue {
            field: "queue.name".to_string(),
            message: "must be dot-separated segments of letters, digits, '_' or '-'".to_string(),
        }
        .into());
    }

    if config.queue.max_concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "queue.max_concurrency".to_string(),
            message: "must be greater than 0".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for task in &config.tasks {
        if task.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tasks.name".to_string(),
                message: "task name cannot be empty".to_string(),
            }
            .into());
        }
        if !seen.insert(task.name.as_str()) {
            return Err(ConfigError::DuplicateTask(task.name.clone()).into());
        }
    }

    for task in &config.tasks {
        for dep in &task.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                }
                .into());
            }
        }
    }

    Ok(())
}
