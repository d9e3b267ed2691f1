//! Error types for opqueue

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using OpqueueError
pub type Result<T> = std::result::Result<T, OpqueueError>;

/// Main error type for opqueue configuration and setup
#[derive(Debug, Error)]
pub enum OpqueueError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// A task refers to a dependency that is not declared
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// Two tasks share a name
    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl OpqueueError {
    /// Create a generic error from any displayable message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error came from the configuration layer
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "queue.max_concurrency".to_string(),
            message: "must be greater than 0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: queue.max_concurrency - must be greater than 0"
        );
    }

    #[test]
    fn test_unknown_dependency_display() {
        let err = ConfigError::UnknownDependency {
            task: "test".to_string(),
            dependency: "build".to_string(),
        };
        assert_eq!(err.to_string(), "Task 'test' depends on unknown task 'build'");
    }

    #[test]
    fn test_config_error_converts_transparently() {
        let err: OpqueueError = ConfigError::DuplicateTask("build".to_string()).into();
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Duplicate task name: build");
    }

    #[test]
    fn test_other_error() {
        let err = OpqueueError::other("something broke");
        assert!(!err.is_config());
        assert_eq!(err.to_string(), "something broke");
    }
}
