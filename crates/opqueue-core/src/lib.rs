//! opqueue Core - shared error types and scenario configuration
//!
//! This crate provides the error taxonomy and the configuration layer used
//! by the `opqueue` binary to describe a queue and the tasks submitted to it.

pub mod config;
pub mod error;

pub use config::{Config, FailurePolicyConfig, PriorityConfig, QueueConfig, TaskSpec};
pub use error::{ConfigError, OpqueueError, Result};
