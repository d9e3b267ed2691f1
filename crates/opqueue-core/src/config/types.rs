//! Configuration types

use serde::{Deserialize, Serialize};

/// A scenario: one queue plus the tasks submitted to it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue settings
    pub queue: QueueConfig,

    /// Tasks to submit, in submission order
    pub tasks: Vec<TaskSpec>,
}

impl Config {
    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Effective concurrency, honoring a command-line override
    pub fn concurrency(&self, override_value: Option<usize>) -> usize {
        override_value.unwrap_or(self.queue.max_concurrency)
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue label (reverse-DNS style, e.g. `com.example.upload`)
    pub name: String,

    /// Maximum number of tasks running at once
    pub max_concurrency: usize,

    /// What happens to dependents when a predecessor fails
    pub failure_policy: FailurePolicyConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "com.opqueue.default".to_string(),
            max_concurrency: 4,
            failure_policy: FailurePolicyConfig::default(),
        }
    }
}

/// Failure propagation along dependency edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyConfig {
    /// Dependents run even if a predecessor failed
    #[default]
    RunDependents,
    /// Dependents of a failed or cancelled task are cancelled
    CancelDependents,
}

/// Task priority as written in a scenario file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityConfig {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

/// A task in the scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Unique task name
    pub name: String,

    /// Simulated work duration in milliseconds
    pub duration_ms: u64,

    /// Scheduling priority among ready tasks
    pub priority: PriorityConfig,

    /// Names of tasks that must reach a terminal state first
    pub depends_on: Vec<String>,

    /// Whether the body reports a failure when it finishes
    pub fail: bool,

    /// Whether the task is cancelled before submission
    pub cancel: bool,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            duration_ms: 100,
            priority: PriorityConfig::default(),
            depends_on: Vec::new(),
            fail: false,
            cancel: false,
        }
    }
}

impl TaskSpec {
    /// Create a task spec with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the simulated duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Add a dependency
    pub fn with_depends_on(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: PriorityConfig) -> Self {
        self.priority = priority;
        self
    }
}
