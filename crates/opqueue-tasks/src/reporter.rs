//! Task lifecycle reporting

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::task::{lock, TaskId};

/// Events emitted by a queue as tasks move through their lifecycle
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task was accepted into the pending set
    Submitted {
        queue: String,
        id: TaskId,
        name: String,
    },
    /// A task's body is starting
    Started {
        queue: String,
        id: TaskId,
        name: String,
        at: DateTime<Utc>,
    },
    /// A task's body finished without error
    Completed {
        queue: String,
        id: TaskId,
        name: String,
        duration: Duration,
        at: DateTime<Utc>,
    },
    /// A task's body returned an error or panicked
    Failed {
        queue: String,
        id: TaskId,
        name: String,
        duration: Duration,
        error: String,
    },
    /// A task was cancelled; `ran` tells whether its body had started
    Cancelled {
        queue: String,
        id: TaskId,
        name: String,
        ran: bool,
    },
    /// The queue has no pending or running tasks left
    Drained {
        queue: String,
        at: DateTime<Utc>,
    },
}

impl TaskEvent {
    /// Name of the task this event concerns, if any
    pub fn task_name(&self) -> Option<&str> {
        match self {
            Self::Submitted { name, .. }
            | Self::Started { name, .. }
            | Self::Completed { name, .. }
            | Self::Failed { name, .. }
            | Self::Cancelled { name, .. } => Some(name),
            Self::Drained { .. } => None,
        }
    }

    /// Name of the queue that emitted this event
    pub fn queue(&self) -> &str {
        match self {
            Self::Submitted { queue, .. }
            | Self::Started { queue, .. }
            | Self::Completed { queue, .. }
            | Self::Failed { queue, .. }
            | Self::Cancelled { queue, .. }
            | Self::Drained { queue, .. } => queue,
        }
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted { queue, id, name } => {
                tracing::debug!(queue = %queue, task = %id, "{} submitted", name);
            }
            TaskEvent::Started { queue, id, name, .. } => {
                tracing::info!(queue = %queue, task = %id, "Starting {}", name);
            }
            TaskEvent::Completed {
                queue,
                id,
                name,
                duration,
                ..
            } => {
                tracing::info!(
                    queue = %queue,
                    task = %id,
                    "{} completed in {:.1}s",
                    name,
                    duration.as_secs_f64()
                );
            }
            TaskEvent::Failed {
                queue,
                id,
                name,
                duration,
                error,
            } => {
                tracing::error!(
                    queue = %queue,
                    task = %id,
                    "{} failed after {:.1}s: {}",
                    name,
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::Cancelled { queue, id, name, ran } => {
                if *ran {
                    tracing::info!(queue = %queue, task = %id, "{} cancelled while running", name);
                } else {
                    tracing::info!(queue = %queue, task = %id, "{} cancelled before start", name);
                }
            }
            TaskEvent::Drained { queue, .. } => {
                tracing::info!(queue = %queue, "queue drained");
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        lock(&self.events).clone()
    }

    /// Names of tasks in the order their bodies started
    pub fn started_order(&self) -> Vec<String> {
        self.names_matching(|e| matches!(e, TaskEvent::Started { .. }))
    }

    /// Names of tasks in the order they reached a terminal state
    pub fn finished_order(&self) -> Vec<String> {
        self.names_matching(|e| {
            matches!(
                e,
                TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Cancelled { .. }
            )
        })
    }

    /// Number of drain notifications seen
    pub fn drained_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, TaskEvent::Drained { .. }))
            .count()
    }

    fn names_matching(&self, pred: impl Fn(&TaskEvent) -> bool) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter(|e| pred(*e))
            .filter_map(|e| e.task_name().map(str::to_string))
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        lock(&self.events).push(event.clone());
    }
}

/// Registry of task reporters; broadcasts each event to all of them
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(name: &str) -> TaskEvent {
        TaskEvent::Started {
            queue: "q".to_string(),
            id: crate::task::Task::noop(name).id(),
            name: name.to_string(),
            at: Utc::now(),
        }
    }

    fn completed(name: &str) -> TaskEvent {
        TaskEvent::Completed {
            queue: "q".to_string(),
            id: crate::task::Task::noop(name).id(),
            name: name.to_string(),
            duration: Duration::from_millis(5),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        reporter.report(&started("build"));
        reporter.report(&started("lint"));
        reporter.report(&completed("lint"));
        reporter.report(&TaskEvent::Drained {
            queue: "q".to_string(),
            at: Utc::now(),
        });

        assert_eq!(reporter.events().len(), 4);
        assert_eq!(reporter.started_order(), vec!["build", "lint"]);
        assert_eq!(reporter.finished_order(), vec!["lint"]);
        assert_eq!(reporter.drained_count(), 1);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&started("build"));
        reporter.report(&completed("build"));
        reporter.report(&TaskEvent::Cancelled {
            queue: "q".to_string(),
            id: crate::task::Task::noop("x").id(),
            name: "x".to_string(),
            ran: false,
        });
    }

    #[test]
    fn test_event_accessors() {
        let event = started("build");
        assert_eq!(event.task_name(), Some("build"));
        assert_eq!(event.queue(), "q");

        let drained = TaskEvent::Drained {
            queue: "other".to_string(),
            at: Utc::now(),
        };
        assert_eq!(drained.task_name(), None);
        assert_eq!(drained.queue(), "other");
    }

    #[test]
    fn test_empty_registry() {
        let registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_broadcast() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        registry.register_shared(collecting.clone());
        registry.register(TracingReporter);

        registry.report(&started("build"));

        assert_eq!(collecting.events().len(), 1);
    }

    #[test]
    fn test_register() {
        let mut registry = TaskReporterRegistry::empty();
        registry.register(TracingReporter);
        assert_eq!(registry.all().len(), 1);

        registry.register(CollectingReporter::default());
        assert_eq!(registry.all().len(), 2);

        assert_eq!(TaskReporterRegistry::new().all().len(), 1);
    }
}
