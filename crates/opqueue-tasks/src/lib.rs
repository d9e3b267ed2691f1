//! opqueue Tasks - dependency-aware operation queue
//!
//! This crate provides tasks with cooperative cancellation and dependency
//! edges, a bounded-concurrency queue that schedules them on a tokio
//! runtime, static execution planning, and lifecycle reporting.

pub mod dag;
pub mod queue;
pub mod reporter;
pub mod task;

pub use dag::{DagError, TaskDag, TaskNode};
pub use queue::{FailurePolicy, OperationQueue, QueueError, QueueOptions};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use task::{BoxError, Task, TaskContext, TaskId, TaskOutcome, TaskPriority, TaskState};
