//! Operation queue: bounded-concurrency, dependency-aware executor on tokio

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{graph_lock, lock, Task, TaskBody, TaskId, TaskState};

/// Errors reported synchronously for misuse of the queue API.
///
/// None of these leave the queue in a modified state.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue constructed with zero concurrency
    #[error("Max concurrency must be greater than 0")]
    InvalidConcurrency,

    /// Task handed to a queue more than once
    #[error("Task {0} has already been submitted")]
    AlreadySubmitted(String),

    /// Dependency edited after submission
    #[error("Task {task} is already submitted; dependencies must be added before submission")]
    DependencyAfterSubmit { task: String },

    /// Edge would close a dependency cycle
    #[error("Making {task} depend on {depends_on} would create a dependency cycle")]
    CyclicDependency { task: String, depends_on: String },

    /// No tokio runtime to run tasks on
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Blocking submission attempted from inside the runtime
    #[error("submit_blocking cannot be called from within an async runtime; use submit().await")]
    BlockingInRuntime,
}

/// What happens to pending dependents when a predecessor fails or is cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Dependents run regardless; a failed predecessor is still terminal
    #[default]
    RunDependents,
    /// Dependents of a failed or cancelled predecessor are cancelled unrun
    CancelDependents,
}

/// Options for an operation queue
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Queue label
    pub name: String,
    /// Maximum concurrent tasks
    pub max_concurrency: usize,
    /// Failure propagation along dependency edges
    pub failure_policy: FailurePolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            name: "opqueue".to_string(),
            max_concurrency: num_cpus(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl QueueOptions {
    /// Options for a named queue with the given concurrency
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrency,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Options for a queue that runs one task at a time
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

struct PendingEntry {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingEntry>,
    running: HashMap<TaskId, Task>,
    next_seq: u64,
    suspended: bool,
    peak_running: usize,
    /// Set while there is outstanding work; cleared when a drain is reported
    busy: bool,
}

impl QueueState {
    fn outstanding(&self) -> usize {
        self.pending.len() + self.running.len()
    }
}

/// Work decided under the lock, carried out after releasing it
#[derive(Default)]
struct ScanResult {
    to_start: Vec<Task>,
    cancelled: Vec<(Task, Vec<Weak<QueueInner>>)>,
    drained: bool,
}

pub(crate) struct QueueInner {
    name: String,
    max_concurrency: usize,
    failure_policy: FailurePolicy,
    state: Mutex<QueueState>,
    outstanding: watch::Sender<usize>,
    reporter: Arc<dyn TaskReporter>,
    runtime: Handle,
}

impl QueueInner {
    /// Promote ready tasks into free slots and fast-forward cancelled ones.
    ///
    /// Runs until a scan cancels nothing, since each cancellation can make
    /// other pending tasks ready.
    pub(crate) fn schedule(self: &Arc<Self>) {
        loop {
            let scan = self.scan();
            let progressed = !scan.cancelled.is_empty();

            for (task, watchers) in scan.cancelled {
                debug!(queue = %self.name, task = %task.id(), "cancelled before start");
                self.reporter.report(&TaskEvent::Cancelled {
                    queue: self.name.clone(),
                    id: task.id(),
                    name: task.name().to_string(),
                    ran: false,
                });
                self.notify(watchers);
            }

            for task in scan.to_start {
                self.start(task);
            }

            if scan.drained {
                self.report_drained();
            }

            if !progressed {
                break;
            }
        }
    }

    fn scan(&self) -> ScanResult {
        let mut result = ScanResult::default();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        // Higher priority first, then submission order
        state.pending.sort_by(|a, b| {
            b.task
                .priority()
                .cmp(&a.task.priority())
                .then(a.seq.cmp(&b.seq))
        });

        let mut i = 0;
        while i < state.pending.len() {
            let task = &state.pending[i].task;

            let doomed = task.is_cancelled()
                || (self.failure_policy == FailurePolicy::CancelDependents
                    && task.has_unsuccessful_predecessor());
            if doomed {
                let entry = state.pending.remove(i);
                let watchers = entry.task.finish(TaskState::Cancelled);
                result.cancelled.push((entry.task, watchers));
                continue;
            }

            if !state.suspended
                && state.running.len() < self.max_concurrency
                && task.predecessors_terminal()
            {
                let entry = state.pending.remove(i);
                entry.task.mark_running();
                state.running.insert(entry.task.id(), entry.task.clone());
                state.peak_running = state.peak_running.max(state.running.len());
                result.to_start.push(entry.task);
                continue;
            }

            i += 1;
        }

        result.drained = self.update_outstanding(state);
        result
    }

    /// Publish the outstanding count; true when the queue just became idle
    fn update_outstanding(&self, state: &mut QueueState) -> bool {
        let outstanding = state.outstanding();
        self.outstanding.send_replace(outstanding);
        if outstanding == 0 && state.busy {
            state.busy = false;
            return true;
        }
        false
    }

    fn start(self: &Arc<Self>, task: Task) {
        let body = task.take_body();
        let ctx = task.context();
        let queue = Arc::clone(self);

        self.reporter.report(&TaskEvent::Started {
            queue: self.name.clone(),
            id: task.id(),
            name: task.name().to_string(),
            at: Utc::now(),
        });

        self.runtime.spawn(async move {
            let started = Instant::now();
            // The body runs in its own task so a panic is caught by the join handle.
            let joined = match body {
                Some(TaskBody::Async(body)) => queue.runtime.spawn(async move { body(ctx).await }).await,
                Some(TaskBody::Blocking(body)) => {
                    queue.runtime.spawn_blocking(move || body(ctx)).await
                }
                None => Ok(Ok(())),
            };

            let state = match joined {
                Ok(_) if task.is_cancelled() => TaskState::Cancelled,
                Ok(Ok(())) => TaskState::Completed,
                Ok(Err(e)) => TaskState::Failed(e.to_string()),
                Err(e) => TaskState::Failed(format!("Task panicked: {}", e)),
            };
            queue.complete(&task, state, started.elapsed());
        });
    }

    fn complete(self: &Arc<Self>, task: &Task, final_state: TaskState, duration: Duration) {
        // Reported before the state flips so observers of the terminal state also see the event.
        let event = match &final_state {
            TaskState::Failed(error) => TaskEvent::Failed {
                queue: self.name.clone(),
                id: task.id(),
                name: task.name().to_string(),
                duration,
                error: error.clone(),
            },
            TaskState::Cancelled => TaskEvent::Cancelled {
                queue: self.name.clone(),
                id: task.id(),
                name: task.name().to_string(),
                ran: true,
            },
            _ => TaskEvent::Completed {
                queue: self.name.clone(),
                id: task.id(),
                name: task.name().to_string(),
                duration,
                at: Utc::now(),
            },
        };
        self.reporter.report(&event);

        let (watchers, drained) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            state.running.remove(&task.id());
            let watchers = task.finish(final_state);
            let drained = self.update_outstanding(state);
            (watchers, drained)
        };

        if drained {
            self.report_drained();
        }

        self.notify(watchers);
        self.schedule();
    }

    /// Ask other queues with dependents of a finished task to rescan
    fn notify(self: &Arc<Self>, watchers: Vec<Weak<QueueInner>>) {
        for watcher in watchers.iter().filter_map(Weak::upgrade) {
            if !Arc::ptr_eq(&watcher, self) {
                watcher.schedule();
            }
        }
    }

    fn report_drained(&self) {
        debug!(queue = %self.name, "queue drained");
        self.reporter.report(&TaskEvent::Drained {
            queue: self.name.clone(),
            at: Utc::now(),
        });
    }
}

/// A named queue that runs at most `max_concurrency` tasks at once.
///
/// A task starts only after all of its predecessors are terminal. Among ready
/// tasks, higher priority starts first and equal priorities start in
/// submission order. Bodies run on the tokio runtime outside the queue lock.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Create a queue on the current tokio runtime
    pub fn new(options: QueueOptions, reporter: Arc<dyn TaskReporter>) -> Result<Self, QueueError> {
        let handle = Handle::try_current().map_err(|e| QueueError::NoRuntime(e.to_string()))?;
        Self::with_handle(options, reporter, handle)
    }

    /// Create a queue that runs tasks on the given runtime
    pub fn with_handle(
        options: QueueOptions,
        reporter: Arc<dyn TaskReporter>,
        handle: Handle,
    ) -> Result<Self, QueueError> {
        if options.max_concurrency == 0 {
            return Err(QueueError::InvalidConcurrency);
        }

        info!(
            queue = %options.name,
            max_concurrency = options.max_concurrency,
            failure_policy = ?options.failure_policy,
            "operation queue created"
        );

        let (outstanding, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(QueueInner {
                name: options.name,
                max_concurrency: options.max_concurrency,
                failure_policy: options.failure_policy,
                state: Mutex::new(QueueState::default()),
                outstanding,
                reporter,
                runtime: handle,
            }),
        })
    }

    /// Queue label
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configured concurrency limit
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Configured failure policy
    pub fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy
    }

    /// Tasks accepted but not yet started
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Tasks whose bodies are executing
    pub fn running_count(&self) -> usize {
        lock(&self.inner.state).running.len()
    }

    /// Highest number of simultaneously running tasks seen so far
    pub fn peak_running(&self) -> usize {
        lock(&self.inner.state).peak_running
    }

    /// Add tasks to the pending set and return immediately.
    ///
    /// The whole batch is rejected, with no state change, if any task was
    /// already submitted (here or to another queue) or appears twice.
    pub fn add_tasks(&self, tasks: Vec<Task>) -> Result<(), QueueError> {
        {
            // Edges are frozen from the claim onward
            let _graph = graph_lock();
            let mut claimed: Vec<&Task> = Vec::with_capacity(tasks.len());
            for task in &tasks {
                if !task.try_claim() {
                    for prior in claimed {
                        prior.release_claim();
                    }
                    warn!(queue = %self.inner.name, task = %task.id(), "rejected duplicate submission");
                    return Err(QueueError::AlreadySubmitted(task.label()));
                }
                claimed.push(task);
            }

            for task in &tasks {
                task.set_owner(&self.inner);
                task.watch_predecessors(&self.inner);
            }
        }

        {
            let mut guard = lock(&self.inner.state);
            let state = &mut *guard;
            for task in &tasks {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.pending.push(PendingEntry {
                    seq,
                    task: task.clone(),
                });
            }
            if !tasks.is_empty() {
                state.busy = true;
            }
            self.inner.update_outstanding(state);
        }

        debug!(queue = %self.inner.name, count = tasks.len(), "tasks submitted");
        for task in &tasks {
            self.inner.reporter.report(&TaskEvent::Submitted {
                queue: self.inner.name.clone(),
                id: task.id(),
                name: task.name().to_string(),
            });
        }

        self.inner.schedule();
        Ok(())
    }

    /// Submit tasks; when `wait_until_drained` is set, also wait until every
    /// submitted task and every submitted task it transitively depends on is
    /// terminal.
    pub async fn submit(&self, tasks: Vec<Task>, wait_until_drained: bool) -> Result<(), QueueError> {
        let handles = if wait_until_drained {
            tasks.clone()
        } else {
            Vec::new()
        };
        self.add_tasks(tasks)?;
        if wait_until_drained {
            wait_for_all(&handles).await;
        }
        Ok(())
    }

    /// Blocking variant of [`OperationQueue::submit`] for synchronous callers.
    ///
    /// Must be called from outside the runtime, and the runtime must be
    /// multi-threaded so tasks make progress while the caller blocks.
    pub fn submit_blocking(&self, tasks: Vec<Task>, wait_until_drained: bool) -> Result<(), QueueError> {
        if Handle::try_current().is_ok() {
            return Err(QueueError::BlockingInRuntime);
        }
        let handles = if wait_until_drained {
            tasks.clone()
        } else {
            Vec::new()
        };
        self.add_tasks(tasks)?;
        if wait_until_drained {
            self.inner.runtime.block_on(wait_for_all(&handles));
        }
        Ok(())
    }

    /// Cancel a task; see [`Task::cancel`]
    pub fn cancel(&self, task: &Task) {
        task.cancel();
    }

    /// Record that `task` may not start until `depends_on` is terminal
    pub fn add_dependency(&self, task: &Task, depends_on: &Task) -> Result<(), QueueError> {
        task.add_dependency(depends_on)
    }

    /// Cancel every pending and running task
    pub fn cancel_all(&self) {
        let tasks: Vec<Task> = {
            let state = lock(&self.inner.state);
            state
                .pending
                .iter()
                .map(|e| e.task.clone())
                .chain(state.running.values().cloned())
                .collect()
        };
        info!(queue = %self.inner.name, count = tasks.len(), "cancelling all tasks");
        for task in &tasks {
            task.cancel();
        }
        self.inner.schedule();
    }

    /// Stop or resume starting new tasks; running tasks are unaffected
    pub fn set_suspended(&self, suspended: bool) {
        lock(&self.inner.state).suspended = suspended;
        debug!(queue = %self.inner.name, suspended, "suspension changed");
        if !suspended {
            self.inner.schedule();
        }
    }

    /// Whether the queue is suspended
    pub fn is_suspended(&self) -> bool {
        lock(&self.inner.state).suspended
    }

    /// Wait until the queue has no pending or running tasks
    pub async fn wait_until_drained(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.inner.name)
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("failure_policy", &self.inner.failure_policy)
            .finish()
    }
}

/// Wait for `tasks` and every submitted task they transitively depend on
async fn wait_for_all(tasks: &[Task]) {
    let mut seen = HashSet::new();
    let mut stack: Vec<Task> = tasks.to_vec();
    let mut to_wait = Vec::new();

    while let Some(task) = stack.pop() {
        if !seen.insert(task.id()) {
            continue;
        }
        stack.extend(task.dependencies());
        if task.is_submitted() {
            to_wait.push(task);
        }
    }

    for task in to_wait {
        task.wait().await;
    }
}
