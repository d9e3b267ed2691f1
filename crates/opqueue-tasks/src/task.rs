//! Task types: identity, body, state and dependency links

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::queue::{QueueError, QueueInner};

/// Error type a task body may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a task body produces
pub type TaskOutcome = Result<(), BoxError>;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'static>>;

/// Process-unique task identifier, allocated in creation order
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Relative priority among tasks that are ready at the same time
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

/// Lifecycle state of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum TaskState {
    /// Created or submitted, not yet started
    Pending,
    /// Body is executing
    Running,
    /// Body finished without error
    Completed,
    /// Body returned an error or panicked
    Failed(String),
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    /// Check if this state represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Short lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "failed: {}", err),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Default)]
struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    /// Returns true on the first call only
    fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            // Registered before the check so a concurrent cancel cannot be missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Handle passed into a running task body.
///
/// Cancellation is cooperative: the body polls [`TaskContext::is_cancelled`]
/// at safe points, or races its work against [`TaskContext::cancelled`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    name: Arc<str>,
    cancel: Arc<CancelFlag>,
}

impl TaskContext {
    /// Identifier of the running task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name of the running task
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

pub(crate) enum TaskBody {
    Async(Box<dyn FnOnce(TaskContext) -> BoxFuture + Send>),
    Blocking(Box<dyn FnOnce(TaskContext) -> TaskOutcome + Send>),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes dependency edits against each other and against submission
/// claims, so a cycle check and the edge it admits happen atomically.
static GRAPH: Mutex<()> = Mutex::new(());

pub(crate) fn graph_lock() -> MutexGuard<'static, ()> {
    lock(&GRAPH)
}

pub(crate) struct TaskInner {
    id: TaskId,
    name: Arc<str>,
    priority: Mutex<TaskPriority>,
    cancel: Arc<CancelFlag>,
    state: watch::Sender<TaskState>,
    body: Mutex<Option<TaskBody>>,
    /// Non-owning links to predecessors
    dependencies: Mutex<Vec<Weak<TaskInner>>>,
    submitted: AtomicBool,
    /// Queue that owns this task once submitted
    owner: Mutex<Option<Weak<QueueInner>>>,
    /// Queues holding pending dependents of this task
    watchers: Mutex<Vec<Weak<QueueInner>>>,
}

impl TaskInner {
    fn live_dependencies(&self) -> Vec<Arc<TaskInner>> {
        lock(&self.dependencies)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Whether `target` is reachable by following dependency edges from here
    fn depends_transitively_on(&self, target: TaskId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = self.live_dependencies();

        while let Some(node) = stack.pop() {
            if node.id == target {
                return true;
            }
            if visited.insert(node.id) {
                stack.extend(node.live_dependencies());
            }
        }

        false
    }

    fn add_watcher(&self, queue: Weak<QueueInner>) {
        let mut watchers = lock(&self.watchers);
        if self.is_terminal() {
            return;
        }
        if !watchers.iter().any(|w| w.ptr_eq(&queue)) {
            watchers.push(queue);
        }
    }
}

/// A schedulable unit of work.
///
/// `Task` is a cheap handle; clones refer to the same task. Dependencies are
/// held as non-owning links, so a predecessor that is dropped without ever
/// being submitted counts as terminal.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task with an async body
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        Self::with_body(
            name,
            TaskBody::Async(Box::new(move |ctx| Box::pin(body(ctx)))),
        )
    }

    /// Create a task whose body blocks a thread (runs on the blocking pool)
    pub fn blocking<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> TaskOutcome + Send + 'static,
    {
        Self::with_body(name, TaskBody::Blocking(Box::new(body)))
    }

    /// Create a task that does nothing (useful as a join point)
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, |_| async { Ok::<(), BoxError>(()) })
    }

    fn with_body(name: impl Into<String>, body: TaskBody) -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        let name: String = name.into();
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                name: Arc::from(name),
                priority: Mutex::new(TaskPriority::default()),
                cancel: Arc::new(CancelFlag::default()),
                state,
                body: Mutex::new(Some(body)),
                dependencies: Mutex::new(Vec::new()),
                submitted: AtomicBool::new(false),
                owner: Mutex::new(None),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current priority
    pub fn priority(&self) -> TaskPriority {
        *lock(&self.inner.priority)
    }

    /// Change the priority; only affects the order in which pending tasks start
    pub fn set_priority(&self, priority: TaskPriority) {
        *lock(&self.inner.priority) = priority;
    }

    /// Set the priority (builder style)
    pub fn with_priority(self, priority: TaskPriority) -> Self {
        self.set_priority(priority);
        self
    }

    /// Snapshot of the current state
    pub fn state(&self) -> TaskState {
        self.inner.state.borrow().clone()
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Whether the task has been handed to a queue
    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Whether the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.inner.is_terminal()
    }

    /// Request cancellation.
    ///
    /// A task that has not started is never run; a running task sees the
    /// flag through its [`TaskContext`] and is not interrupted.
    pub fn cancel(&self) {
        if !self.inner.cancel.cancel() {
            return;
        }
        debug!(task = %self.id(), name = %self.name(), "cancellation requested");
        if let Some(queue) = self.owner() {
            queue.schedule();
        }
    }

    /// Record that this task may not start until `depends_on` is terminal.
    ///
    /// Must be called before submission. Edges that would close a cycle,
    /// including self-edges, are rejected. Adding an existing edge is a no-op.
    pub fn add_dependency(&self, depends_on: &Task) -> Result<(), QueueError> {
        let _graph = graph_lock();
        if self.is_submitted() {
            return Err(QueueError::DependencyAfterSubmit { task: self.label() });
        }
        if self.id() == depends_on.id() || depends_on.inner.depends_transitively_on(self.id()) {
            return Err(QueueError::CyclicDependency {
                task: self.label(),
                depends_on: depends_on.label(),
            });
        }

        let mut deps = lock(&self.inner.dependencies);
        let target = Arc::as_ptr(&depends_on.inner);
        if deps.iter().any(|d| d.as_ptr() == target) {
            return Ok(());
        }
        deps.push(Arc::downgrade(&depends_on.inner));
        debug!(task = %self.id(), depends_on = %depends_on.id(), "dependency added");
        Ok(())
    }

    /// Remove a dependency edge; returns whether one existed
    pub fn remove_dependency(&self, depends_on: &Task) -> Result<bool, QueueError> {
        let _graph = graph_lock();
        if self.is_submitted() {
            return Err(QueueError::DependencyAfterSubmit { task: self.label() });
        }
        let mut deps = lock(&self.inner.dependencies);
        let before = deps.len();
        let target = Arc::as_ptr(&depends_on.inner);
        deps.retain(|d| d.as_ptr() != target);
        Ok(deps.len() != before)
    }

    /// Predecessors that are still alive
    pub fn dependencies(&self) -> Vec<Task> {
        self.inner
            .live_dependencies()
            .into_iter()
            .map(|inner| Task { inner })
            .collect()
    }

    /// Identifiers of live predecessors
    pub fn dependency_ids(&self) -> Vec<TaskId> {
        self.inner
            .live_dependencies()
            .iter()
            .map(|d| d.id)
            .collect()
    }

    /// Wait until the task reaches a terminal state and return it
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(TaskState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    pub(crate) fn label(&self) -> String {
        format!("{} ({})", self.name(), self.id())
    }

    pub(crate) fn context(&self) -> TaskContext {
        TaskContext {
            id: self.id(),
            name: Arc::clone(&self.inner.name),
            cancel: Arc::clone(&self.inner.cancel),
        }
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        lock(&self.inner.body).take()
    }

    /// Mark as submitted; false if it already was
    pub(crate) fn try_claim(&self) -> bool {
        self.inner
            .submitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_claim(&self) {
        self.inner.submitted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_owner(&self, queue: &Arc<QueueInner>) {
        *lock(&self.inner.owner) = Some(Arc::downgrade(queue));
    }

    fn owner(&self) -> Option<Arc<QueueInner>> {
        lock(&self.inner.owner).as_ref().and_then(Weak::upgrade)
    }

    /// Ask every unfinished predecessor to rescan `queue` when it terminates
    pub(crate) fn watch_predecessors(&self, queue: &Arc<QueueInner>) {
        for dep in self.inner.live_dependencies() {
            dep.add_watcher(Arc::downgrade(queue));
        }
    }

    pub(crate) fn predecessors_terminal(&self) -> bool {
        self.inner
            .live_dependencies()
            .iter()
            .all(|d| d.is_terminal())
    }

    pub(crate) fn has_unsuccessful_predecessor(&self) -> bool {
        self.inner.live_dependencies().iter().any(|d| {
            matches!(
                *d.state.borrow(),
                TaskState::Failed(_) | TaskState::Cancelled
            )
        })
    }

    pub(crate) fn mark_running(&self) {
        self.inner.state.send_replace(TaskState::Running);
    }

    /// Move to a terminal state; returns the queues waiting on this task
    pub(crate) fn finish(&self, state: TaskState) -> Vec<Weak<QueueInner>> {
        let mut watchers = lock(&self.inner.watchers);
        self.inner.state.send_replace(state);
        std::mem::take(&mut *watchers)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}
