//! The task manager façade.
//!
//! [`TaskManager`] accepts units of work, keeps at most one live task per
//! [`TaskContext`], registers a [`TaskRecord`] for every accepted unit, and
//! runs it on its [`TaskExecutor`]. Callers only ever see
//! [`TaskDescriptor`] snapshots.
//!
//! # Concurrency
//!
//! The registry sits behind one mutex. The duplicate-context check and the
//! registration of the new record happen under that lock, so two concurrent
//! submissions with equal contexts can never both succeed. Lifecycle
//! transitions are guarded per record. User predicates passed to
//! [`find_tasks`](TaskManager::find_tasks) run on snapshots, outside the lock.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cluster::{
    ClusterDestination, ClusterMessage, ClusterMessageKind, ClusterMessenger, NodeId,
    RemoteTaskEntry, StandaloneMessenger,
};
use crate::config::TaskManagerConfig;
use crate::domain::TaskRecord;
use crate::error::{TaskError, TaskFailure};
use crate::executor::{self, Job, NamedThreadFactory, TaskExecutor};
use crate::progress::{ProgressBroadcaster, ProgressSink};
use crate::types::context::TaskContext;
use crate::types::task::{TaskDescriptor, TaskId, TaskOutcome};
use crate::work::TaskWork;

/// Supplies the identifier of the user submitting work.
pub trait UserProvider: Send + Sync {
    /// The current user, or `None` when anonymous.
    fn current_user(&self) -> Option<String>;
}

/// [`UserProvider`] for contexts without authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl UserProvider for AnonymousUser {
    fn current_user(&self) -> Option<String> {
        None
    }
}

impl<F> UserProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_user(&self) -> Option<String> {
        self()
    }
}

#[derive(Default)]
struct Registry {
    last_id: u64,
    tasks: BTreeMap<TaskId, Arc<TaskRecord>>,
}

impl Registry {
    fn live_with_context(&self, context: &dyn TaskContext) -> Option<&Arc<TaskRecord>> {
        self.tasks
            .values()
            .find(|record| record.is_live() && record.context().same_context(context))
    }
}

/// Runs background work with deduplication, progress, and cancellation.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use background_tasks::{work, TaskError, TaskManager, TaskManagerConfig};
///
/// let manager = TaskManager::new(TaskManagerConfig::default()).unwrap();
///
/// let task = manager
///     .submit(work(|| Ok(42)), "Answer the question", "answer")
///     .unwrap();
///
/// let finished = manager.wait_for_task(task.id(), Duration::from_secs(5)).unwrap();
/// assert!(finished.is_finished());
/// assert_eq!(finished.result(), Some(&serde_json::json!(42)));
///
/// assert!(manager.shutdown_and_wait(Duration::from_secs(5)));
/// let err = manager.submit(work(|| Ok(())), "Too late", "late").unwrap_err();
/// assert!(matches!(err, TaskError::Rejected));
/// ```
pub struct TaskManager {
    config: TaskManagerConfig,
    executor: TaskExecutor,
    registry: Mutex<Registry>,
    remote: DashMap<(NodeId, TaskId), RemoteTaskEntry>,
    users: Arc<dyn UserProvider>,
    messenger: Arc<dyn ClusterMessenger>,
}

impl TaskManager {
    /// Creates a manager and its executor from `config`.
    ///
    /// Submissions are anonymous and cluster messages are dropped until
    /// [`with_user_provider`](Self::with_user_provider) and
    /// [`with_messenger`](Self::with_messenger) say otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if the configuration is invalid.
    pub fn new(config: TaskManagerConfig) -> Result<Self, TaskError> {
        config.validate()?;
        let factory = Arc::new(NamedThreadFactory::new(config.thread_name_prefix.clone()));
        let executor = TaskExecutor::new(config.max_threads, factory)?;
        tracing::debug!(
            node_id = %config.node_id,
            max_threads = config.max_threads,
            "Task manager created"
        );
        Ok(Self {
            config,
            executor,
            registry: Mutex::new(Registry::default()),
            remote: DashMap::new(),
            users: Arc::new(AnonymousUser),
            messenger: Arc::new(StandaloneMessenger),
        })
    }

    /// Sets where the owner of new submissions comes from.
    pub fn with_user_provider(mut self, users: Arc<dyn UserProvider>) -> Self {
        self.users = users;
        self
    }

    /// Sets the transport used for cancellation broadcasts.
    pub fn with_messenger(mut self, messenger: Arc<dyn ClusterMessenger>) -> Self {
        self.messenger = messenger;
        self
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// The executor running this manager's tasks.
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Submits a non-cancellable unit of work.
    ///
    /// Returns a snapshot of the registered task right away, usually before
    /// it starts.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidArgument`] if `description` is empty.
    /// - [`TaskError::AlreadyExecuting`] if a live task holds an equal
    ///   context; the error carries that task.
    /// - [`TaskError::Rejected`] after shutdown.
    /// - [`TaskError::Spawn`] if no worker thread could be created.
    pub fn submit<W: TaskWork>(
        &self,
        work: W,
        description: impl Into<String>,
        context: impl TaskContext,
    ) -> Result<TaskDescriptor, TaskError> {
        self.submit_task(work, description.into(), Arc::new(context), false)
    }

    /// Submits a unit of work that [`cancel`](Self::cancel) may interrupt.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit).
    pub fn submit_cancellable<W: TaskWork>(
        &self,
        work: W,
        description: impl Into<String>,
        context: impl TaskContext,
    ) -> Result<TaskDescriptor, TaskError> {
        self.submit_task(work, description.into(), Arc::new(context), true)
    }

    fn submit_task<W: TaskWork>(
        &self,
        mut work: W,
        description: String,
        context: Arc<dyn TaskContext>,
        cancellable: bool,
    ) -> Result<TaskDescriptor, TaskError> {
        if description.trim().is_empty() {
            return Err(TaskError::invalid_argument("description must not be empty"));
        }
        let reports_progress = work.progress_aware().is_some();
        let owner = self.users.current_user();

        let record = {
            let mut registry = self.registry.lock();
            if let Some(existing) = registry.live_with_context(context.as_ref()) {
                tracing::debug!(
                    existing_task_id = %existing.id(),
                    context = ?context,
                    "Rejecting submission, context already executing"
                );
                return Err(TaskError::AlreadyExecuting {
                    existing: Box::new(existing.snapshot()),
                });
            }
            if self.executor.is_shutdown() {
                return Err(TaskError::Rejected);
            }

            registry.last_id += 1;
            let id = TaskId::new(registry.last_id);
            let mut record =
                TaskRecord::with_shared_context(id, description, context, self.config.node_id.clone())
                    .with_owner(owner)
                    .with_cancellable(cancellable);
            if reports_progress {
                record = record.with_progress(self.config.progress_history);
            }
            let record = Arc::new(record);
            registry.tasks.insert(id, Arc::clone(&record));
            record
        };

        if let (Some(indicator), Some(target)) = (record.progress(), work.progress_aware()) {
            let sink: Arc<dyn ProgressSink> = Arc::clone(indicator) as Arc<dyn ProgressSink>;
            target.set_progress_sink(sink);
        }
        if let Some(target) = work.descriptor_aware() {
            target.set_task_descriptor(record.snapshot());
        }

        let task_id = record.id();
        let job = {
            let record = Arc::clone(&record);
            Job::for_task(task_id, move || run_task(&record, work))
        };
        if let Err(err) = self.executor.submit(job) {
            self.registry.lock().tasks.remove(&task_id);
            tracing::debug!(task_id = %task_id, error = %err, "Executor refused task, deregistered");
            return Err(err);
        }

        tracing::debug!(
            task_id = %task_id,
            description = %record.description(),
            cancellable,
            "Task submitted"
        );
        Ok(record.snapshot())
    }

    /// Snapshot of a registered task, or `None` if unknown or removed.
    pub fn get(&self, task_id: TaskId) -> Option<TaskDescriptor> {
        self.record(task_id).map(|record| record.snapshot())
    }

    /// Snapshots of tasks that have not finished, in submission order.
    pub fn live_tasks(&self) -> Vec<TaskDescriptor> {
        self.registry
            .lock()
            .tasks
            .values()
            .filter(|record| record.is_live())
            .map(|record| record.snapshot())
            .collect()
    }

    /// Snapshots of every registered task, finished ones included, in
    /// submission order.
    pub fn all_tasks(&self) -> Vec<TaskDescriptor> {
        self.registry
            .lock()
            .tasks
            .values()
            .map(|record| record.snapshot())
            .collect()
    }

    /// Whether any registered task, live or finished, has an equal context.
    pub fn has_task_with_context(&self, context: &dyn TaskContext) -> bool {
        self.registry
            .lock()
            .tasks
            .values()
            .any(|record| record.context().same_context(context))
    }

    /// Whether a live task has an equal context.
    pub fn has_live_task_with_context(&self, context: &dyn TaskContext) -> bool {
        self.registry.lock().live_with_context(context).is_some()
    }

    /// The first task, in submission order, matching `predicate`.
    pub fn find_first_task<P>(&self, predicate: P) -> Option<TaskDescriptor>
    where
        P: Fn(&TaskDescriptor) -> bool,
    {
        self.all_tasks().into_iter().find(|task| predicate(task))
    }

    /// Every task matching `predicate`, in submission order.
    pub fn find_tasks<P>(&self, predicate: P) -> Vec<TaskDescriptor>
    where
        P: Fn(&TaskDescriptor) -> bool,
    {
        self.all_tasks()
            .into_iter()
            .filter(|task| predicate(task))
            .collect()
    }

    /// Requests cancellation of a task.
    ///
    /// A task registered here is interrupted cooperatively; one still queued
    /// finishes as interrupted without running. A task known only through a
    /// remote entry is cancelled by broadcasting a [`ClusterMessage`] to all
    /// nodes. Never waits for the task to stop.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the id is neither local nor remote.
    /// - [`TaskError::NotCancellable`] if the task was not submitted as
    ///   cancellable.
    /// - [`TaskError::Cluster`] if the broadcast could not be sent.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), TaskError> {
        if let Some(record) = self.record(task_id) {
            if !record.is_cancellable() {
                tracing::warn!(task_id = %task_id, "Refusing to cancel non-cancellable task");
                return Err(TaskError::NotCancellable { task_id });
            }
            let interrupted = record.request_cancel();
            tracing::debug!(task_id = %task_id, interrupted, "Cancellation requested");
            return Ok(());
        }

        let remote: Vec<RemoteTaskEntry> = self
            .remote
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .map(|entry| entry.value().clone())
            .collect();
        if remote.is_empty() {
            tracing::warn!(task_id = %task_id, "Cancellation requested for unknown task");
            return Err(TaskError::NotFound { task_id });
        }

        let cancellable: Vec<&RemoteTaskEntry> =
            remote.iter().filter(|entry| entry.cancellable).collect();
        if cancellable.is_empty() {
            tracing::warn!(task_id = %task_id, "Refusing to cancel non-cancellable remote task");
            return Err(TaskError::NotCancellable { task_id });
        }
        for entry in cancellable {
            tracing::debug!(
                task_id = %task_id,
                owner_node = %entry.node_id,
                "Broadcasting remote cancellation"
            );
            self.messenger.send(
                ClusterDestination::AllNodes,
                ClusterMessage::cancel_task(task_id, entry.node_id.clone()),
            )?;
        }
        Ok(())
    }

    /// Handles a message received from the cluster.
    ///
    /// Only the node that owns the task acts on a cancellation; every other
    /// node ignores it. Returns whether a local task was asked to cancel.
    pub fn handle_cluster_message(&self, message: &ClusterMessage) -> bool {
        match message.kind {
            ClusterMessageKind::CancelTask => {
                if message.node_id != self.config.node_id {
                    return false;
                }
                match self.record(message.task_id) {
                    Some(record) if record.is_cancellable() => {
                        let interrupted = record.request_cancel();
                        tracing::debug!(
                            task_id = %message.task_id,
                            interrupted,
                            "Cancellation received from cluster"
                        );
                        true
                    }
                    Some(_) => {
                        tracing::warn!(
                            task_id = %message.task_id,
                            "Cluster asked to cancel non-cancellable task"
                        );
                        false
                    }
                    None => {
                        tracing::debug!(
                            task_id = %message.task_id,
                            "Cluster cancellation for task no longer registered"
                        );
                        false
                    }
                }
            }
        }
    }

    /// Records the replicated view of a task owned by another node.
    ///
    /// Entries for this node's own tasks are ignored. A newer entry for the
    /// same task replaces the older one.
    pub fn register_remote_task(&self, entry: RemoteTaskEntry) {
        if entry.node_id == self.config.node_id {
            return;
        }
        self.remote
            .insert((entry.node_id.clone(), entry.task_id), entry);
    }

    /// Forgets a remote task. Returns the removed entry.
    pub fn remove_remote_task(&self, node_id: &NodeId, task_id: TaskId) -> Option<RemoteTaskEntry> {
        self.remote
            .remove(&(node_id.clone(), task_id))
            .map(|(_, entry)| entry)
    }

    /// All known remote tasks.
    pub fn remote_tasks(&self) -> Vec<RemoteTaskEntry> {
        let mut entries: Vec<RemoteTaskEntry> =
            self.remote.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| (&a.node_id, a.task_id).cmp(&(&b.node_id, b.task_id)));
        entries
    }

    /// Deregisters a task and returns its final snapshot.
    ///
    /// Meant for finished tasks. Removing a live task lets a new submission
    /// with the same context run alongside it.
    pub fn remove_task(&self, task_id: TaskId) -> Option<TaskDescriptor> {
        let record = self.registry.lock().tasks.remove(&task_id)?;
        if record.is_live() {
            tracing::warn!(task_id = %task_id, "Removed a task that has not finished");
        }
        Some(record.snapshot())
    }

    /// Blocks until the task finishes or `timeout` elapses, then returns its
    /// snapshot. Check [`TaskDescriptor::is_finished`] to tell which.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] if the task is not registered.
    pub fn wait_for_task(&self, task_id: TaskId, timeout: Duration) -> Result<TaskDescriptor, TaskError> {
        let record = self
            .record(task_id)
            .ok_or(TaskError::NotFound { task_id })?;
        record.wait_until_finished(timeout);
        Ok(record.snapshot())
    }

    /// The live progress indicator of a task, for registering listeners.
    ///
    /// `None` for unknown tasks and tasks whose work does not report progress.
    pub fn progress_indicator(&self, task_id: TaskId) -> Option<Arc<ProgressBroadcaster>> {
        self.record(task_id)
            .and_then(|record| record.progress().cloned())
    }

    /// Blocks until every worker is idle or `timeout` elapses. Returns
    /// whether the executor was idle when the wait ended.
    pub fn await_until_active_tasks_complete(&self, timeout: Duration) -> bool {
        self.executor.await_termination(timeout)
    }

    /// Stops accepting work, then waits up to `timeout` for running and
    /// queued tasks to finish.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        tracing::info!(node_id = %self.config.node_id, "Task manager shutting down");
        self.executor.shutdown();
        self.executor.await_termination(timeout)
    }

    /// Stops accepting work, interrupts running tasks, and returns snapshots
    /// of the queued tasks that will never run, in submission order.
    ///
    /// Those tasks finish right away as interrupted without running, which
    /// frees their contexts and wakes anyone waiting on them.
    pub fn shutdown_now(&self) -> Vec<TaskDescriptor> {
        tracing::info!(node_id = %self.config.node_id, "Task manager shutting down now");
        let drained = self.executor.shutdown_now();
        let records: Vec<Arc<TaskRecord>> = {
            let registry = self.registry.lock();
            drained
                .iter()
                .filter_map(Job::task_id)
                .filter_map(|task_id| registry.tasks.get(&task_id).cloned())
                .collect()
        };
        records
            .iter()
            .map(|record| {
                let abandoned = record.mark_started().and_then(|_| {
                    record.mark_finished(TaskOutcome::Failed(TaskFailure::Interrupted))
                });
                match abandoned {
                    Ok(_) => tracing::debug!(task_id = %record.id(), "Queued task abandoned"),
                    Err(err) => tracing::error!(
                        task_id = %record.id(),
                        error = %err,
                        "Queued task could not be abandoned"
                    ),
                }
                record.snapshot()
            })
            .collect()
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }

    fn record(&self, task_id: TaskId) -> Option<Arc<TaskRecord>> {
        self.registry.lock().tasks.get(&task_id).cloned()
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("node_id", &self.config.node_id)
            .field("tasks", &self.registry.lock().tasks.len())
            .field("remote_tasks", &self.remote.len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Runs one task on a worker thread, recording start, finish, and outcome.
fn run_task<W: TaskWork>(record: &TaskRecord, mut work: W) {
    let task_id = record.id();
    let interrupt = executor::current_interrupt().unwrap_or_default();
    let cancelled_before_start = record.attach_interrupt(interrupt);

    if let Err(err) = record.mark_started() {
        tracing::error!(task_id = %task_id, error = %err, "Task could not be started");
        record.detach_interrupt();
        return;
    }
    tracing::debug!(task_id = %task_id, description = %record.description(), "Task started");

    let outcome = if cancelled_before_start {
        TaskOutcome::Failed(TaskFailure::Interrupted)
    } else {
        match panic::catch_unwind(AssertUnwindSafe(|| work.run())) {
            Ok(Ok(output)) => match serde_json::to_value(&output) {
                Ok(value) => TaskOutcome::Completed(value),
                Err(err) => TaskOutcome::Failed(TaskFailure::Serialization(err.to_string())),
            },
            Ok(Err(err)) => TaskOutcome::Failed(TaskFailure::from_error(&err)),
            Err(payload) => TaskOutcome::Failed(TaskFailure::from_panic(payload.as_ref())),
        }
    };
    record.detach_interrupt();

    match &outcome {
        TaskOutcome::Completed(_) => {
            tracing::debug!(task_id = %task_id, "Task completed");
        }
        TaskOutcome::Failed(TaskFailure::Interrupted) => {
            tracing::debug!(task_id = %task_id, "Task interrupted");
        }
        TaskOutcome::Failed(TaskFailure::Panicked(message)) => {
            tracing::error!(task_id = %task_id, panic = %message, "Task panicked");
        }
        TaskOutcome::Failed(failure) => {
            tracing::warn!(task_id = %task_id, %failure, "Task failed");
        }
    }
    if let Err(err) = record.mark_finished(outcome) {
        tracing::error!(task_id = %task_id, error = %err, "Task could not be finished");
    }
}
