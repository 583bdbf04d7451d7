//! Task record -- the registry's canonical, mutable representation of a task.
//!
//! [`TaskRecord`] holds everything the manager needs to drive one task:
//! identity, the lifecycle timestamps and outcome behind a mutex, the live
//! progress broadcaster, and the cancellation control used to interrupt the
//! worker running it. Callers never see a `TaskRecord` through the manager;
//! they get a [`TaskDescriptor`] built by [`TaskRecord::snapshot`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::cluster::NodeId;
use crate::error::TaskError;
use crate::executor::Interrupt;
use crate::progress::broadcaster::ProgressBroadcaster;
use crate::types::context::TaskContext;
use crate::types::task::{run_time, TaskDescriptor, TaskId, TaskOutcome, TaskState};

/// Timestamps and outcome of one task, guarded as a unit so that a reader
/// never sees `finished` without `started` or a finish without an outcome.
#[derive(Debug, Clone)]
pub(crate) struct TaskLifecycle {
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) outcome: Option<TaskOutcome>,
}

impl TaskLifecycle {
    fn new() -> Self {
        Self {
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        match (self.started_at, self.finished_at) {
            (_, Some(_)) => TaskState::Finished,
            (Some(_), None) => TaskState::Started,
            (None, None) => TaskState::Submitted,
        }
    }

    pub(crate) fn elapsed_run_time(&self) -> Duration {
        run_time(self.started_at, self.finished_at)
    }
}

#[derive(Debug, Default)]
struct CancelControl {
    requested: bool,
    interrupt: Option<Interrupt>,
}

/// Canonical registry entry for one task.
///
/// Lifecycle transitions are validated: [`mark_started`](Self::mark_started)
/// succeeds once, and [`mark_finished`](Self::mark_finished) succeeds once and
/// only after a start.
///
/// # Examples
///
/// ```
/// use background_tasks::domain::TaskRecord;
/// use background_tasks::{NodeId, TaskId, TaskOutcome, TaskState};
/// use serde_json::json;
///
/// let record = TaskRecord::new(TaskId::new(1), "Export issues", "export:ALPHA", NodeId::new("n1"))
///     .with_owner(Some("admin".to_string()));
/// assert_eq!(record.state(), TaskState::Submitted);
///
/// // Finishing before starting is a programming error.
/// assert!(record.mark_finished(TaskOutcome::Completed(json!(null))).is_err());
///
/// record.mark_started().unwrap();
/// record.mark_finished(TaskOutcome::Completed(json!({"rows": 12}))).unwrap();
///
/// let snapshot = record.snapshot();
/// assert!(snapshot.is_finished());
/// assert_eq!(snapshot.result(), Some(&json!({"rows": 12})));
/// assert_eq!(snapshot.owner(), Some("admin"));
/// ```
#[derive(Debug)]
pub struct TaskRecord {
    id: TaskId,
    description: String,
    owner: Option<String>,
    node_id: NodeId,
    cancellable: bool,
    context: Arc<dyn TaskContext>,
    lifecycle: Arc<Mutex<TaskLifecycle>>,
    finished: Condvar,
    progress: Option<Arc<ProgressBroadcaster>>,
    control: Mutex<CancelControl>,
}

impl TaskRecord {
    /// Creates a record in the `Submitted` state, stamping the submission time.
    pub fn new(
        id: TaskId,
        description: impl Into<String>,
        context: impl TaskContext,
        node_id: NodeId,
    ) -> Self {
        Self::with_shared_context(id, description.into(), Arc::new(context), node_id)
    }

    pub(crate) fn with_shared_context(
        id: TaskId,
        description: String,
        context: Arc<dyn TaskContext>,
        node_id: NodeId,
    ) -> Self {
        Self {
            id,
            description,
            owner: None,
            node_id,
            cancellable: false,
            context,
            lifecycle: Arc::new(Mutex::new(TaskLifecycle::new())),
            finished: Condvar::new(),
            progress: None,
            control: Mutex::new(CancelControl::default()),
        }
    }

    /// Sets the owning user. `None` means anonymous.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Marks the task as cancellable.
    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    /// Attaches a progress broadcaster retaining `history` recent events.
    ///
    /// The broadcaster computes each event's elapsed run time from this
    /// record's lifecycle.
    pub fn with_progress(mut self, history: usize) -> Self {
        self.progress = Some(Arc::new(ProgressBroadcaster::for_lifecycle(
            self.id,
            history,
            Arc::clone(&self.lifecycle),
        )));
        self
    }

    /// The task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Human description given at submission.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The deduplication key.
    pub fn context(&self) -> &dyn TaskContext {
        self.context.as_ref()
    }

    /// Whether cancellation is permitted.
    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    /// The live progress broadcaster, if attached.
    pub fn progress(&self) -> Option<&Arc<ProgressBroadcaster>> {
        self.progress.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.lifecycle.lock().state()
    }

    /// Returns `true` until the task has finished.
    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Records the start of execution.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidTransition`] if the task was already started.
    pub fn mark_started(&self) -> Result<DateTime<Utc>, TaskError> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle
            .state()
            .validate_transition(self.id, &TaskState::Started)?;
        let now = Utc::now();
        lifecycle.started_at = Some(now);
        Ok(now)
    }

    /// Records the end of execution together with its outcome, and wakes
    /// anyone waiting in [`wait_until_finished`](Self::wait_until_finished).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidTransition`] if the task was not started
    /// or has already finished.
    pub fn mark_finished(&self, outcome: TaskOutcome) -> Result<DateTime<Utc>, TaskError> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle
            .state()
            .validate_transition(self.id, &TaskState::Finished)?;
        // Wall clock may step backwards; finish never precedes start.
        let now = match lifecycle.started_at {
            Some(started) if started > Utc::now() => started,
            _ => Utc::now(),
        };
        lifecycle.finished_at = Some(now);
        lifecycle.outcome = Some(outcome);
        drop(lifecycle);
        self.finished.notify_all();
        Ok(now)
    }

    /// Blocks until the task finishes or `timeout` elapses.
    ///
    /// Returns whether the task had finished when the wait ended. A zero
    /// timeout checks without blocking.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.finished_at.is_none() && !timeout.is_zero() {
            self.finished
                .wait_while_for(&mut lifecycle, |l| l.finished_at.is_none(), timeout);
        }
        lifecycle.finished_at.is_some()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.control.lock().requested
    }

    /// Records a cancellation request and interrupts the running worker, if
    /// one is attached. Returns `true` if a worker was interrupted.
    ///
    /// A finished task is left untouched.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut control = self.control.lock();
        if !self.is_live() {
            return false;
        }
        control.requested = true;
        match &control.interrupt {
            Some(interrupt) => {
                interrupt.interrupt();
                true
            }
            None => false,
        }
    }

    /// Attaches the interrupt handle of the worker about to run this task.
    ///
    /// If cancellation was requested before the worker got here, the handle
    /// is interrupted immediately and `true` is returned.
    pub(crate) fn attach_interrupt(&self, interrupt: Interrupt) -> bool {
        let mut control = self.control.lock();
        if control.requested {
            interrupt.interrupt();
        }
        control.interrupt = Some(interrupt);
        control.requested
    }

    /// Drops the worker's interrupt handle once the task is done with it.
    pub(crate) fn detach_interrupt(&self) {
        self.control.lock().interrupt = None;
    }

    /// Builds an immutable snapshot of this record.
    pub fn snapshot(&self) -> TaskDescriptor {
        let lifecycle = self.lifecycle.lock().clone();
        let cancel_requested = self.is_cancel_requested();
        TaskDescriptor {
            id: self.id,
            description: self.description.clone(),
            owner: self.owner.clone(),
            node_id: self.node_id.clone(),
            cancellable: self.cancellable,
            cancel_requested,
            context: Arc::clone(&self.context),
            submitted_at: lifecycle.submitted_at,
            started_at: lifecycle.started_at,
            finished_at: lifecycle.finished_at,
            outcome: lifecycle.outcome,
            progress: self.progress.clone(),
        }
    }
}
