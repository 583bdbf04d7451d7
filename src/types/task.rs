//! Task identity, lifecycle states, outcomes, and the descriptor snapshot.
//!
//! [`TaskDescriptor`] is what callers see. It is an immutable snapshot built
//! fresh from the registry-held [`TaskRecord`](crate::domain::TaskRecord) on
//! every read, so it can be passed around and inspected without locking.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::{NodeId, RemoteTaskEntry};
use crate::constants::ANONYMOUS_OWNER;
use crate::error::{TaskError, TaskFailure};
use crate::progress::broadcaster::ProgressBroadcaster;
use crate::types::context::TaskContext;
use crate::types::event::ProgressEvent;

/// Process-unique, monotonically increasing task identifier.
///
/// # Examples
///
/// ```
/// use background_tasks::TaskId;
///
/// let id = TaskId::new(42);
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "42");
/// assert!(TaskId::new(1) < TaskId::new(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// # State Machine
///
/// ```text
/// Submitted -> Started -> Finished
/// ```
///
/// There is no separate cancelled state: a cancelled task still passes
/// through `Started` and `Finished`, with an interrupted outcome.
///
/// # Examples
///
/// ```
/// use background_tasks::TaskState;
///
/// assert!(TaskState::Submitted.can_transition_to(&TaskState::Started));
/// assert!(!TaskState::Submitted.can_transition_to(&TaskState::Finished));
/// assert!(!TaskState::Started.can_transition_to(&TaskState::Started));
/// assert!(TaskState::Finished.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Registered and waiting for a worker.
    Submitted,
    /// Running on a worker thread.
    Started,
    /// Done, with a recorded outcome (terminal).
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Started => write!(f, "started"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

impl TaskState {
    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Returns `true` if moving from this state to `next` is a valid step.
    ///
    /// Only `Submitted -> Started` and `Started -> Finished` are valid.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Started) | (Self::Started, Self::Finished)
        )
    }

    /// Validates a transition, returning [`TaskError::InvalidTransition`] on
    /// double-start, finish-before-start, or double-finish.
    pub fn validate_transition(&self, task_id: TaskId, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id,
                from: *self,
                to: *next,
            })
        }
    }
}

/// How a finished task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The body returned normally; its output converted to JSON.
    Completed(Value),
    /// The body failed, panicked, or was interrupted.
    Failed(TaskFailure),
}

/// Elapsed run time: `(finished or now) - started`, or zero if not started.
pub(crate) fn run_time(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> Duration {
    match started_at {
        None => Duration::ZERO,
        Some(start) => {
            let end = finished_at.unwrap_or_else(Utc::now);
            (end - start).to_std().unwrap_or(Duration::ZERO)
        }
    }
}

/// Immutable snapshot of one submitted task.
///
/// Returned by [`TaskManager`](crate::TaskManager) for every query. The
/// canonical, mutable original stays in the manager's registry; a snapshot
/// never changes after it is taken. The progress indicator, when present, is
/// the task's live broadcaster and keeps reflecting new reports.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub(crate) id: TaskId,
    pub(crate) description: String,
    pub(crate) owner: Option<String>,
    pub(crate) node_id: NodeId,
    pub(crate) cancellable: bool,
    pub(crate) cancel_requested: bool,
    pub(crate) context: Arc<dyn TaskContext>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) outcome: Option<TaskOutcome>,
    pub(crate) progress: Option<Arc<ProgressBroadcaster>>,
}

impl TaskDescriptor {
    /// The task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Human description given at submission.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The submitting user, or `None` for anonymous submissions.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The submitting user, or `"anonymous"`.
    pub fn owner_or_anonymous(&self) -> &str {
        self.owner.as_deref().unwrap_or(ANONYMOUS_OWNER)
    }

    /// The node that owns and runs this task.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether [`TaskManager::cancel`](crate::TaskManager::cancel) is allowed.
    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// The deduplication key supplied at submission.
    pub fn context(&self) -> &Arc<dyn TaskContext> {
        &self.context
    }

    /// When the task was registered.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// When a worker began running the task.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the task finished.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Lifecycle state derived from the timestamps.
    pub fn state(&self) -> TaskState {
        match (self.started_at, self.finished_at) {
            (_, Some(_)) => TaskState::Finished,
            (Some(_), None) => TaskState::Started,
            (None, None) => TaskState::Submitted,
        }
    }

    /// Returns `true` once a worker has started the task.
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Returns `true` once the task has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Run time so far, or total run time once finished.
    pub fn elapsed_run_time(&self) -> Duration {
        run_time(self.started_at, self.finished_at)
    }

    /// The recorded outcome, present once finished.
    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    /// The JSON result of a task that completed normally.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Some(TaskOutcome::Completed(value)) => Some(value),
            _ => None,
        }
    }

    /// The failure of a task that did not complete normally.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.outcome {
            Some(TaskOutcome::Failed(failure)) => Some(failure),
            _ => None,
        }
    }

    /// The live progress indicator, if the task's work reports progress.
    pub fn progress_indicator(&self) -> Option<&Arc<ProgressBroadcaster>> {
        self.progress.as_ref()
    }

    /// The most recent progress event, if any has been reported.
    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.progress.as_ref().and_then(|p| p.last_event())
    }

    /// Builds the replicated, read-only view other nodes keep of this task.
    pub fn to_remote_entry(&self) -> RemoteTaskEntry {
        RemoteTaskEntry {
            node_id: self.node_id.clone(),
            task_id: self.id,
            description: self.description.clone(),
            owner: self.owner.clone(),
            cancellable: self.cancellable,
            state: self.state(),
        }
    }
}
