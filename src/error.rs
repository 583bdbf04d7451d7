//! Error types for task submission, lifecycle, and cancellation.
//!
//! Two families live here:
//!
//! - [`TaskError`] is returned synchronously from manager, executor, and
//!   progress-sink construction calls.
//! - [`TaskFailure`] is recorded on a task's descriptor when its body fails,
//!   panics, or is interrupted. It is `Clone` so that descriptor snapshots can
//!   carry it.
//!
//! [`Interrupted`] is the marker a unit of work returns (usually via `?` into
//! `anyhow::Error`) when it observes a cancellation request and unwinds.

use std::io;

use thiserror::Error;

use crate::types::task::{TaskDescriptor, TaskId, TaskState};

/// Errors returned by synchronous task operations.
///
/// Variants split into two groups, see [`is_recoverable`](Self::is_recoverable):
/// contention and rejection are expected conditions a caller handles;
/// everything else indicates a programming error at the call site.
///
/// # Examples
///
/// ```
/// use background_tasks::{TaskError, TaskId};
///
/// let err = TaskError::NotFound { task_id: TaskId::new(7) };
/// assert!(!err.is_recoverable());
/// assert_eq!(err.to_string(), "task not found: 7");
///
/// assert!(TaskError::Rejected.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// A constructor or operation received an argument outside its domain.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// Attempted an invalid lifecycle transition (double start, finish before start).
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: TaskId,
        /// The current state of the task.
        from: TaskState,
        /// The target state that was rejected.
        to: TaskState,
    },

    /// No task with the given id is registered locally or remotely.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The id that was looked up.
        task_id: TaskId,
    },

    /// The task was submitted without the cancellable flag.
    #[error("task {task_id} is not cancellable")]
    NotCancellable {
        /// The task that was asked to cancel.
        task_id: TaskId,
    },

    /// A live task with an equal context already exists.
    ///
    /// Carries a snapshot of the existing task so callers can redirect to it.
    #[error("a task with an equal context is already executing: task {}", existing.id())]
    AlreadyExecuting {
        /// Snapshot of the live task that owns the context.
        existing: Box<TaskDescriptor>,
    },

    /// The executor has been shut down and accepts no further work.
    #[error("submission rejected: executor is shut down")]
    Rejected,

    /// The thread factory failed to create a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// The cluster messenger could not deliver a message.
    #[error("cluster messaging failed: {0}")]
    Cluster(String),
}

impl TaskError {
    /// Shorthand for [`TaskError::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns `true` for conditions a well-behaved caller is expected to
    /// handle: duplicate-context contention and rejection after shutdown.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyExecuting { .. } | Self::Rejected)
    }

    /// Returns the existing task for [`TaskError::AlreadyExecuting`].
    pub fn existing_task(&self) -> Option<&TaskDescriptor> {
        match self {
            Self::AlreadyExecuting { existing } => Some(existing),
            _ => None,
        }
    }
}

/// Marker error for a unit of work that stopped because it was interrupted.
///
/// Returning this (directly or wrapped in `anyhow::Error`) records the task as
/// [`TaskFailure::Interrupted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task was interrupted")]
pub struct Interrupted;

/// Why a task finished without a result.
///
/// Recorded on the descriptor instead of surfacing on any worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    /// The task observed a cancellation request and unwound, or was cancelled
    /// before a worker picked it up.
    #[error("interrupted")]
    Interrupted,

    /// The task body returned an error.
    #[error("failed: {0}")]
    Failed(String),

    /// The task body panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The task produced a value that could not be converted to JSON.
    #[error("result serialization failed: {0}")]
    Serialization(String),
}

impl TaskFailure {
    /// Classifies a task body error.
    ///
    /// Any error whose chain contains [`Interrupted`] becomes
    /// [`TaskFailure::Interrupted`]; everything else keeps its rendered chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if err.chain().any(|cause| cause.is::<Interrupted>()) {
            Self::Interrupted
        } else {
            Self::Failed(format!("{err:#}"))
        }
    }

    /// Builds a failure from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
