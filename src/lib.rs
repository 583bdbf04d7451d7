//! In-process background task execution with progress reporting.
//!
//! This crate runs long background operations (imports, exports,
//! re-indexing, synchronization) on a bounded pool of worker threads, while
//! giving callers a stable handle to poll status, progress, and the final
//! result, and to request cancellation.
//!
//! # Overview
//!
//! A caller submits a unit of work to a [`TaskManager`] together with a
//! description and a [`TaskContext`]. At most one live task may hold a given
//! context; a duplicate submission fails with [`TaskError::AlreadyExecuting`]
//! carrying the task that already runs. Accepted work is registered, wrapped
//! so its start and finish are recorded, and handed to a [`TaskExecutor`].
//!
//! A task moves through `Submitted -> Started -> Finished`. Callers read it
//! through [`TaskDescriptor`] snapshots, which never change once taken.
//!
//! Work that implements [`ProvidesProgress`] receives a [`ProgressSink`]
//! wired to the task's [`ProgressBroadcaster`]. Sinks compose, so nested
//! operations can report on their own scale and land on the task's 0-100
//! indicator.
//!
//! Cancellation is cooperative: a cancelled task's worker is interrupted and
//! the work is expected to notice (see [`executor::is_interrupted`]). Tasks
//! owned by another node are cancelled by a [`ClusterMessage`] broadcast.
//!
//! # Module Organization
//!
//! - [`types`] - Task ids, states, descriptors, contexts, progress events
//! - [`domain`] - The registry-held mutable task record
//! - [`progress`] - Progress sinks, broadcaster, and listeners
//! - [`executor`] - Bounded worker pool and cooperative interruption
//! - [`work`] - The unit-of-work trait and its optional capabilities
//! - [`cluster`] - Cross-node cancellation messages and remote task entries
//! - [`manager`] - The [`TaskManager`] façade
//! - [`config`] - [`TaskManagerConfig`]
//! - [`error`] - [`TaskError`] and [`TaskFailure`]
//! - [`constants`] - Defaults
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use background_tasks::{work_with_progress, ProgressSink, TaskManager, TaskManagerConfig};
//!
//! let manager = TaskManager::new(TaskManagerConfig::default().with_max_threads(2)).unwrap();
//!
//! let task = manager
//!     .submit(
//!         work_with_progress(|sink: &dyn ProgressSink| {
//!             sink.report(0, Some("Counting"), None);
//!             let mut total = 0_i64;
//!             for n in 1..=10 {
//!                 total += n;
//!                 sink.report(n * 10, Some("Counting"), None);
//!             }
//!             Ok(total)
//!         }),
//!         "Sum the first ten numbers",
//!         "sum:10",
//!     )
//!     .unwrap();
//!
//! let done = manager.wait_for_task(task.id(), Duration::from_secs(5)).unwrap();
//! assert_eq!(done.result(), Some(&serde_json::json!(55)));
//! assert_eq!(done.last_progress().unwrap().progress, 100);
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod executor;
pub mod manager;
pub mod progress;
pub mod types;
pub mod work;

pub use cluster::{
    ClusterDestination, ClusterMessage, ClusterMessageKind, ClusterMessenger, NodeId,
    RemoteTaskEntry, StandaloneMessenger,
};
pub use config::TaskManagerConfig;
pub use error::{Interrupted, TaskError, TaskFailure};
pub use executor::{Job, NamedThreadFactory, TaskExecutor, ThreadFactory};
pub use manager::{AnonymousUser, TaskManager, UserProvider};
pub use progress::{
    NullProgressSink, ProgressBroadcaster, ProgressListener, ProgressSink, RateLimitedLogSink,
    ScalingProgressSink, StatefulProgressSink, StepProgressSink, TaskLogger, TracingTaskLogger,
};
pub use types::{ProgressEvent, TaskContext, TaskDescriptor, TaskId, TaskOutcome, TaskState};
pub use work::{
    work, work_with_progress, ProgressWorkFn, ProvidesProgress, RequiresTaskInformation, TaskWork,
    WorkFn,
};
