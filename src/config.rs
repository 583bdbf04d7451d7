//! Configuration for [`TaskManager`](crate::TaskManager).

use crate::cluster::NodeId;
use crate::constants::{DEFAULT_MAX_THREADS, DEFAULT_PROGRESS_HISTORY, DEFAULT_THREAD_NAME_PREFIX};
use crate::error::TaskError;

/// Tunables for a task manager and the executor it owns.
///
/// # Defaults
///
/// | Setting              | Default          | Description                                   |
/// |----------------------|------------------|-----------------------------------------------|
/// | `max_threads`        | 4                | Concurrently running tasks; the rest queue    |
/// | `thread_name_prefix` | `"task-worker"`  | Worker threads are named `{prefix}-{n}`       |
/// | `progress_history`   | 10               | Progress events retained per task             |
/// | `node_id`            | random UUID v4   | Identity of this process in a cluster         |
///
/// # Examples
///
/// ```
/// use background_tasks::TaskManagerConfig;
///
/// let config = TaskManagerConfig::default();
/// assert_eq!(config.max_threads, 4);
/// assert_eq!(config.thread_name_prefix, "task-worker");
/// assert_eq!(config.progress_history, 10);
///
/// let custom = TaskManagerConfig::default()
///     .with_max_threads(2)
///     .with_thread_name_prefix("reindex")
///     .with_progress_history(50);
/// assert_eq!(custom.max_threads, 2);
/// assert!(custom.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum number of tasks running at the same time. Must be positive.
    pub max_threads: usize,

    /// Name prefix for worker threads.
    pub thread_name_prefix: String,

    /// Number of most recent progress events each task's broadcaster keeps.
    /// Zero keeps only the latest event.
    pub progress_history: usize,

    /// Identity of this node, stamped on descriptors and cluster messages.
    pub node_id: NodeId,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            progress_history: DEFAULT_PROGRESS_HISTORY,
            node_id: NodeId::random(),
        }
    }
}

impl TaskManagerConfig {
    /// Sets the worker pool size.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets how many progress events each task retains.
    pub fn with_progress_history(mut self, events: usize) -> Self {
        self.progress_history = events;
        self
    }

    /// Sets this node's cluster identity.
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Checks the configuration for values the executor cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `max_threads` is zero.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.max_threads == 0 {
            return Err(TaskError::invalid_argument("max_threads must be positive"));
        }
        Ok(())
    }
}
