//! Default values shared by configuration and the progress-sink family.

/// Default number of worker threads a [`TaskManager`](crate::TaskManager) runs concurrently.
pub const DEFAULT_MAX_THREADS: usize = 4;

/// Prefix used to name worker threads (`task-worker-1`, `task-worker-2`, ...).
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "task-worker";

/// Number of recent progress events a broadcaster retains per task.
pub const DEFAULT_PROGRESS_HISTORY: usize = 10;

/// Lower bound of the percentage scale used by top-level progress indicators.
pub const PERCENT_MIN: i64 = 0;

/// Upper bound of the percentage scale used by top-level progress indicators.
pub const PERCENT_MAX: i64 = 100;

/// Owner recorded for tasks submitted without an authenticated user.
pub const ANONYMOUS_OWNER: &str = "anonymous";
