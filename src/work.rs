//! Units of work submitted to a [`TaskManager`](crate::TaskManager).
//!
//! A unit implements [`TaskWork`]. Two optional capabilities are detected by
//! the manager before the unit runs:
//!
//! - [`ProvidesProgress`]: the unit receives a [`ProgressSink`] wired to the
//!   task's progress indicator. Tasks whose work lacks this capability have
//!   no indicator.
//! - [`RequiresTaskInformation`]: the unit receives a snapshot of its own
//!   descriptor once the task is registered.
//!
//! Closures can be submitted through [`work`] and [`work_with_progress`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::progress::{NullProgressSink, ProgressSink};
use crate::types::task::TaskDescriptor;

/// A unit of background work.
///
/// The output is stored on the task's descriptor as JSON.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use background_tasks::{ProgressSink, ProvidesProgress, TaskWork};
///
/// struct Export {
///     rows: u32,
///     sink: Option<Arc<dyn ProgressSink>>,
/// }
///
/// impl ProvidesProgress for Export {
///     fn set_progress_sink(&mut self, sink: Arc<dyn ProgressSink>) {
///         self.sink = Some(sink);
///     }
/// }
///
/// impl TaskWork for Export {
///     type Output = u32;
///
///     fn run(&mut self) -> anyhow::Result<u32> {
///         if let Some(sink) = &self.sink {
///             sink.report(100, Some("Exporting"), None);
///         }
///         Ok(self.rows)
///     }
///
///     fn progress_aware(&mut self) -> Option<&mut dyn ProvidesProgress> {
///         Some(self)
///     }
/// }
/// ```
pub trait TaskWork: Send + 'static {
    /// The value a successful run produces.
    type Output: Serialize;

    /// Does the work on a worker thread.
    ///
    /// Long-running work should poll
    /// [`executor::is_interrupted`](crate::executor::is_interrupted) (or sleep
    /// through [`executor::sleep_interruptibly`](crate::executor::sleep_interruptibly))
    /// and return [`Interrupted`](crate::Interrupted) when asked to stop.
    ///
    /// # Errors
    ///
    /// Any error is recorded on the task's descriptor.
    fn run(&mut self) -> anyhow::Result<Self::Output>;

    /// Returns the progress capability, if this unit reports progress.
    fn progress_aware(&mut self) -> Option<&mut dyn ProvidesProgress> {
        None
    }

    /// Returns the descriptor capability, if this unit wants its descriptor.
    fn descriptor_aware(&mut self) -> Option<&mut dyn RequiresTaskInformation> {
        None
    }
}

/// Capability: accepts a progress sink before running.
pub trait ProvidesProgress {
    /// Receives the sink wired to the task's progress indicator.
    fn set_progress_sink(&mut self, sink: Arc<dyn ProgressSink>);
}

/// Capability: accepts its own descriptor once the task is registered.
pub trait RequiresTaskInformation {
    /// Receives a snapshot of the freshly registered task.
    fn set_task_descriptor(&mut self, descriptor: TaskDescriptor);
}

/// Work built from a closure. See [`work`].
pub struct WorkFn<F> {
    body: F,
}

/// Wraps a closure as a unit of work without progress reporting.
///
/// # Examples
///
/// ```
/// use background_tasks::{work, TaskWork};
///
/// let mut unit = work(|| Ok(2 + 2));
/// assert_eq!(unit.run().unwrap(), 4);
/// ```
pub fn work<F, T>(body: F) -> WorkFn<F>
where
    F: FnMut() -> anyhow::Result<T> + Send + 'static,
    T: Serialize,
{
    WorkFn { body }
}

impl<F, T> TaskWork for WorkFn<F>
where
    F: FnMut() -> anyhow::Result<T> + Send + 'static,
    T: Serialize,
{
    type Output = T;

    fn run(&mut self) -> anyhow::Result<T> {
        (self.body)()
    }
}

impl<F> fmt::Debug for WorkFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkFn").finish_non_exhaustive()
    }
}

/// Work built from a closure that reports progress. See [`work_with_progress`].
pub struct ProgressWorkFn<F> {
    body: F,
    sink: Option<Arc<dyn ProgressSink>>,
}

/// Wraps a closure that receives the task's progress sink.
///
/// Run outside a manager, the closure gets a sink that discards reports.
///
/// # Examples
///
/// ```
/// use background_tasks::{work_with_progress, ProgressSink, TaskWork};
///
/// let mut unit = work_with_progress(|sink: &dyn ProgressSink| {
///     sink.report(50, Some("Halfway"), None);
///     Ok("done")
/// });
/// assert!(unit.progress_aware().is_some());
/// assert_eq!(unit.run().unwrap(), "done");
/// ```
pub fn work_with_progress<F, T>(body: F) -> ProgressWorkFn<F>
where
    F: FnMut(&dyn ProgressSink) -> anyhow::Result<T> + Send + 'static,
    T: Serialize,
{
    ProgressWorkFn { body, sink: None }
}

impl<F> ProvidesProgress for ProgressWorkFn<F> {
    fn set_progress_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sink = Some(sink);
    }
}

impl<F, T> TaskWork for ProgressWorkFn<F>
where
    F: FnMut(&dyn ProgressSink) -> anyhow::Result<T> + Send + 'static,
    T: Serialize,
{
    type Output = T;

    fn run(&mut self) -> anyhow::Result<T> {
        let sink: Arc<dyn ProgressSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(NullProgressSink),
        };
        (self.body)(sink.as_ref())
    }

    fn progress_aware(&mut self) -> Option<&mut dyn ProvidesProgress> {
        Some(self)
    }
}

impl<F> fmt::Debug for ProgressWorkFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressWorkFn")
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}
