//! Linear range remapping.

use std::fmt;
use std::sync::Arc;

use crate::constants::{PERCENT_MAX, PERCENT_MIN};
use crate::error::TaskError;

use super::{map_linear, ProgressSink};

/// Remaps reports from a virtual domain onto an actual range of the delegate.
///
/// Incoming values are clamped into `[virtual_start, virtual_end]` (default
/// `[0, 100]`) and mapped linearly onto `[actual_start, actual_end]`. When
/// the actual range is a single point, every report forwards that point.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use background_tasks::{ProgressBroadcaster, ProgressSink, ScalingProgressSink, TaskId};
///
/// let top = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 10));
/// let sink = ScalingProgressSink::new(0, 10, top.clone()).unwrap();
///
/// for input in [0, 50, 100, -1, 20_000] {
///     sink.report(input, None, None);
/// }
/// let forwarded: Vec<i64> = top.last_events().iter().map(|e| e.progress).collect();
/// assert_eq!(forwarded, vec![0, 5, 10, 0, 10]);
///
/// assert!(ScalingProgressSink::new(10, 0, top).is_err());
/// ```
pub struct ScalingProgressSink {
    actual_start: i64,
    actual_end: i64,
    virtual_start: i64,
    virtual_end: i64,
    delegate: Arc<dyn ProgressSink>,
}

impl ScalingProgressSink {
    /// Maps a 0-100 percentage onto `[actual_start, actual_end]`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `actual_start > actual_end`.
    pub fn new(
        actual_start: i64,
        actual_end: i64,
        delegate: Arc<dyn ProgressSink>,
    ) -> Result<Self, TaskError> {
        Self::with_virtual_range(actual_start, actual_end, PERCENT_MIN, PERCENT_MAX, delegate)
    }

    /// Maps `[virtual_start, virtual_end]` onto `[actual_start, actual_end]`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if either range is inverted.
    pub fn with_virtual_range(
        actual_start: i64,
        actual_end: i64,
        virtual_start: i64,
        virtual_end: i64,
        delegate: Arc<dyn ProgressSink>,
    ) -> Result<Self, TaskError> {
        if actual_start > actual_end {
            return Err(TaskError::invalid_argument(format!(
                "actual start {actual_start} is greater than actual end {actual_end}"
            )));
        }
        if virtual_start > virtual_end {
            return Err(TaskError::invalid_argument(format!(
                "virtual start {virtual_start} is greater than virtual end {virtual_end}"
            )));
        }
        Ok(Self {
            actual_start,
            actual_end,
            virtual_start,
            virtual_end,
            delegate,
        })
    }

    /// The value a report of `progress` forwards to the delegate.
    pub fn scale(&self, progress: i64) -> i64 {
        map_linear(
            progress,
            self.virtual_start,
            self.virtual_end,
            self.actual_start,
            self.actual_end,
        )
    }
}

impl ProgressSink for ScalingProgressSink {
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        self.delegate.report(self.scale(progress), sub_task, message);
    }
}

impl fmt::Debug for ScalingProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalingProgressSink")
            .field("actual", &(self.actual_start..=self.actual_end))
            .field("virtual", &(self.virtual_start..=self.virtual_end))
            .finish_non_exhaustive()
    }
}
