//! Progress sink that remembers where it is.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::{PERCENT_MAX, PERCENT_MIN};
use crate::error::TaskError;

use super::{ProgressSink, ScalingProgressSink, StepProgressSink};

/// Tracks an absolute progress value clamped to `[min, max]` and reports it
/// to a delegate after every change.
///
/// The sink is `Clone`; clones share the same current value. Views created
/// with [`create_step_view`](Self::create_step_view) and
/// [`create_percentage_sinks_for_range`](Self::create_percentage_sinks_for_range)
/// report back into this sink, so nested operations move the same absolute
/// value.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use background_tasks::{ProgressBroadcaster, ProgressSink, StatefulProgressSink, TaskId};
///
/// let top = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 1));
/// let progress = StatefulProgressSink::new(0, 100, top.clone()).unwrap();
///
/// progress.advance(10, Some("Loading"), None);
/// assert_eq!(progress.current(), 10);
///
/// // Steps 0..=4 of a sub-operation cover 10..=50 of the parent.
/// let copy = progress.create_step_view(10, 40, 4).unwrap();
/// copy.report(2, Some("Copying"), None);
/// assert_eq!(progress.current(), 30);
/// assert_eq!(top.last_event().unwrap().progress, 30);
/// ```
#[derive(Clone)]
pub struct StatefulProgressSink {
    min: i64,
    max: i64,
    current: Arc<Mutex<i64>>,
    delegate: Arc<dyn ProgressSink>,
}

impl StatefulProgressSink {
    /// Creates a sink over `[min, max]` starting at `min`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `min > max`.
    pub fn new(min: i64, max: i64, delegate: Arc<dyn ProgressSink>) -> Result<Self, TaskError> {
        Self::with_initial(min, max, min, delegate)
    }

    /// Creates a sink over `[min, max]` starting at `initial` (clamped).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `min > max`.
    pub fn with_initial(
        min: i64,
        max: i64,
        initial: i64,
        delegate: Arc<dyn ProgressSink>,
    ) -> Result<Self, TaskError> {
        if min > max {
            return Err(TaskError::invalid_argument(format!(
                "min {min} is greater than max {max}"
            )));
        }
        Ok(Self {
            min,
            max,
            current: Arc::new(Mutex::new(initial.clamp(min, max))),
            delegate,
        })
    }

    /// Lower bound of the absolute scale.
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Upper bound of the absolute scale.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Current absolute value.
    pub fn current(&self) -> i64 {
        *self.current.lock()
    }

    /// Adds `by` (which may be negative) to the current value, clamps, and
    /// reports the result.
    pub fn advance(&self, by: i64, sub_task: Option<&str>, message: Option<&str>) {
        let value = {
            let mut current = self.current.lock();
            *current = current.saturating_add(by).clamp(self.min, self.max);
            *current
        };
        self.delegate.report(value, sub_task, message);
    }

    /// Sets the current value (clamped) and reports it.
    pub fn set_absolute(&self, value: i64, sub_task: Option<&str>, message: Option<&str>) {
        let value = {
            let mut current = self.current.lock();
            *current = value.clamp(self.min, self.max);
            *current
        };
        self.delegate.report(value, sub_task, message);
    }

    /// Re-reports the current value with a new label and message.
    pub fn report_status(&self, sub_task: Option<&str>, message: Option<&str>) {
        let value = self.current();
        self.delegate.report(value, sub_task, message);
    }

    /// Returns a sink whose steps `0..=total_steps` map onto
    /// `[range_start, range_start + range_length]` of this sink's scale.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `range_length < 0` or
    /// `total_steps < 0`.
    pub fn create_step_view(
        &self,
        range_start: i64,
        range_length: i64,
        total_steps: i64,
    ) -> Result<StepProgressSink, TaskError> {
        if range_length < 0 {
            return Err(TaskError::invalid_argument(format!(
                "range length must not be negative, got {range_length}"
            )));
        }
        if total_steps < 0 {
            return Err(TaskError::invalid_argument(format!(
                "total steps must not be negative, got {total_steps}"
            )));
        }
        StepProgressSink::new(
            range_start,
            range_start.saturating_add(range_length),
            total_steps,
            Arc::new(self.clone()),
        )
    }

    /// Splits `[range_start, range_end]` of this sink's scale into `count`
    /// equal-width percentage sinks, in order.
    ///
    /// Each child tracks its own 0-100 percentage. The `i`-th child maps 0%
    /// onto `start + span*i/count` and 100% onto `start + span*(i+1)/count`
    /// of this sink, so a sub-operation reporting percentages lands on its
    /// slice of the parent. When `range_start == range_end` every child always
    /// forwards `range_start`. [`partition_bounds`](crate::progress::partition_bounds)
    /// returns the slices themselves.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `range_start > range_end`.
    pub fn create_percentage_sinks_for_range(
        &self,
        range_start: i64,
        range_end: i64,
        count: usize,
    ) -> Result<Vec<StatefulProgressSink>, TaskError> {
        let parent: Arc<dyn ProgressSink> = Arc::new(self.clone());
        partition_bounds(range_start, range_end, count)?
            .into_iter()
            .map(|(low, high)| {
                let slice = ScalingProgressSink::new(low, high, Arc::clone(&parent))?;
                StatefulProgressSink::new(PERCENT_MIN, PERCENT_MAX, Arc::new(slice))
            })
            .collect()
    }
}

/// The `count` equal-width slices `[start + span*i/count, start + span*(i+1)/count]`
/// of `[range_start, range_end]`, in order. Neighbouring slices share a bound.
///
/// # Errors
///
/// Returns [`TaskError::InvalidArgument`] if `range_start > range_end`.
pub fn partition_bounds(
    range_start: i64,
    range_end: i64,
    count: usize,
) -> Result<Vec<(i64, i64)>, TaskError> {
    if range_start > range_end {
        return Err(TaskError::invalid_argument(format!(
            "range start {range_start} is greater than range end {range_end}"
        )));
    }
    Ok((0..count)
        .map(|i| {
            (
                partition_bound(range_start, range_end, i, count),
                partition_bound(range_start, range_end, i + 1, count),
            )
        })
        .collect())
}

/// `start + (end - start) * index / count`, computed without overflow.
fn partition_bound(start: i64, end: i64, index: usize, count: usize) -> i64 {
    let span = i128::from(end) - i128::from(start);
    let offset = span * index as i128 / count as i128;
    i64::try_from(i128::from(start) + offset).unwrap_or(end)
}

impl ProgressSink for StatefulProgressSink {
    /// Treats `progress` as a new absolute value.
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        self.set_absolute(progress, sub_task, message);
    }
}

impl fmt::Debug for StatefulProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulProgressSink")
            .field("range", &(self.min..=self.max))
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
