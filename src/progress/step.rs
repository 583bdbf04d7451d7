//! Discrete step counting mapped onto a range.

use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;

use super::{map_linear, ProgressSink};

/// Maps step numbers `0..=total_steps` onto `[start, end]` of the delegate.
///
/// Useful when work is naturally counted ("issue 37 of 120") rather than
/// expressed as a percentage. Step numbers outside `0..=total_steps` are
/// clamped. With zero steps every report lands on `end`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use background_tasks::{ProgressBroadcaster, ProgressSink, StepProgressSink, TaskId};
///
/// let top = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 1));
/// let steps = StepProgressSink::new(0, 100, 4, top.clone()).unwrap();
/// steps.report(1, Some("Copying attachments"), None);
/// assert_eq!(top.last_event().unwrap().progress, 25);
/// ```
pub struct StepProgressSink {
    start: i64,
    end: i64,
    total_steps: i64,
    delegate: Arc<dyn ProgressSink>,
}

impl StepProgressSink {
    /// Creates a step sink.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `start > end` or
    /// `total_steps < 0`.
    pub fn new(
        start: i64,
        end: i64,
        total_steps: i64,
        delegate: Arc<dyn ProgressSink>,
    ) -> Result<Self, TaskError> {
        if start > end {
            return Err(TaskError::invalid_argument(format!(
                "start {start} is greater than end {end}"
            )));
        }
        if total_steps < 0 {
            return Err(TaskError::invalid_argument(format!(
                "total steps must not be negative, got {total_steps}"
            )));
        }
        Ok(Self {
            start,
            end,
            total_steps,
            delegate,
        })
    }

    /// Number of steps this sink divides its range into.
    pub fn total_steps(&self) -> i64 {
        self.total_steps
    }

    /// The value reporting `step` forwards to the delegate.
    pub fn scale(&self, step: i64) -> i64 {
        map_linear(step, 0, self.total_steps, self.start, self.end)
    }
}

impl ProgressSink for StepProgressSink {
    fn report(&self, step: i64, sub_task: Option<&str>, message: Option<&str>) {
        self.delegate.report(self.scale(step), sub_task, message);
    }
}

impl fmt::Debug for StepProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepProgressSink")
            .field("range", &(self.start..=self.end))
            .field("total_steps", &self.total_steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::RecordingSink;

    #[test]
    fn steps_divide_range() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = StepProgressSink::new(10, 20, 5, recorder.clone()).unwrap();
        for step in 0..=5 {
            sink.report(step, None, None);
        }
        assert_eq!(recorder.values(), vec![10, 12, 14, 16, 18, 20]);
    }

    #[test]
    fn uneven_division_truncates() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = StepProgressSink::new(0, 100, 3, recorder.clone()).unwrap();
        for step in 0..=3 {
            sink.report(step, None, None);
        }
        assert_eq!(recorder.values(), vec![0, 33, 66, 100]);
    }

    #[test]
    fn out_of_range_steps_clamp() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = StepProgressSink::new(0, 100, 10, recorder.clone()).unwrap();
        sink.report(-3, None, None);
        sink.report(11, None, None);
        sink.report(i64::MAX, None, None);
        assert_eq!(recorder.values(), vec![0, 100, 100]);
    }

    #[test]
    fn zero_steps_reports_end() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = StepProgressSink::new(0, 100, 0, recorder.clone()).unwrap();
        sink.report(0, None, None);
        assert_eq!(recorder.values(), vec![100]);
    }

    #[test]
    fn invalid_construction_rejected() {
        let recorder: Arc<dyn ProgressSink> = Arc::new(RecordingSink::default());
        assert!(StepProgressSink::new(1, 0, 10, recorder.clone()).is_err());
        assert!(StepProgressSink::new(0, 10, -1, recorder).is_err());
    }
}
