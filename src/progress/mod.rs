//! Progress reporting for long-running work.
//!
//! A unit of work reports through a [`ProgressSink`]. Sinks compose: each
//! decorator remaps the incoming value onto a sub-range of its delegate's
//! scale, so nested operations can report 0..N of their own work and have it
//! land proportionally on a task's single 0-100 indicator.
//!
//! - [`ScalingProgressSink`] - maps `[virtual_start, virtual_end]` onto `[actual_start, actual_end]`
//! - [`StepProgressSink`] - maps `0..=total_steps` onto `[start, end]`
//! - [`StatefulProgressSink`] - tracks an absolute value with `advance`/`set_absolute`
//! - [`RateLimitedLogSink`] - forwards everything, logs at most once per interval
//! - [`ProgressBroadcaster`] - turns reports into [`ProgressEvent`](crate::ProgressEvent)s for listeners
//!
//! Construction validates its arguments and fails fast. Reporting never fails:
//! out-of-range values are clamped.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use background_tasks::{ProgressBroadcaster, ProgressSink, ScalingProgressSink, TaskId};
//!
//! let top = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 5));
//! // The second half of the task is an export reporting its own 0-100.
//! let export = ScalingProgressSink::new(50, 100, top.clone()).unwrap();
//! export.report(50, Some("Exporting"), None);
//! assert_eq!(top.last_event().unwrap().progress, 75);
//! ```

pub mod broadcaster;
pub mod log;
pub mod scaling;
pub mod stateful;
pub mod step;

use std::sync::Arc;

pub use broadcaster::{ProgressBroadcaster, ProgressListener};
pub use log::{RateLimitedLogSink, TaskLogger, TracingTaskLogger};
pub use scaling::ScalingProgressSink;
pub use stateful::{partition_bounds, StatefulProgressSink};
pub use step::StepProgressSink;

/// Receives progress reports from running work.
///
/// Implementations must not panic on any input; values outside the sink's
/// domain are clamped.
pub trait ProgressSink: Send + Sync {
    /// Reports `progress` with an optional sub-task label and message.
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>);
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        (**self).report(progress, sub_task, message);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &S {
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        (**self).report(progress, sub_task, message);
    }
}

/// A sink that drops all reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _progress: i64, _sub_task: Option<&str>, _message: Option<&str>) {}
}

/// Linearly maps `value` from `[in_min, in_max]` onto `[out_min, out_max]`.
///
/// `value` is clamped into the input domain first. A degenerate output range
/// yields `out_min`; a degenerate input range yields `out_max`. Arithmetic is
/// carried out on unsigned 128-bit offsets, so any `i64` bounds are safe.
/// Callers guarantee `in_min <= in_max` and `out_min <= out_max`.
pub(crate) fn map_linear(value: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    if out_min == out_max {
        return out_min;
    }
    if in_min == in_max {
        return out_max;
    }
    let clamped = value.clamp(in_min, in_max);
    let offset = span(in_min, clamped);
    let in_span = span(in_min, in_max);
    let out_span = span(out_min, out_max);
    // offset <= in_span, so the quotient never exceeds out_span.
    let scaled = offset * out_span / in_span;
    let mapped = i128::from(out_min) + scaled as i128;
    i64::try_from(mapped).unwrap_or(out_max)
}

fn span(low: i64, high: i64) -> u128 {
    (i128::from(high) - i128::from(low)) as u128
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::ProgressSink;

    /// Captures every report for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        reports: Mutex<Vec<(i64, Option<String>, Option<String>)>>,
    }

    impl RecordingSink {
        pub(crate) fn values(&self) -> Vec<i64> {
            self.reports.lock().iter().map(|(v, _, _)| *v).collect()
        }

        pub(crate) fn last(&self) -> Option<(i64, Option<String>, Option<String>)> {
            self.reports.lock().last().cloned()
        }
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
            self.reports.lock().push((
                progress,
                sub_task.map(str::to_string),
                message.map(str::to_string),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_endpoints_and_midpoint() {
        assert_eq!(map_linear(0, 0, 100, 0, 10), 0);
        assert_eq!(map_linear(50, 0, 100, 0, 10), 5);
        assert_eq!(map_linear(100, 0, 100, 0, 10), 10);
    }

    #[test]
    fn clamps_out_of_domain_values() {
        assert_eq!(map_linear(-1, 0, 100, 0, 10), 0);
        assert_eq!(map_linear(20_000, 0, 100, 0, 10), 10);
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        assert_eq!(map_linear(i64::MIN, i64::MIN, i64::MAX, i64::MIN, i64::MAX), i64::MIN);
        assert_eq!(map_linear(i64::MAX, i64::MIN, i64::MAX, i64::MIN, i64::MAX), i64::MAX);
        assert_eq!(map_linear(0, i64::MIN, i64::MAX, 0, 100), 50);
        assert_eq!(map_linear(i64::MAX, 0, 100, i64::MIN, i64::MAX), i64::MAX);
    }

    #[test]
    fn degenerate_ranges() {
        assert_eq!(map_linear(75, 0, 100, 7, 7), 7);
        assert_eq!(map_linear(-5, 3, 3, 0, 10), 10);
    }

    #[test]
    fn null_sink_accepts_anything() {
        NullProgressSink.report(i64::MIN, None, None);
        NullProgressSink.report(i64::MAX, Some("x"), Some("y"));
    }
}
