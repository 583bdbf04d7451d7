//! Progress sink that also writes throttled log lines.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::TaskError;

use super::ProgressSink;

/// A named destination for progress log lines.
pub trait TaskLogger: Send + Sync {
    /// Name identifying this logger (e.g. the subsystem doing the work).
    fn name(&self) -> &str;

    /// Writes one line.
    fn log(&self, timestamp: DateTime<Utc>, line: &str);
}

/// [`TaskLogger`] that emits lines as `tracing` events at `INFO`.
#[derive(Debug, Clone)]
pub struct TracingTaskLogger {
    name: String,
}

impl TracingTaskLogger {
    /// Creates a logger; `name` is attached to every event as the `logger` field.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TaskLogger for TracingTaskLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn log(&self, timestamp: DateTime<Utc>, line: &str) {
        tracing::info!(logger = %self.name, at = %timestamp.to_rfc3339(), "{line}");
    }
}

/// Forwards every report to its delegate and logs a progress line at most
/// once per `min_interval`.
///
/// The first report is always logged. A zero interval logs every report.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use background_tasks::{NullProgressSink, ProgressSink, RateLimitedLogSink, TracingTaskLogger};
///
/// let sink = RateLimitedLogSink::new(
///     Arc::new(TracingTaskLogger::new("reindex")),
///     "Re-indexing",
///     Duration::from_secs(10),
///     Arc::new(NullProgressSink),
/// )
/// .unwrap();
/// sink.report(10, Some("Issues"), None);
/// ```
pub struct RateLimitedLogSink {
    logger: Arc<dyn TaskLogger>,
    description: String,
    min_interval: Duration,
    last_logged: Mutex<Option<Instant>>,
    delegate: Arc<dyn ProgressSink>,
}

impl RateLimitedLogSink {
    /// Creates a rate-limited log sink.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `description` is empty.
    pub fn new(
        logger: Arc<dyn TaskLogger>,
        description: impl Into<String>,
        min_interval: Duration,
        delegate: Arc<dyn ProgressSink>,
    ) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::invalid_argument("description must not be empty"));
        }
        Ok(Self {
            logger,
            description,
            min_interval,
            last_logged: Mutex::new(None),
            delegate,
        })
    }

    /// Claims the right to log now, if the interval has passed.
    fn try_claim_log_slot(&self) -> bool {
        let mut last_logged = self.last_logged.lock();
        let due = match *last_logged {
            None => true,
            Some(instant) => instant.elapsed() >= self.min_interval,
        };
        if due {
            *last_logged = Some(Instant::now());
        }
        due
    }

    fn format_line(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) -> String {
        let mut line = format!("{} is {}% complete.", self.description, progress);
        if let Some(sub_task) = sub_task {
            line.push_str(&format!(" Current sub-task: {sub_task}."));
        }
        if let Some(message) = message {
            line.push(' ');
            line.push_str(message);
        }
        line
    }
}

impl ProgressSink for RateLimitedLogSink {
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        self.delegate.report(progress, sub_task, message);

        if self.try_claim_log_slot() {
            let line = self.format_line(progress, sub_task, message);
            self.logger.log(Utc::now(), &line);
        } else {
            tracing::trace!(
                logger = %self.logger.name(),
                progress = progress,
                "Skipping progress log line due to rate limiting"
            );
        }
    }
}

impl fmt::Debug for RateLimitedLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedLogSink")
            .field("logger", &self.logger.name())
            .field("description", &self.description)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
