//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use background_tasks::ProgressSink;

/// Sink that records every report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(i64, Option<String>, Option<String>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn values(&self) -> Vec<i64> {
        self.reports.lock().iter().map(|(value, _, _)| *value).collect()
    }

    pub fn last_value(&self) -> Option<i64> {
        self.reports.lock().last().map(|(value, _, _)| *value)
    }

    pub fn labels(&self) -> Vec<Option<String>> {
        self.reports.lock().iter().map(|(_, label, _)| label.clone()).collect()
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

/// One-shot gate a test opens to let blocked work continue.
#[derive(Debug, Default, Clone)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, signal) = &*self.inner;
        *open.lock() = true;
        signal.notify_all();
    }

    /// Waits for the latch to open. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (open, signal) = &*self.inner;
        let mut guard = open.lock();
        if !*guard {
            signal.wait_while_for(&mut guard, |open| !*open, timeout);
        }
        *guard
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
