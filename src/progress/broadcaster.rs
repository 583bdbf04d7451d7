//! Fan-out of progress reports to listeners.
//!
//! [`ProgressBroadcaster`] sits at the end of a sink chain. Each report
//! becomes an immutable [`ProgressEvent`], is remembered in a bounded
//! history, and is handed synchronously to every registered
//! [`ProgressListener`] on the reporting thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::domain::record::TaskLifecycle;
use crate::types::event::ProgressEvent;
use crate::types::task::TaskId;

use super::ProgressSink;

/// Receives progress events.
///
/// Listeners run on the task's own thread, in registration order. A slow
/// listener delays the task; a panicking listener unwinds into it.
pub trait ProgressListener: Send + Sync {
    /// Called once per report.
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Turns sink reports into [`ProgressEvent`]s and fans them out.
///
/// The same listener may be registered more than once and is then called
/// once per registration.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use background_tasks::{ProgressBroadcaster, ProgressEvent, ProgressListener, ProgressSink, TaskId};
///
/// let broadcaster = ProgressBroadcaster::new(TaskId::new(5), 3);
/// assert!(broadcaster.last_event().is_none());
///
/// let seen = Arc::new(AtomicI64::new(-1));
/// let seen_by_listener = seen.clone();
/// broadcaster.add_listener(Arc::new(move |event: &ProgressEvent| {
///     seen_by_listener.store(event.progress, Ordering::SeqCst);
/// }));
///
/// broadcaster.report(60, Some("Indexing"), None);
/// assert_eq!(seen.load(Ordering::SeqCst), 60);
/// assert_eq!(broadcaster.last_event().unwrap().current_sub_task.as_deref(), Some("Indexing"));
/// ```
pub struct ProgressBroadcaster {
    task_id: TaskId,
    history: usize,
    lifecycle: Option<Arc<Mutex<TaskLifecycle>>>,
    listeners: Mutex<Vec<Arc<dyn ProgressListener>>>,
    events: Mutex<VecDeque<ProgressEvent>>,
}

impl ProgressBroadcaster {
    /// Creates a standalone broadcaster retaining the last `history` events
    /// (at least one). Events carry a zero elapsed run time.
    pub fn new(task_id: TaskId, history: usize) -> Self {
        Self {
            task_id,
            history: history.max(1),
            lifecycle: None,
            listeners: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a broadcaster that stamps events with the run time of a task.
    pub(crate) fn for_lifecycle(
        task_id: TaskId,
        history: usize,
        lifecycle: Arc<Mutex<TaskLifecycle>>,
    ) -> Self {
        Self {
            lifecycle: Some(lifecycle),
            ..Self::new(task_id, history)
        }
    }

    /// The task this broadcaster reports for.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Registers a listener. It is called after listeners registered earlier.
    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.listeners.lock().push(listener);
    }

    /// Removes one registration of `listener`. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Arc<dyn ProgressListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let position = listeners
            .iter()
            .position(|registered| std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(listener)));
        match position {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// The most recent event, or `None` before the first report.
    pub fn last_event(&self) -> Option<ProgressEvent> {
        self.events.lock().back().cloned()
    }

    /// Retained events, oldest first. Empty before the first report.
    pub fn last_events(&self) -> Vec<ProgressEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn elapsed_run_time(&self) -> Duration {
        self.lifecycle
            .as_ref()
            .map_or(Duration::ZERO, |lifecycle| lifecycle.lock().elapsed_run_time())
    }
}

impl ProgressSink for ProgressBroadcaster {
    fn report(&self, progress: i64, sub_task: Option<&str>, message: Option<&str>) {
        let event = ProgressEvent::new(
            self.task_id,
            self.elapsed_run_time(),
            progress,
            sub_task.map(str::to_string),
            message.map(str::to_string),
        );

        {
            let mut events = self.events.lock();
            if events.len() == self.history {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        // Listeners may register further listeners; never call them under the lock.
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener.on_progress(&event);
        }
    }
}

impl fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("task_id", &self.task_id)
            .field("listeners", &self.listener_count())
            .field("last_event", &self.last_event())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<(usize, i64)>>,
    }

    fn tagged(collector: &Arc<Collector>, tag: usize) -> Arc<dyn ProgressListener> {
        let collector = Arc::clone(collector);
        Arc::new(move |event: &ProgressEvent| {
            collector.seen.lock().push((tag, event.progress));
        })
    }

    #[test]
    fn empty_before_first_report() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 5);
        assert!(broadcaster.last_event().is_none());
        assert!(broadcaster.last_events().is_empty());
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 5);
        let collector = Arc::new(Collector::default());
        broadcaster.add_listener(tagged(&collector, 1));
        broadcaster.add_listener(tagged(&collector, 2));

        broadcaster.report(10, None, None);
        broadcaster.report(20, None, None);

        assert_eq!(
            *collector.seen.lock(),
            vec![(1, 10), (2, 10), (1, 20), (2, 20)]
        );
    }

    #[test]
    fn duplicate_registration_fires_twice() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 5);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener: Arc<dyn ProgressListener> = Arc::new(move |_: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        broadcaster.add_listener(listener.clone());
        broadcaster.add_listener(listener.clone());

        broadcaster.report(1, None, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(broadcaster.remove_listener(&listener));
        broadcaster.report(2, None, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(broadcaster.listener_count(), 1);
    }

    #[test]
    fn remove_unknown_listener_is_false() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 5);
        let listener: Arc<dyn ProgressListener> = Arc::new(|_: &ProgressEvent| {});
        assert!(!broadcaster.remove_listener(&listener));
    }

    #[test]
    fn history_is_bounded() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 3);
        for value in 1..=5 {
            broadcaster.report(value, None, None);
        }
        let kept: Vec<i64> = broadcaster.last_events().iter().map(|e| e.progress).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(broadcaster.last_event().unwrap().progress, 5);
    }

    #[test]
    fn zero_history_keeps_latest() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 0);
        broadcaster.report(1, None, None);
        broadcaster.report(2, Some("b"), Some("m"));
        let events = broadcaster.last_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.as_deref(), Some("m"));
    }

    #[test]
    fn listener_may_register_listener() {
        let broadcaster = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 5));
        let inner = Arc::clone(&broadcaster);
        broadcaster.add_listener(Arc::new(move |_: &ProgressEvent| {
            if inner.listener_count() < 2 {
                inner.add_listener(Arc::new(|_: &ProgressEvent| {}));
            }
        }));
        broadcaster.report(1, None, None);
        assert_eq!(broadcaster.listener_count(), 2);
    }
}
