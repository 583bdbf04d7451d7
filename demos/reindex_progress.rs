//! Re-indexing demo: nested progress, listeners, rate-limited logging, and
//! cancellation.
//!
//! Run with `cargo run --example reindex_progress`. Set `RUST_LOG=debug` to
//! see the manager's lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use background_tasks::executor::sleep_interruptibly;
use background_tasks::{
    work, NullProgressSink, ProgressEvent, ProgressSink, ProvidesProgress, RateLimitedLogSink,
    StatefulProgressSink, TaskError, TaskManager, TaskManagerConfig, TaskWork, TracingTaskLogger,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq)]
struct Reindex {
    project: &'static str,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let manager = TaskManager::new(
        TaskManagerConfig::default()
            .with_max_threads(2)
            .with_thread_name_prefix("reindex"),
    )?;

    let reindex = manager.submit(
        ReindexWork::default(),
        "Re-index project ALPHA",
        Reindex { project: "ALPHA" },
    )?;

    if let Some(indicator) = manager.progress_indicator(reindex.id()) {
        indicator.add_listener(Arc::new(|event: &ProgressEvent| {
            if event.progress % 25 == 0 {
                println!("listener: {}% {:?}", event.progress, event.current_sub_task);
            }
        }));
    }

    match manager.submit(work(|| Ok(())), "Re-index project ALPHA again", Reindex { project: "ALPHA" }) {
        Err(TaskError::AlreadyExecuting { existing }) => {
            let project = existing
                .context()
                .as_any()
                .downcast_ref::<Reindex>()
                .map(|context| context.project);
            println!(
                "duplicate rejected, task {} is already re-indexing {:?}",
                existing.id(),
                project
            );
        }
        other => println!("unexpected: {other:?}"),
    }

    let endless = manager.submit_cancellable(
        work(|| -> anyhow::Result<()> {
            loop {
                sleep_interruptibly(Duration::from_millis(50))?;
            }
        }),
        "Synchronize forever",
        "sync",
    )?;
    std::thread::sleep(Duration::from_millis(100));
    manager.cancel(endless.id())?;

    let done = manager.wait_for_task(reindex.id(), Duration::from_secs(10))?;
    println!("re-index result: {:?} after {:?}", done.result(), done.elapsed_run_time());

    let cancelled = manager.wait_for_task(endless.id(), Duration::from_secs(10))?;
    println!("sync outcome: {:?}", cancelled.failure());

    manager.shutdown_and_wait(Duration::from_secs(5));
    Ok(())
}

/// Re-indexes issues, then attachments, on one 0-100 scale.
#[derive(Default)]
struct ReindexWork {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProvidesProgress for ReindexWork {
    fn set_progress_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sink = Some(sink);
    }
}

impl TaskWork for ReindexWork {
    type Output = u32;

    fn run(&mut self) -> anyhow::Result<u32> {
        let indicator: Arc<dyn ProgressSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(NullProgressSink),
        };
        let logged = RateLimitedLogSink::new(
            Arc::new(TracingTaskLogger::new("reindex")),
            "Re-indexing ALPHA",
            Duration::from_millis(100),
            indicator,
        )?;
        let overall = StatefulProgressSink::new(0, 100, Arc::new(logged))?;

        // Issues take the first 80%, attachments the rest.
        let issues = overall.create_step_view(0, 80, 40)?;
        for issue in 0..=40 {
            issues.report(issue, Some("Issues"), None);
            sleep_interruptibly(Duration::from_millis(10))?;
        }
        let attachments = overall.create_step_view(80, 20, 5)?;
        for attachment in 0..=5 {
            attachments.report(attachment, Some("Attachments"), None);
            sleep_interruptibly(Duration::from_millis(10))?;
        }
        overall.report_status(None, Some("Re-index complete"));
        Ok(45)
    }

    fn progress_aware(&mut self) -> Option<&mut dyn ProvidesProgress> {
        Some(self)
    }
}
