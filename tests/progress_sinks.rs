//! Integration tests for composed progress sink chains.
//!
//! Chains are built the way a long operation would build them: a stateful
//! top-level scale, step views and percentage partitions for nested work,
//! scaling adapters for sub-operations that report 0-100, and a broadcaster
//! at the end fanning events out to listeners.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use background_tasks::progress::partition_bounds;
use background_tasks::{
    ProgressBroadcaster, ProgressEvent, ProgressListener, ProgressSink, RateLimitedLogSink,
    ScalingProgressSink, StatefulProgressSink, StepProgressSink, TaskId, TaskLogger,
    TracingTaskLogger,
};

use common::RecordingSink;

mod scaling_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concrete_scenario_zero_to_ten() {
        let recorder = RecordingSink::new();
        let sink = ScalingProgressSink::new(0, 10, recorder.clone()).unwrap();
        for input in [0, 50, 100, -1, 20_000] {
            sink.report(input, None, None);
        }
        assert_eq!(recorder.values(), vec![0, 5, 10, 0, 10]);
    }

    #[test]
    fn test_nested_scaling_composes() {
        let recorder = RecordingSink::new();
        // Second half of the task, and within it the last quarter.
        let half = Arc::new(ScalingProgressSink::new(50, 100, recorder.clone()).unwrap());
        let quarter = ScalingProgressSink::new(75, 100, half).unwrap();
        quarter.report(0, None, None);
        quarter.report(100, None, None);
        assert_eq!(recorder.values(), vec![87, 100]);
    }

    #[test]
    fn test_invalid_construction_fails_immediately() {
        let recorder: Arc<dyn ProgressSink> = RecordingSink::new();
        assert!(ScalingProgressSink::new(10, 9, recorder.clone()).is_err());
        assert!(ScalingProgressSink::with_virtual_range(0, 10, 5, 4, recorder.clone()).is_err());
        assert!(StepProgressSink::new(0, 10, -1, recorder.clone()).is_err());
        assert!(StepProgressSink::new(10, 0, 1, recorder.clone()).is_err());
        assert!(StatefulProgressSink::new(1, 0, recorder).is_err());
    }
}

mod stateful_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_step_views_drive_parent_absolute_value() {
        let broadcaster = Arc::new(ProgressBroadcaster::new(TaskId::new(1), 20));
        let overall = StatefulProgressSink::new(0, 100, broadcaster.clone()).unwrap();

        let load = overall.create_step_view(0, 50, 5).unwrap();
        for step in 0..=5 {
            load.report(step, Some("Loading"), None);
        }
        assert_eq!(overall.current(), 50);

        let save = overall.create_step_view(50, 50, 2).unwrap();
        save.report(1, Some("Saving"), None);
        assert_eq!(overall.current(), 75);

        let last = broadcaster.last_event().unwrap();
        assert_eq!(last.progress, 75);
        assert_eq!(last.current_sub_task.as_deref(), Some("Saving"));
    }

    #[test]
    fn test_percentage_partition_children_report_into_parent() {
        let recorder = RecordingSink::new();
        let overall = StatefulProgressSink::new(0, 100, recorder.clone()).unwrap();
        let phases = overall.create_percentage_sinks_for_range(0, 100, 4).unwrap();
        assert_eq!(phases.len(), 4);

        for (index, phase) in phases.iter().enumerate() {
            phase.report(100, Some(format!("phase {index}").as_str()), None);
        }
        assert_eq!(recorder.values(), vec![25, 50, 75, 100]);
        assert_eq!(overall.current(), 100);
    }

    #[test]
    fn test_percentage_partition_maps_percentages_onto_slices() {
        let recorder = RecordingSink::new();
        let overall = StatefulProgressSink::new(0, 1000, recorder.clone()).unwrap();
        let halves = overall.create_percentage_sinks_for_range(0, 1000, 2).unwrap();

        for percent in [0, 50, 100] {
            halves[0].report(percent, Some("Export"), None);
        }
        halves[1].report(0, Some("Upload"), None);
        halves[1].report(100, Some("Upload"), None);

        assert_eq!(recorder.values(), vec![0, 250, 500, 500, 1000]);
        assert_eq!(halves[0].current(), 100);
    }

    #[test]
    fn test_percentage_partition_of_inner_range() {
        let recorder = RecordingSink::new();
        let overall = StatefulProgressSink::new(0, 100, recorder.clone()).unwrap();
        assert_eq!(
            partition_bounds(20, 80, 3).unwrap(),
            vec![(20, 40), (40, 60), (60, 80)]
        );
        let parts = overall.create_percentage_sinks_for_range(20, 80, 3).unwrap();
        parts[2].report(50, None, None);
        assert_eq!(overall.current(), 70);
        parts[0].report(-5, None, None);
        assert_eq!(overall.current(), 20);
    }

    #[test]
    fn test_report_status_only_changes_labels() {
        let recorder = RecordingSink::new();
        let overall = StatefulProgressSink::new(0, 10, recorder.clone()).unwrap();
        overall.advance(3, Some("first"), None);
        overall.report_status(Some("second"), Some("waiting on lock"));
        assert_eq!(recorder.values(), vec![3, 3]);
        assert_eq!(
            recorder.labels(),
            vec![Some("first".to_string()), Some("second".to_string())]
        );
    }
}

mod broadcaster_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_listeners_see_every_event_in_order() {
        let broadcaster = Arc::new(ProgressBroadcaster::new(TaskId::new(7), 3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        broadcaster.add_listener(Arc::new(move |event: &ProgressEvent| {
            sink.lock().push(event.progress);
        }));

        let steps = StepProgressSink::new(0, 100, 4, broadcaster.clone()).unwrap();
        for step in 0..=4 {
            steps.report(step, None, None);
        }

        assert_eq!(*seen.lock(), vec![0, 25, 50, 75, 100]);
        let retained: Vec<i64> = broadcaster.last_events().iter().map(|e| e.progress).collect();
        assert_eq!(retained, vec![50, 75, 100]);
        assert!(broadcaster
            .last_events()
            .iter()
            .all(|event| event.task_id == TaskId::new(7)));
    }

    #[test]
    fn test_standalone_broadcaster_reports_zero_elapsed() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 1);
        broadcaster.report(5, None, Some("hello"));
        let event = broadcaster.last_event().unwrap();
        assert_eq!(event.elapsed_run_time, Duration::ZERO);
        assert_eq!(event.message.as_deref(), Some("hello"));
    }

    #[test]
    fn test_removed_listener_stops_receiving() {
        let broadcaster = ProgressBroadcaster::new(TaskId::new(1), 1);
        let seen = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&seen);
        let listener: Arc<dyn ProgressListener> = Arc::new(move |_: &ProgressEvent| {
            *counter.lock() += 1;
        });
        broadcaster.add_listener(Arc::clone(&listener));
        broadcaster.report(1, None, None);
        assert!(broadcaster.remove_listener(&listener));
        broadcaster.report(2, None, None);
        assert_eq!(*seen.lock(), 1);
    }
}

mod log_tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl TaskLogger for Lines {
        fn name(&self) -> &str {
            "lines"
        }

        fn log(&self, _timestamp: DateTime<Utc>, line: &str) {
            self.0.lock().push(line.to_string());
        }
    }

    #[test]
    fn test_log_sink_in_middle_of_chain() {
        let lines = Arc::new(Lines::default());
        let recorder = RecordingSink::new();
        let logged = Arc::new(
            RateLimitedLogSink::new(lines.clone(), "Backup", Duration::from_secs(3600), recorder.clone())
                .unwrap(),
        );
        let scaled = ScalingProgressSink::new(0, 50, logged).unwrap();

        scaled.report(0, Some("Attachments"), None);
        scaled.report(100, Some("Attachments"), Some("copied 12 files"));

        assert_eq!(recorder.values(), vec![0, 50]);
        assert_eq!(
            *lines.0.lock(),
            vec!["Backup is 0% complete. Current sub-task: Attachments.".to_string()]
        );
    }

    #[test]
    fn test_tracing_logger_has_name() {
        let logger = TracingTaskLogger::new("reindex");
        assert_eq!(logger.name(), "reindex");
        logger.log(Utc::now(), "no subscriber installed, still fine");
    }
}
