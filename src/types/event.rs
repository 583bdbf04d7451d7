//! Progress event snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::task::TaskId;

/// One progress report, frozen at the moment it was made.
///
/// Produced by [`ProgressBroadcaster`](crate::ProgressBroadcaster) on every
/// report and handed to listeners. Serializes with `camelCase` field names so
/// it can be rendered directly by a progress page.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use background_tasks::{ProgressEvent, TaskId};
///
/// let event = ProgressEvent::new(
///     TaskId::new(1),
///     Duration::from_millis(1500),
///     40,
///     Some("Indexing issues".to_string()),
///     None,
/// );
/// assert_eq!(event.progress, 40);
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["currentSubTask"], "Indexing issues");
/// assert_eq!(json["elapsedRunTimeMs"], 1500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// The reporting task.
    pub task_id: TaskId,

    /// Task run time at the moment of the report.
    #[serde(rename = "elapsedRunTimeMs", with = "duration_millis")]
    pub elapsed_run_time: Duration,

    /// Progress on the top-level indicator's scale (normally 0-100).
    pub progress: i64,

    /// Label of the sub-task currently executing.
    pub current_sub_task: Option<String>,

    /// Free-form status message.
    pub message: Option<String>,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        task_id: TaskId,
        elapsed_run_time: Duration,
        progress: i64,
        current_sub_task: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            task_id,
            elapsed_run_time,
            progress,
            current_sub_task,
            message,
            created_at: Utc::now(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_serialize_as_null() {
        let event = ProgressEvent::new(TaskId::new(3), Duration::ZERO, 0, None, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["taskId"], 3);
        assert!(json["currentSubTask"].is_null());
        assert!(json["message"].is_null());
    }

    #[test]
    fn deserializes_from_progress_page_payload() {
        let json = serde_json::json!({
            "taskId": 12,
            "elapsedRunTimeMs": 250,
            "progress": 75,
            "currentSubTask": null,
            "message": "Almost there",
            "createdAt": "2025-11-25T10:30:00Z"
        });
        let event: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.task_id, TaskId::new(12));
        assert_eq!(event.elapsed_run_time, Duration::from_millis(250));
        assert_eq!(event.message.as_deref(), Some("Almost there"));
    }
}
