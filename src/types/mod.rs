//! Value types shared across the crate.
//!
//! - [`task`] - Task ids, lifecycle states, outcomes, descriptor snapshots
//! - [`context`] - Deduplication keys
//! - [`event`] - Progress event snapshots

pub mod context;
pub mod event;
pub mod task;

pub use context::TaskContext;
pub use event::ProgressEvent;
pub use task::{TaskDescriptor, TaskId, TaskOutcome, TaskState};
