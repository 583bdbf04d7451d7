//! Domain types for the registry's internal task representation.
//!
//! [`TaskRecord`] is the canonical, mutable entry the manager keeps per task.
//! Callers only ever receive [`TaskDescriptor`](crate::TaskDescriptor)
//! snapshots built from it.

pub mod record;

pub use record::TaskRecord;
