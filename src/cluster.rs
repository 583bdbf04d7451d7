//! Cross-node cancellation messages and the replicated view of remote tasks.
//!
//! Nodes never share mutable task state. A node that is asked to cancel a
//! task it only knows through a [`RemoteTaskEntry`] publishes a
//! [`ClusterMessage`] to every node through a [`ClusterMessenger`]; the node
//! that owns the task interrupts it locally on receipt (see
//! [`TaskManager::handle_cluster_message`](crate::TaskManager::handle_cluster_message)).
//! Delivery is best effort and unconfirmed.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::types::task::{TaskId, TaskState};

/// Identity of one process in a cluster.
///
/// # Examples
///
/// ```
/// use background_tasks::NodeId;
///
/// let node = NodeId::new("node-a");
/// assert_eq!(node.as_str(), "node-a");
/// assert_ne!(NodeId::random(), NodeId::random());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps an explicit node name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random UUID v4 node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of cluster message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMessageKind {
    /// Cancel the identified task on whichever node owns it.
    CancelTask,
}

/// Message exchanged between task managers on different nodes.
///
/// Task ids are only unique per process, so the message names the owning
/// node alongside the id.
///
/// # Examples
///
/// ```
/// use background_tasks::{ClusterMessage, NodeId, TaskId};
///
/// let message = ClusterMessage::cancel_task(TaskId::new(17), NodeId::new("node-b"));
/// let json = serde_json::to_value(&message).unwrap();
/// assert_eq!(json["kind"], "CANCEL_TASK");
/// assert_eq!(json["taskId"], 17);
/// assert_eq!(json["nodeId"], "node-b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMessage {
    /// What the receiver should do.
    pub kind: ClusterMessageKind,
    /// The task concerned.
    pub task_id: TaskId,
    /// The node that owns the task.
    pub node_id: NodeId,
}

impl ClusterMessage {
    /// A cancellation request for `task_id` owned by `node_id`.
    pub fn cancel_task(task_id: TaskId, node_id: NodeId) -> Self {
        Self {
            kind: ClusterMessageKind::CancelTask,
            task_id,
            node_id,
        }
    }
}

/// Where a cluster message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDestination {
    /// Every node, including the sender.
    AllNodes,
}

/// Transport for cluster messages.
///
/// Implemented by the surrounding system on top of its messaging layer.
pub trait ClusterMessenger: Send + Sync {
    /// Sends `message` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cluster`] if the message could not be handed to
    /// the transport.
    fn send(&self, destination: ClusterDestination, message: ClusterMessage) -> Result<(), TaskError>;
}

/// Messenger for a single-node deployment. Drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneMessenger;

impl ClusterMessenger for StandaloneMessenger {
    fn send(&self, destination: ClusterDestination, message: ClusterMessage) -> Result<(), TaskError> {
        tracing::debug!(
            ?destination,
            task_id = %message.task_id,
            node_id = %message.node_id,
            "Standalone node, dropping cluster message"
        );
        Ok(())
    }
}

/// Read-only view of a task owned by another node.
///
/// Produced by [`TaskDescriptor::to_remote_entry`](crate::TaskDescriptor::to_remote_entry)
/// on the owning node and replicated to the others by the surrounding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTaskEntry {
    /// Node that owns and runs the task.
    pub node_id: NodeId,
    /// Id of the task on its owning node.
    pub task_id: TaskId,
    /// Human description.
    pub description: String,
    /// Submitting user, if any.
    pub owner: Option<String>,
    /// Whether the task accepts cancellation.
    pub cancellable: bool,
    /// Lifecycle state when the entry was produced.
    pub state: TaskState,
}
