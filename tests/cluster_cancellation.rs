//! Integration tests for cross-node cancellation.
//!
//! Two managers stand in for two cluster nodes. An in-memory bus delivers
//! every broadcast to all registered nodes, the way the surrounding
//! messaging layer would.

mod common;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use background_tasks::executor::sleep_interruptibly;
use background_tasks::{
    work, ClusterDestination, ClusterMessage, ClusterMessageKind, ClusterMessenger, NodeId,
    TaskError, TaskFailure, TaskId, TaskManager, TaskManagerConfig, TaskState,
};

use common::eventually;

const WAIT: Duration = Duration::from_secs(5);

/// Delivers every message to every node and keeps a log of what was sent.
#[derive(Default)]
struct InMemoryBus {
    nodes: Mutex<Vec<Weak<TaskManager>>>,
    sent: Mutex<Vec<ClusterMessage>>,
}

impl InMemoryBus {
    fn join(&self, node: &Arc<TaskManager>) {
        self.nodes.lock().push(Arc::downgrade(node));
    }

    fn sent(&self) -> Vec<ClusterMessage> {
        self.sent.lock().clone()
    }
}

impl ClusterMessenger for InMemoryBus {
    fn send(&self, destination: ClusterDestination, message: ClusterMessage) -> Result<(), TaskError> {
        assert_eq!(destination, ClusterDestination::AllNodes);
        self.sent.lock().push(message.clone());
        let nodes: Vec<Arc<TaskManager>> =
            self.nodes.lock().iter().filter_map(Weak::upgrade).collect();
        for node in nodes {
            node.handle_cluster_message(&message);
        }
        Ok(())
    }
}

/// Messenger whose transport is down.
struct BrokenBus;

impl ClusterMessenger for BrokenBus {
    fn send(&self, _destination: ClusterDestination, _message: ClusterMessage) -> Result<(), TaskError> {
        Err(TaskError::Cluster("transport unavailable".to_string()))
    }
}

fn node(name: &str, bus: &Arc<InMemoryBus>) -> Arc<TaskManager> {
    let manager = Arc::new(
        TaskManager::new(
            TaskManagerConfig::default()
                .with_max_threads(2)
                .with_node_id(NodeId::new(name)),
        )
        .unwrap()
        .with_messenger(bus.clone()),
    );
    bus.join(&manager);
    manager
}

fn endless() -> impl background_tasks::TaskWork {
    work(|| -> anyhow::Result<()> {
        loop {
            sleep_interruptibly(Duration::from_millis(20))?;
        }
    })
}

mod remote_cancel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cancel_of_remote_task_interrupts_on_owner() {
        let bus = Arc::new(InMemoryBus::default());
        let owner = node("node-a", &bus);
        let observer = node("node-b", &bus);

        let task = owner
            .submit_cancellable(endless(), "Sync directory", "ldap")
            .unwrap();
        assert!(eventually(WAIT, || owner.get(task.id()).unwrap().is_started()));

        observer.register_remote_task(owner.get(task.id()).unwrap().to_remote_entry());
        assert!(observer.get(task.id()).is_none());
        assert_eq!(observer.remote_tasks().len(), 1);
        assert_eq!(observer.remote_tasks()[0].state, TaskState::Started);

        observer.cancel(task.id()).unwrap();

        assert_eq!(
            bus.sent(),
            vec![ClusterMessage::cancel_task(task.id(), NodeId::new("node-a"))]
        );
        let done = owner.wait_for_task(task.id(), WAIT).unwrap();
        assert_eq!(done.failure(), Some(&TaskFailure::Interrupted));
        assert!(done.is_cancel_requested());
    }

    #[test]
    fn test_local_cancel_does_not_broadcast() {
        let bus = Arc::new(InMemoryBus::default());
        let owner = node("node-a", &bus);
        let task = owner.submit_cancellable(endless(), "Local", "local").unwrap();
        owner.cancel(task.id()).unwrap();
        assert!(bus.sent().is_empty());
        let done = owner.wait_for_task(task.id(), WAIT).unwrap();
        assert_eq!(done.failure(), Some(&TaskFailure::Interrupted));
    }

    #[test]
    fn test_non_owner_ignores_message_for_same_id() {
        let bus = Arc::new(InMemoryBus::default());
        let a = node("node-a", &bus);
        let b = node("node-b", &bus);

        // Both nodes allocate task id 1 independently.
        let on_a = a.submit_cancellable(endless(), "A's task", "a").unwrap();
        let on_b = b.submit_cancellable(endless(), "B's task", "b").unwrap();
        assert_eq!(on_a.id(), on_b.id());

        let message = ClusterMessage::cancel_task(on_a.id(), NodeId::new("node-a"));
        assert!(a.handle_cluster_message(&message));
        assert!(!b.handle_cluster_message(&message));

        let done = a.wait_for_task(on_a.id(), WAIT).unwrap();
        assert_eq!(done.failure(), Some(&TaskFailure::Interrupted));
        assert!(!b.get(on_b.id()).unwrap().is_cancel_requested());

        b.cancel(on_b.id()).unwrap();
        b.wait_for_task(on_b.id(), WAIT).unwrap();
    }

    #[test]
    fn test_message_kind_serializes_for_transport() {
        let message = ClusterMessage::cancel_task(TaskId::new(3), NodeId::new("node-a"));
        assert_eq!(message.kind, ClusterMessageKind::CancelTask);
        let wire = serde_json::to_string(&message).unwrap();
        let back: ClusterMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, message);
    }
}

mod remote_registry_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn remote_entry(node: &str, id: u64, cancellable: bool) -> background_tasks::RemoteTaskEntry {
        background_tasks::RemoteTaskEntry {
            node_id: NodeId::new(node),
            task_id: TaskId::new(id),
            description: format!("remote {id}"),
            owner: Some("admin".to_string()),
            cancellable,
            state: TaskState::Started,
        }
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let bus = Arc::new(InMemoryBus::default());
        let local = node("node-a", &bus);
        let err = local.cancel(TaskId::new(12)).unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_non_cancellable_remote_task_refuses() {
        let bus = Arc::new(InMemoryBus::default());
        let local = node("node-a", &bus);
        local.register_remote_task(remote_entry("node-z", 5, false));
        let err = local.cancel(TaskId::new(5)).unwrap_err();
        assert!(matches!(err, TaskError::NotCancellable { .. }));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_remote_entries_can_be_replaced_and_removed() {
        let bus = Arc::new(InMemoryBus::default());
        let local = node("node-a", &bus);
        local.register_remote_task(remote_entry("node-y", 1, true));
        local.register_remote_task(remote_entry("node-z", 1, true));
        let mut updated = remote_entry("node-z", 1, true);
        updated.state = TaskState::Finished;
        local.register_remote_task(updated.clone());

        let entries = local.remote_tasks();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], updated);

        local.cancel(TaskId::new(1)).unwrap();
        let owners: Vec<NodeId> = bus.sent().into_iter().map(|m| m.node_id).collect();
        assert_eq!(owners.len(), 2);
        assert!(owners.contains(&NodeId::new("node-y")));
        assert!(owners.contains(&NodeId::new("node-z")));

        assert_eq!(
            local.remove_remote_task(&NodeId::new("node-y"), TaskId::new(1)),
            Some(remote_entry("node-y", 1, true))
        );
        assert_eq!(local.remote_tasks(), vec![updated]);
    }

    #[test]
    fn test_transport_failure_surfaces() {
        let local = TaskManager::new(
            TaskManagerConfig::default().with_node_id(NodeId::new("node-a")),
        )
        .unwrap()
        .with_messenger(Arc::new(BrokenBus));
        local.register_remote_task(remote_entry("node-b", 2, true));
        let err = local.cancel(TaskId::new(2)).unwrap_err();
        assert!(matches!(err, TaskError::Cluster(_)));
    }
}
