use crate::sequence::{ChangeTracker, SequenceNode};
use crate::task::{ErrorIndicator, TaskRef};

/// Creates the task that carries out one executive node.
///
/// The tracker is the snapshot in force before the node runs. A task built
/// here publishes the snapshot after the node as its result.
pub trait ExecutiveFactory: Send + Sync {
    fn create(&self, node: &SequenceNode, tracker: &ChangeTracker) -> Result<TaskRef, ErrorIndicator>;
}
