use crate::env::codes;
use crate::task::types::{ErrorIndicator, TaskId, TaskInfoState};

/// Errors raised while building or mutating a composite's task list.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    /// The edge would close a cycle in the precedence graph
    #[error("Sequencing error: {predecessor} -> {successor} would create a cycle")]
    Cycle {
        predecessor: TaskId,
        successor: TaskId,
    },

    /// A task referenced by an edge or a state change is not registered
    #[error("Sequencing error: task {0} is not in this task list")]
    UnknownTask(TaskId),

    /// The task has already been registered
    #[error("Task {0} is already in this task list")]
    DuplicateTask(TaskId),

    /// The task already reached a terminal state that cannot be skipped
    #[error("Task {task} cannot be skipped from state {state:?}")]
    AlreadyTerminal { task: TaskId, state: TaskInfoState },

    /// A worker is still executing the task
    #[error("Task {0} still has an active worker")]
    WorkerActive(TaskId),
}

impl SchedulerError {
    /// Whether the error is a sequencing error (fatal to the composite being built)
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            SchedulerError::Cycle { .. } | SchedulerError::UnknownTask(_)
        )
    }
}

impl From<SchedulerError> for ErrorIndicator {
    fn from(err: SchedulerError) -> Self {
        let code = if err.is_sequencing() {
            codes::SEQUENCING_ERROR
        } else {
            codes::INIT_FAILURE
        };
        ErrorIndicator::new(code, err.to_string()).with_cause(err)
    }
}

/// Result type for task list operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
