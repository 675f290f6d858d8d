use crate::env::codes;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Lifecycle state of a task as seen by the task itself.
///
/// Transitions only move forward (`Created` → `Initialized` → `Running` →
/// terminal) until [`Task::reset`](crate::task::Task::reset) returns the task
/// to `Created`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Initialized,
    Running,
    Done,
    Failed,
    Aborted,
}

impl TaskState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Aborted)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Initialized => 1,
            TaskState::Running => 2,
            TaskState::Done | TaskState::Failed | TaskState::Aborted => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Initialized => "initialized",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// State of a task as tracked by the composite that owns it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskInfoState {
    /// Registered but not yet dispatched
    Pending,
    /// Dispatched to a worker
    Running,
    /// Completed successfully
    Done,
    /// Reported failure
    Failed,
    /// Abort propagated, waiting for the child to confirm
    Aborting,
    /// Confirmed aborted
    Aborted,
    /// Deliberately passed over; unblocks dependents like `Done`
    Skipped,
    /// Never ran because its composite aborted or stopped
    Cancelled,
}

impl TaskInfoState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskInfoState::Done
                | TaskInfoState::Failed
                | TaskInfoState::Aborted
                | TaskInfoState::Skipped
                | TaskInfoState::Cancelled
        )
    }

    /// Check if a worker may still be executing the task
    pub fn is_active(&self) -> bool {
        matches!(self, TaskInfoState::Running | TaskInfoState::Aborting)
    }
}

/// Immutable error value: numeric code, human readable message and an
/// optional cause.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ErrorIndicator {
    code: i32,
    message: String,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ErrorIndicator {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the error that caused this one
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Indicator sent to children when their composite aborts
    pub fn aborted_by_parent(parent: &str) -> Self {
        Self::new(
            codes::ABORTED_BY_PARENT,
            format!("aborted by parent {}", parent),
        )
    }
}

impl PartialEq for ErrorIndicator {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl Serialize for ErrorIndicator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ErrorIndicator", 3)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("message", &self.message)?;
        s.serialize_field("cause", &self.cause.as_ref().map(|c| c.to_string()))?;
        s.end()
    }
}

/// Informational message a child forwards to its manager.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum TaskMessage {
    /// A time-constrained composite exceeded its budget
    TimeOverrun { elapsed: Duration, budget: Duration },
    /// Fractional progress in `[0, 1]`
    Progress { fraction: f64, detail: String },
    /// Free-form note for operators
    Note(String),
}

/// Final outcome of a task run as delivered to its manager.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Done { result: Option<serde_json::Value> },
    Failed { error: ErrorIndicator },
    Aborted { error: Option<ErrorIndicator> },
}

impl TaskOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskOutcome::Aborted { .. })
    }

    /// The error carried by a failed or aborted outcome
    pub fn error(&self) -> Option<&ErrorIndicator> {
        match self {
            TaskOutcome::Done { .. } => None,
            TaskOutcome::Failed { error } => Some(error),
            TaskOutcome::Aborted { error } => error.as_ref(),
        }
    }
}
