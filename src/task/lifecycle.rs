//! The [`Task`] contract and the [`TaskCore`] state cell shared by every
//! implementation in this crate.

use crate::env::codes;
use crate::task::error::SchedulerError;
use crate::task::manager::ManagerHandle;
use crate::task::types::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Shared handle to a task object
pub type TaskRef = Arc<dyn Task>;

/// Run `task.perform()` on a worker of its own.
///
/// A worker that panics never reports its terminal state, so the panic is
/// turned into an [`ErrorIndicator`] and handed to `on_panic` for the owner
/// to deliver instead.
pub fn spawn_worker<F>(task: TaskRef, on_panic: F) -> JoinHandle<()>
where
    F: FnOnce(ErrorIndicator) + Send + 'static,
{
    tokio::spawn(async move {
        let worker = task.clone();
        let joined = tokio::spawn(async move { worker.perform().await }).await;
        if let Err(join_error) = joined
            && join_error.is_panic()
        {
            error!(task = %task.name(), "Worker panicked");
            on_panic(ErrorIndicator::new(
                codes::WORKER_PANIC,
                format!("worker for '{}' panicked", task.name()),
            ));
        }
    })
}

/// A unit of schedulable work.
///
/// A parent composite calls [`init`](Task::init) synchronously, then runs
/// [`perform`](Task::perform) on a worker of its own. The task reports its
/// terminal state exactly once through the [`TaskManager`](crate::task::TaskManager)
/// it was initialised with; afterwards the parent calls [`dispose`](Task::dispose)
/// and, for retries, [`reset`](Task::reset).
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> TaskId;

    fn name(&self) -> &str;

    /// Attach the manager and build any immediate sub-structure.
    ///
    /// An `Err` means the task failed before it could run; `perform` must
    /// not be called afterwards.
    fn init(&self, manager: ManagerHandle) -> Result<(), ErrorIndicator>;

    /// Run the task body to one of done, failed or aborted.
    async fn perform(&self);

    /// Request an abort. Advisory: observed by the worker at its next check.
    fn abort(&self, reason: ErrorIndicator);

    /// Request a graceful wind-down.
    fn stop(&self);

    /// Release resources after the parent has processed the terminal signal.
    fn dispose(&self);

    /// Return the task to its pre-init state so it can run again.
    fn reset(&self) -> Result<(), SchedulerError>;

    fn state(&self) -> TaskState;

    fn error_indicator(&self) -> Option<ErrorIndicator>;

    fn run_count(&self) -> u32;

    /// Value published by the task on completion
    fn result(&self) -> Option<serde_json::Value> {
        None
    }

    /// Non-abortable tasks run to completion even when their parent aborts
    fn is_abortable(&self) -> bool {
        true
    }

    fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    fn is_failed(&self) -> bool {
        self.state() == TaskState::Failed
    }

    fn is_aborted(&self) -> bool {
        self.state() == TaskState::Aborted
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct CoreStatus {
    state: TaskState,
    error: Option<ErrorIndicator>,
    abort_reason: Option<ErrorIndicator>,
    result: Option<serde_json::Value>,
    run_count: u32,
}

/// Identity, lifecycle state and manager link of a single task.
pub struct TaskCore {
    id: TaskId,
    name: String,
    status: Mutex<CoreStatus>,
    token: Mutex<CancellationToken>,
    manager: Mutex<Option<ManagerHandle>>,
}

impl TaskCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: Mutex::new(CoreStatus {
                state: TaskState::Created,
                error: None,
                abort_reason: None,
                result: None,
                run_count: 0,
            }),
            token: Mutex::new(CancellationToken::new()),
            manager: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        lock(&self.status).state
    }

    pub fn error(&self) -> Option<ErrorIndicator> {
        lock(&self.status).error.clone()
    }

    pub fn result(&self) -> Option<serde_json::Value> {
        lock(&self.status).result.clone()
    }

    pub fn run_count(&self) -> u32 {
        lock(&self.status).run_count
    }

    /// Reason given with the first abort request, if any
    pub fn abort_reason(&self) -> Option<ErrorIndicator> {
        lock(&self.status).abort_reason.clone()
    }

    /// Token cancelled when an abort is requested
    pub fn token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }

    pub fn abort_requested(&self) -> bool {
        self.token().is_cancelled()
    }

    /// Move the lifecycle forward. Returns false for a non-monotonic transition.
    pub fn advance(&self, next: TaskState) -> bool {
        let mut status = lock(&self.status);
        if !status.state.can_advance_to(next) {
            warn!(
                task = %self.name,
                from = %status.state,
                to = %next,
                "Ignoring non-monotonic state transition"
            );
            return false;
        }
        status.state = next;
        true
    }

    /// Store the manager and move to `Initialized`
    pub fn attach(&self, manager: ManagerHandle) {
        *lock(&self.manager) = Some(manager);
        self.advance(TaskState::Initialized);
    }

    pub fn manager(&self) -> Option<ManagerHandle> {
        lock(&self.manager).clone()
    }

    /// Enter `Running` and count the run. Returns false if the task was not initialised.
    pub fn begin_run(&self) -> bool {
        let mut status = lock(&self.status);
        if status.state != TaskState::Initialized {
            warn!(task = %self.name, state = %status.state, "perform called on a task that is not initialized");
            return false;
        }
        status.state = TaskState::Running;
        status.run_count += 1;
        true
    }

    /// Record an abort request and cancel the token. Returns false if the
    /// task is already terminal.
    pub fn request_abort(&self, reason: ErrorIndicator) -> bool {
        {
            let mut status = lock(&self.status);
            if status.state.is_terminal() {
                return false;
            }
            if status.abort_reason.is_none() {
                status.abort_reason = Some(reason);
            }
        }
        self.token().cancel();
        true
    }

    /// Record an error indicator unless one is already set
    pub fn record_error(&self, error: ErrorIndicator) {
        let mut status = lock(&self.status);
        if status.error.is_none() {
            status.error = Some(error);
        }
    }

    pub fn set_result(&self, result: Option<serde_json::Value>) {
        lock(&self.status).result = result;
    }

    /// Mark done and notify the manager
    pub fn complete(&self) {
        if self.advance(TaskState::Done) {
            debug!(task = %self.name, "Task done");
            if let Some(manager) = self.manager() {
                manager.sig_task_done(self.id);
            }
        }
    }

    /// Mark failed and notify the manager with the recorded error
    pub fn fail(&self, error: ErrorIndicator) {
        self.record_error(error);
        if self.advance(TaskState::Failed) {
            let error = self.error().unwrap_or_else(|| ErrorIndicator::new(0, "failed"));
            debug!(task = %self.name, code = error.code(), "Task failed");
            if let Some(manager) = self.manager() {
                manager.sig_task_failed(self.id, error);
            }
        }
    }

    /// Mark aborted and notify the manager
    pub fn finish_aborted(&self) {
        if self.advance(TaskState::Aborted) {
            let error = self.error().or_else(|| self.abort_reason());
            debug!(task = %self.name, "Task aborted");
            if let Some(manager) = self.manager() {
                manager.sig_task_aborted(self.id, error);
            }
        }
    }

    /// Forward an informational message to the manager
    pub fn forward(&self, message: TaskMessage) {
        if let Some(manager) = self.manager() {
            manager.sig_message(self.id, message);
        }
    }

    /// Drop the manager link
    pub fn detach(&self) {
        *lock(&self.manager) = None;
    }

    /// Return to `Created`, keeping the run count
    pub fn reset(&self) {
        {
            let mut status = lock(&self.status);
            status.state = TaskState::Created;
            status.error = None;
            status.abort_reason = None;
            status.result = None;
        }
        *lock(&self.token) = CancellationToken::new();
    }
}

impl std::fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
