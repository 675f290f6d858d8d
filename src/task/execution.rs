use crate::env::codes;
use crate::task::error::SchedulerError;
use crate::task::lifecycle::{Task, TaskCore};
use crate::task::manager::ManagerHandle;
use crate::task::types::*;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a leaf operation: an optional published value, or an error
pub type OperationResult = Result<Option<serde_json::Value>, ErrorIndicator>;

/// The body of a leaf task.
///
/// Implementations block only on their own worker and should return
/// promptly once `cancel` fires.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn execute(&self, cancel: CancellationToken) -> OperationResult;
}

/// Function-backed [`Operation`]
pub struct OperationFn<F> {
    f: F,
}

impl<F> OperationFn<F>
where
    F: Fn(CancellationToken) -> BoxFuture<'static, OperationResult> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Operation for OperationFn<F>
where
    F: Fn(CancellationToken) -> BoxFuture<'static, OperationResult> + Send + Sync,
{
    async fn execute(&self, cancel: CancellationToken) -> OperationResult {
        (self.f)(cancel).await
    }
}

/// A task that runs a single [`Operation`] and reports its outcome.
pub struct LeafTask {
    core: TaskCore,
    operation: Arc<dyn Operation>,
    abortable: bool,
}

impl LeafTask {
    pub fn new(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            core: TaskCore::new(name),
            operation,
            abortable: true,
        }
    }

    /// Build a leaf task from a closure producing the operation future
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, OperationResult> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(OperationFn::new(f)))
    }

    /// Mark the task as one that must run to completion once started
    pub fn non_abortable(mut self) -> Self {
        self.abortable = false;
        self
    }

    pub fn core(&self) -> &TaskCore {
        &self.core
    }
}

#[async_trait]
impl Task for LeafTask {
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn init(&self, manager: ManagerHandle) -> Result<(), ErrorIndicator> {
        self.core.attach(manager);
        Ok(())
    }

    async fn perform(&self) {
        if !self.core.begin_run() {
            return;
        }
        let token = self.core.token();
        if token.is_cancelled() {
            self.core.finish_aborted();
            return;
        }

        debug!(task = %self.core.name(), run = self.core.run_count(), "Leaf task started");
        let outcome = if self.abortable {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.operation.execute(token.clone()) => Some(result),
            }
        } else {
            Some(self.operation.execute(CancellationToken::new()).await)
        };

        match outcome {
            None => self.core.finish_aborted(),
            Some(Ok(result)) => {
                self.core.set_result(result);
                self.core.complete();
            }
            Some(Err(_)) if self.abortable && token.is_cancelled() => self.core.finish_aborted(),
            Some(Err(error)) => self.core.fail(error),
        }
    }

    fn abort(&self, reason: ErrorIndicator) {
        if !self.abortable {
            info!(task = %self.core.name(), "Ignoring abort for non-abortable task");
            return;
        }
        self.core.request_abort(reason);
    }

    fn stop(&self) {
        self.abort(ErrorIndicator::new(codes::STOPPED, "stop requested"));
    }

    fn dispose(&self) {
        self.core.detach();
    }

    fn reset(&self) -> Result<(), SchedulerError> {
        if self.core.state() == TaskState::Running {
            return Err(SchedulerError::WorkerActive(self.core.id()));
        }
        self.core.reset();
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn error_indicator(&self) -> Option<ErrorIndicator> {
        self.core.error()
    }

    fn run_count(&self) -> u32 {
        self.core.run_count()
    }

    fn result(&self) -> Option<serde_json::Value> {
        self.core.result()
    }

    fn is_abortable(&self) -> bool {
        self.abortable
    }
}
