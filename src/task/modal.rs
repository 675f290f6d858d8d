//! Modal agents: long-lived composites that run one externally supplied job
//! at a time and hand control back to an arbiter between jobs.

use crate::env::engine;
use crate::task::error::SchedulerError;
use crate::task::lifecycle::{Task, TaskRef, lock};
use crate::task::manager::ManagerHandle;
use crate::task::policy::{FailureAction, TaskPolicy};
use crate::task::scheduler::{CompositeContext, ParallelConfig, ParallelTask};
use crate::task::types::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Supplies the next job for a modal agent
pub trait JobSource: Send + Sync {
    fn next_job(&self) -> Option<TaskRef>;
}

/// Receives control back from a modal agent. Must not block.
pub trait ControlArbiter: Send + Sync {
    fn yield_control(&self, agent: &str);
}

type CurrentJob = Arc<Mutex<Option<TaskId>>>;

/// Policy that lets a finished job go and yields control instead of
/// propagating its outcome.
pub struct ModalPolicy {
    arbiter: Arc<dyn ControlArbiter>,
    current: CurrentJob,
}

impl ModalPolicy {
    fn release(&self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {
        {
            let mut current = lock(&self.current);
            if *current == Some(child.id()) {
                *current = None;
            }
        }
        if let Err(err) = ctx.remove(child.id()) {
            debug!(task = %ctx.name(), "Job already released: {}", err);
        }
        info!(task = %ctx.name(), job = %child.name(), "Job ended, yielding control");
        self.arbiter.yield_control(ctx.name());
    }
}

impl TaskPolicy for ModalPolicy {
    fn on_sub_task_done(&mut self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {
        self.release(ctx, child);
    }

    fn on_sub_task_failed(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: &ErrorIndicator,
    ) -> FailureAction {
        warn!(task = %ctx.name(), job = %child.name(), code = error.code(), "Job failed: {}", error.message());
        self.release(ctx, child);
        FailureAction::Absorb
    }

    fn on_sub_task_aborted(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        _error: Option<&ErrorIndicator>,
    ) {
        self.release(ctx, child);
    }

    fn on_reset(&mut self) {
        *lock(&self.current) = None;
    }
}

/// A top-level agent managing a single job at a time.
pub struct ModalTask {
    inner: ParallelTask<ModalPolicy>,
    source: Arc<dyn JobSource>,
    arbiter: Arc<dyn ControlArbiter>,
    current: CurrentJob,
    yield_delay: Duration,
}

impl ModalTask {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn JobSource>,
        arbiter: Arc<dyn ControlArbiter>,
    ) -> Self {
        Self::with_config(name, source, arbiter, ParallelConfig::default())
    }

    /// Build with engine settings; `exit_on_completion` is always off
    pub fn with_config(
        name: impl Into<String>,
        source: Arc<dyn JobSource>,
        arbiter: Arc<dyn ControlArbiter>,
        config: ParallelConfig,
    ) -> Self {
        let current = CurrentJob::default();
        let policy = ModalPolicy {
            arbiter: arbiter.clone(),
            current: current.clone(),
        };
        Self {
            inner: ParallelTask::new(name, policy)
                .with_config(config.with_exit_on_completion(false)),
            source,
            arbiter,
            current,
            yield_delay: engine::DEFAULT_MODAL_YIELD_DELAY,
        }
    }

    pub fn with_yield_delay(mut self, delay: Duration) -> Self {
        self.yield_delay = delay;
        self
    }

    /// Start running `task` now.
    ///
    /// Returns false for no task, or if the agent is uninitialised, winding
    /// down, finished, or already managing a job.
    pub fn manage(&self, task: Option<TaskRef>) -> bool {
        let Some(task) = task else {
            return false;
        };
        let state = self.inner.state();
        if matches!(state, TaskState::Created) || state.is_terminal() {
            debug!(task = %self.inner.name(), %state, "Cannot manage a job in this state");
            return false;
        }
        if self.inner.is_failing() || self.inner.is_aborting() {
            return false;
        }

        let mut current = lock(&self.current);
        if current.is_some() {
            warn!(task = %self.inner.name(), job = %task.name(), "Already managing a job");
            return false;
        }
        *current = Some(task.id());
        info!(task = %self.inner.name(), job = %task.name(), "Managing job");
        self.inner.add_task(task);
        true
    }

    /// Stop managing `task_id` if it is the current job
    pub fn unmanage(&self, task_id: TaskId) -> bool {
        let mut current = lock(&self.current);
        if *current != Some(task_id) {
            return false;
        }
        *current = None;
        self.inner.remove_task(task_id);
        true
    }

    /// Id of the job being managed
    pub fn current_job(&self) -> Option<TaskId> {
        *lock(&self.current)
    }

    /// Ask the job source for work. With none available, wait the yield
    /// delay and hand control to the arbiter.
    pub async fn next_job(&self) -> bool {
        if let Some(job) = self.source.next_job() {
            return self.manage(Some(job));
        }
        tokio::time::sleep(self.yield_delay).await;
        self.arbiter.yield_control(self.inner.name());
        false
    }

    pub fn engine(&self) -> &ParallelTask<ModalPolicy> {
        &self.inner
    }
}

#[async_trait]
impl Task for ModalTask {
    fn id(&self) -> TaskId {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn init(&self, manager: ManagerHandle) -> Result<(), ErrorIndicator> {
        self.inner.init(manager)
    }

    async fn perform(&self) {
        self.inner.perform().await
    }

    fn abort(&self, reason: ErrorIndicator) {
        self.inner.abort(reason)
    }

    fn stop(&self) {
        self.inner.stop()
    }

    fn dispose(&self) {
        self.inner.dispose()
    }

    fn reset(&self) -> Result<(), SchedulerError> {
        self.inner.reset()
    }

    fn state(&self) -> TaskState {
        self.inner.state()
    }

    fn error_indicator(&self) -> Option<ErrorIndicator> {
        self.inner.error_indicator()
    }

    fn run_count(&self) -> u32 {
        self.inner.run_count()
    }

    fn is_abortable(&self) -> bool {
        self.inner.is_abortable()
    }
}
