use crate::task::error::SchedulerError;
use crate::task::lifecycle::{Task, TaskCore};
use crate::task::manager::ManagerHandle;
use crate::task::types::*;
use async_trait::async_trait;

/// Synthetic no-op task used to fan in several predecessor edges.
pub struct BarrierTask {
    core: TaskCore,
}

impl BarrierTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: TaskCore::new(name),
        }
    }
}

#[async_trait]
impl Task for BarrierTask {
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
        if self.core.abort_requested() {
            self.core.finish_aborted();
        } else {
            self.core.complete();
        }
    }

    fn abort(&self, reason: ErrorIndicator) {
        self.core.request_abort(reason);
    }

    fn stop(&self) {}

    fn dispose(&self) {
        self.core.detach();
    }

    fn reset(&self) -> Result<(), SchedulerError> {
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
}
