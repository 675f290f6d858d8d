//! Domain hooks plugged into the [`ParallelTask`](crate::task::ParallelTask) engine.
//!
//! A composite is one engine parameterised by a [`TaskPolicy`]. The engine
//! owns the worker loop and the task list; the policy only decides what the
//! list contains and what happens when a child finishes.

use crate::task::lifecycle::TaskRef;
use crate::task::retry::RetryPolicy;
use crate::task::scheduler::CompositeContext;
use crate::task::types::*;
use std::time::Duration;
use tracing::{debug, warn};

/// Decision taken when a child reports failure.
#[derive(Clone)]
pub enum FailureAction {
    /// Fail the composite with the child's exact code and message
    FailUpward,
    /// Fail the composite with a deliberately different error
    Reclassify(ErrorIndicator),
    /// Treat the child as optional: mark it skipped and release dependents
    Skip,
    /// Reset the child and run it again after `delay`
    Retry { delay: Duration },
    /// Run a recovery task in the child's place
    Substitute(TaskRef),
    /// Keep the child failed and carry on; dependents stay blocked
    Absorb,
}

impl std::fmt::Debug for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureAction::FailUpward => write!(f, "FailUpward"),
            FailureAction::Reclassify(err) => write!(f, "Reclassify({})", err),
            FailureAction::Skip => write!(f, "Skip"),
            FailureAction::Retry { delay } => write!(f, "Retry({:?})", delay),
            FailureAction::Substitute(task) => write!(f, "Substitute({})", task.name()),
            FailureAction::Absorb => write!(f, "Absorb"),
        }
    }
}

/// Hooks a composite implements to give the engine its business logic.
///
/// Every hook runs on the composite's own worker with exclusive access to
/// its task list through the [`CompositeContext`].
#[allow(unused_variables)]
pub trait TaskPolicy: Send + 'static {
    /// Validate preconditions before any child exists. An error fails `init`.
    fn pre_init(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        Ok(())
    }

    /// Register the initial children and their edges.
    fn create_task_list(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        Ok(())
    }

    fn on_init(&mut self, ctx: &mut CompositeContext<'_>) {}

    fn on_sub_task_done(&mut self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {}

    /// Decide what to do with a failed child. Defaults to failing upward.
    fn on_sub_task_failed(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: &ErrorIndicator,
    ) -> FailureAction {
        FailureAction::FailUpward
    }

    fn on_sub_task_aborted(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: Option<&ErrorIndicator>,
    ) {
    }

    fn on_sub_task_message(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        message: &TaskMessage,
    ) {
        debug!(task = %ctx.name(), child = %child.name(), "Child message: {:?}", message);
    }

    /// Called once when the abort has been propagated to the children.
    /// Cleanup tasks added here still run.
    fn on_aborting(&mut self, ctx: &mut CompositeContext<'_>) {}

    fn on_completion(&mut self, ctx: &mut CompositeContext<'_>) {}

    fn on_failure(&mut self, ctx: &mut CompositeContext<'_>) {}

    /// Called once when a time-constrained composite passes its budget.
    fn on_time_overrun(&mut self, ctx: &mut CompositeContext<'_>, elapsed: Duration) {}

    /// Return policy state to its initial values before a re-run
    fn on_reset(&mut self) {}
}

/// How a [`GroupPolicy`] treats failed children
#[derive(Clone, Debug, Default)]
pub enum GroupFailureMode {
    #[default]
    FailUpward,
    /// Skip failed children so their dependents still run
    Skip,
    /// Retry per policy; fail upward or skip once exhausted
    Retry(RetryPolicy),
}

/// Policy for a plain group executor: a fixed set of tasks and edges.
#[derive(Default)]
pub struct GroupPolicy {
    tasks: Vec<TaskRef>,
    edges: Vec<(TaskId, TaskId)>,
    failure_mode: GroupFailureMode,
}

impl GroupPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: TaskRef) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = TaskRef>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// `successor` runs after `predecessor`
    pub fn with_edge(mut self, predecessor: TaskId, successor: TaskId) -> Self {
        self.edges.push((predecessor, successor));
        self
    }

    pub fn with_failure_mode(mut self, mode: GroupFailureMode) -> Self {
        self.failure_mode = mode;
        self
    }
}

impl TaskPolicy for GroupPolicy {
    fn create_task_list(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        for task in &self.tasks {
            ctx.add_task(task.clone())?;
        }
        for &(predecessor, successor) in &self.edges {
            ctx.sequence(predecessor, successor)?;
        }
        Ok(())
    }

    fn on_sub_task_failed(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        _error: &ErrorIndicator,
    ) -> FailureAction {
        match &self.failure_mode {
            GroupFailureMode::FailUpward => FailureAction::FailUpward,
            GroupFailureMode::Skip => FailureAction::Skip,
            GroupFailureMode::Retry(retry) => retry.decide(ctx.run_count(child.id())),
        }
    }

    fn on_reset(&mut self) {
        for task in &self.tasks {
            if let Err(err) = task.reset() {
                warn!(task = %task.name(), "Could not reset group member: {}", err);
            }
        }
    }
}
