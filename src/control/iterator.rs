use crate::control::context::ExecutionContext;
use crate::control::sequence::IteratorSequence;
use crate::env::identity;
use crate::sequence::{ChangeTracker, IterationCondition, IteratorNode};
use crate::task::{
    CompositeContext, ErrorIndicator, FailureAction, ParallelTask, RetryPolicy, TaskMessage,
    TaskPolicy, TaskRef,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type IteratorControlTask = ParallelTask<IteratorControl>;

/// Repeats one generation of an iterator node while its condition holds.
///
/// Iterations run one at a time. Each starts from the snapshot the previous
/// one published, and a retried iteration does not count as completed. An
/// iteration skipped after its retries ran out still uses up one turn of the
/// condition, so the remaining iterations run.
pub struct IteratorControl {
    node: IteratorNode,
    context: ExecutionContext,
    initial: ChangeTracker,
    tracker: ChangeTracker,
    completed: u32,
    skipped: u32,
    spawned: u32,
    retry: RetryPolicy,
}

impl IteratorControl {
    pub fn new(node: IteratorNode, tracker: ChangeTracker, context: ExecutionContext) -> Self {
        let retry = context.retry_for(identity::ITERATOR_CONTROL, &node.name);
        Self {
            node,
            context,
            initial: tracker.clone(),
            tracker,
            completed: 0,
            skipped: 0,
            spawned: 0,
            retry,
        }
    }

    /// Build the composite for `node` with its configured engine settings
    pub fn task(node: IteratorNode, tracker: ChangeTracker, context: ExecutionContext) -> IteratorControlTask {
        let config = context.engine_for(identity::ITERATOR_CONTROL, &node.name);
        let name = node.name.clone();
        ParallelTask::new(name, Self::new(node, tracker, context)).with_config(config)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Iterations that ran to completion
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Iterations given up on after their retries ran out
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Iterations that have used up a turn of the condition
    fn attempted(&self) -> u32 {
        self.completed + self.skipped
    }

    /// Iteration tasks created so far
    pub fn spawned(&self) -> u32 {
        self.spawned
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    // Shared by the first iteration and every later one
    fn spawn_next(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        if ctx.is_failing() || ctx.is_aborting() || ctx.is_stopping() {
            return Ok(());
        }
        if !self.node.condition.should_continue(self.attempted(), ctx.elapsed()) {
            debug!(task = %ctx.name(), completed = self.completed, skipped = self.skipped, "Iteration condition satisfied");
            return Ok(());
        }

        let name = format!("{}#{}", self.node.name, self.spawned + 1);
        let iteration = IteratorSequence::task(
            name,
            self.node.children.clone(),
            self.tracker.clone(),
            self.context.clone(),
        );
        let iteration: TaskRef = Arc::new(iteration);
        ctx.add_task(iteration)?;
        self.spawned += 1;
        debug!(task = %ctx.name(), iteration = self.spawned, "Spawned iteration");
        Ok(())
    }

    fn progress(&self, ctx: &CompositeContext<'_>) -> f64 {
        match self.node.condition {
            IterationCondition::ForDuration(budget) if !budget.is_zero() => {
                (ctx.elapsed().as_secs_f64() / budget.as_secs_f64()).min(1.0)
            }
            _ => match self.node.condition.planned_iterations() {
                Some(0) | None => 1.0,
                Some(planned) => (self.attempted() as f64 / planned as f64).min(1.0),
            },
        }
    }
}

impl TaskPolicy for IteratorControl {
    fn create_task_list(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        self.spawn_next(ctx)
    }

    fn on_sub_task_done(&mut self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {
        if let Some(value) = child.result() {
            match ChangeTracker::from_value(&value) {
                Ok(tracker) => self.tracker = tracker,
                Err(err) => warn!(task = %ctx.name(), child = %child.name(), "Ignoring iteration result: {}", err),
            }
        }
        self.completed += 1;

        ctx.forward(TaskMessage::Progress {
            fraction: self.progress(ctx),
            detail: format!("{} iterations of {} done", self.completed, self.node.name),
        });

        if let Err(err) = self.spawn_next(ctx) {
            ctx.fail(err);
        }
    }

    fn on_sub_task_failed(
        &mut self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: &ErrorIndicator,
    ) -> FailureAction {
        let attempts = ctx.run_count(child.id());
        let action = self.retry.decide(attempts);
        info!(
            task = %ctx.name(),
            child = %child.name(),
            code = error.code(),
            attempts,
            "Iteration failed: {:?}",
            action
        );

        if matches!(action, FailureAction::Skip) {
            self.skipped += 1;
            warn!(task = %ctx.name(), child = %child.name(), code = error.code(), "Skipping iteration after {} attempts", attempts);
            ctx.forward(TaskMessage::Note(format!(
                "iteration {} of {} skipped: {}",
                child.name(),
                self.node.name,
                error
            )));
            if let Err(err) = self.spawn_next(ctx) {
                ctx.fail(err);
            }
        }
        action
    }

    fn on_completion(&mut self, ctx: &mut CompositeContext<'_>) {
        match self.tracker.to_value() {
            Ok(value) => ctx.set_result(value),
            Err(err) => warn!(task = %ctx.name(), "Could not publish tracker: {}", err),
        }
    }

    fn on_reset(&mut self) {
        self.tracker = self.initial.clone();
        self.completed = 0;
        self.skipped = 0;
        self.spawned = 0;
    }
}
