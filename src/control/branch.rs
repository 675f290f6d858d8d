use crate::control::context::ExecutionContext;
use crate::control::iterator::IteratorControl;
use crate::env::{codes, identity};
use crate::sequence::{BranchNode, ChangeTracker};
use crate::task::{CompositeContext, ErrorIndicator, ParallelTask, TaskId, TaskPolicy, TaskRef};
use std::sync::Arc;
use tracing::{debug, warn};

pub type BranchControlTask = ParallelTask<BranchControl>;

/// A binary fork: both components run concurrently, each on its own copy of
/// the incoming snapshot. The published result merges the two snapshots with
/// the first component taking precedence.
pub struct BranchControl {
    node: BranchNode,
    context: ExecutionContext,
    tracker: ChangeTracker,
    components: Vec<TaskId>,
    results: Vec<Option<ChangeTracker>>,
}

impl BranchControl {
    pub const COMPONENTS: usize = 2;

    pub fn new(node: BranchNode, tracker: ChangeTracker, context: ExecutionContext) -> Self {
        Self {
            node,
            context,
            tracker,
            components: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn task(node: BranchNode, tracker: ChangeTracker, context: ExecutionContext) -> BranchControlTask {
        let config = context.engine_for(identity::BRANCH_CONTROL, &node.name);
        let name = node.name.clone();
        ParallelTask::new(name, Self::new(node, tracker, context)).with_config(config)
    }

    fn merged(&self) -> ChangeTracker {
        let mut merged: Option<ChangeTracker> = None;
        for (index, component) in self.node.components.iter().enumerate() {
            let fork = self
                .results
                .get(index)
                .cloned()
                .flatten()
                .unwrap_or_else(|| self.tracker.after(&component.children));
            match merged.as_mut() {
                Some(primary) => primary.merge(&fork),
                None => merged = Some(fork),
            }
        }
        merged.unwrap_or_else(|| self.tracker.clone())
    }
}

impl TaskPolicy for BranchControl {
    fn pre_init(&mut self, _ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        let count = self.node.components.len();
        if count != Self::COMPONENTS {
            return Err(ErrorIndicator::new(
                codes::BRANCH_CARDINALITY,
                format!(
                    "branch '{}' has {} components, expected exactly {}",
                    self.node.name,
                    count,
                    Self::COMPONENTS
                ),
            ));
        }
        Ok(())
    }

    fn create_task_list(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        self.components.clear();
        self.results = vec![None; self.node.components.len()];
        for component in &self.node.components {
            let child: TaskRef = Arc::new(IteratorControl::task(
                component.clone(),
                self.tracker.clone(),
                self.context.clone(),
            ));
            self.components.push(ctx.add_task(child)?);
        }
        debug!(task = %ctx.name(), "Branch components created");
        Ok(())
    }

    fn on_sub_task_done(&mut self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {
        let Some(index) = self.components.iter().position(|id| *id == child.id()) else {
            return;
        };
        let Some(value) = child.result() else {
            return;
        };
        match ChangeTracker::from_value(&value) {
            Ok(tracker) => self.results[index] = Some(tracker),
            Err(err) => warn!(task = %ctx.name(), child = %child.name(), "Ignoring component result: {}", err),
        }
    }

    fn on_completion(&mut self, ctx: &mut CompositeContext<'_>) {
        match self.merged().to_value() {
            Ok(value) => ctx.set_result(value),
            Err(err) => warn!(task = %ctx.name(), "Could not publish tracker: {}", err),
        }
    }

    fn on_reset(&mut self) {
        self.components.clear();
        self.results.clear();
    }
}
