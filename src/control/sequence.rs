use crate::control::branch::BranchControl;
use crate::control::context::ExecutionContext;
use crate::control::iterator::IteratorControl;
use crate::control::registry::InstrumentStatus;
use crate::env::{codes, identity};
use crate::sequence::{ChangeTracker, SequenceNode};
use crate::task::{CompositeContext, ErrorIndicator, ParallelTask, TaskId, TaskPolicy, TaskRef};
use std::sync::Arc;
use tracing::{debug, warn};

pub type IteratorSequenceTask = ParallelTask<IteratorSequence>;

/// Runs one generation of sequence nodes strictly in document order.
///
/// Every node becomes exactly one child and consecutive children are chained,
/// so nothing inside a generation runs concurrently. Preconditions for the
/// whole generation are checked before the first child is created.
pub struct IteratorSequence {
    nodes: Vec<SequenceNode>,
    context: ExecutionContext,
    tracker: ChangeTracker,
    latest: ChangeTracker,
    children: Vec<TaskId>,
}

impl IteratorSequence {
    pub fn new(nodes: Vec<SequenceNode>, tracker: ChangeTracker, context: ExecutionContext) -> Self {
        Self {
            nodes,
            context,
            latest: tracker.clone(),
            tracker,
            children: Vec::new(),
        }
    }

    pub fn task(
        name: impl Into<String>,
        nodes: Vec<SequenceNode>,
        tracker: ChangeTracker,
        context: ExecutionContext,
    ) -> IteratorSequenceTask {
        let name = name.into();
        let config = context.engine_for(identity::ITERATOR_SEQUENCE, &name);
        ParallelTask::new(name, Self::new(nodes, tracker, context)).with_config(config)
    }

    fn check_instrument(&self, instrument: &str, node: &SequenceNode) -> Result<(), ErrorIndicator> {
        let registry = &self.context.instruments;
        let Some(descriptor) = registry.descriptor(instrument) else {
            return Err(ErrorIndicator::new(
                codes::UNKNOWN_INSTRUMENT,
                format!("unknown instrument '{}' in {}", instrument, node.label()),
            ));
        };
        if registry.status(instrument) == Some(InstrumentStatus::Offline) {
            return Err(ErrorIndicator::new(
                codes::INSTRUMENT_OFFLINE,
                format!("instrument '{}' is offline", instrument),
            ));
        }

        let capability = descriptor.capability;
        let capable = match node {
            SequenceNode::Config(_) => capability.can_configure,
            SequenceNode::Expose(_) => capability.can_expose,
            SequenceNode::Calibration(_) => capability.can_calibrate,
            SequenceNode::Acquisition(_) => capability.can_acquire,
            _ => true,
        };
        if !capable {
            return Err(ErrorIndicator::new(
                codes::INSTRUMENT_INCAPABLE,
                format!("instrument '{}' cannot perform {}", instrument, node.kind()),
            ));
        }
        Ok(())
    }

    fn require_target(tracker: &ChangeTracker, node: &SequenceNode) -> Result<(), ErrorIndicator> {
        if tracker.target.is_none() {
            return Err(ErrorIndicator::new(
                codes::NO_TARGET,
                format!("{} has no target selected before it", node.label()),
            ));
        }
        Ok(())
    }

    /// Check every node against the snapshot in force when it would run.
    /// Nested iterators and branches check their own generations.
    fn validate(&self) -> Result<(), ErrorIndicator> {
        let mut tracker = self.tracker.clone();
        for node in &self.nodes {
            match node {
                SequenceNode::Config(config) => self.check_instrument(&config.instrument, node)?,
                SequenceNode::Expose(expose) => {
                    Self::require_target(&tracker, node)?;
                    if let Some(instrument) = expose.instrument.as_ref().or(tracker.instrument.as_ref()) {
                        self.check_instrument(instrument, node)?;
                    }
                }
                SequenceNode::Calibration(calibration) => {
                    self.check_instrument(&calibration.instrument, node)?
                }
                SequenceNode::Acquisition(acquisition) => {
                    Self::require_target(&tracker, node)?;
                    self.check_instrument(&acquisition.instrument, node)?;
                }
                _ => {}
            }
            tracker.apply(node);
        }
        Ok(())
    }

    fn create_child(&self, node: &SequenceNode, tracker: &ChangeTracker) -> Result<TaskRef, ErrorIndicator> {
        let child: TaskRef = match node {
            SequenceNode::Iterator(iterator) => Arc::new(IteratorControl::task(
                iterator.clone(),
                tracker.clone(),
                self.context.clone(),
            )),
            SequenceNode::Branch(branch) => Arc::new(BranchControl::task(
                branch.clone(),
                tracker.clone(),
                self.context.clone(),
            )),
            SequenceNode::Slew(_)
            | SequenceNode::Config(_)
            | SequenceNode::Expose(_)
            | SequenceNode::Offset(_)
            | SequenceNode::Calibration(_)
            | SequenceNode::Acquisition(_)
            | SequenceNode::Rotator(_)
            | SequenceNode::Autoguider(_) => self.context.executives.create(node, tracker)?,
        };
        Ok(child)
    }
}

impl TaskPolicy for IteratorSequence {
    fn pre_init(&mut self, _ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        self.validate()
    }

    fn create_task_list(&mut self, ctx: &mut CompositeContext<'_>) -> Result<(), ErrorIndicator> {
        self.children.clear();
        self.latest = self.tracker.clone();

        let mut tracker = self.tracker.clone();
        for node in &self.nodes {
            let child = self.create_child(node, &tracker)?;
            self.children.push(ctx.add_task(child)?);
            tracker.apply(node);
        }
        ctx.sequence_chain(&self.children)?;
        debug!(task = %ctx.name(), children = self.children.len(), "Generation created");
        Ok(())
    }

    fn on_sub_task_done(&mut self, ctx: &mut CompositeContext<'_>, child: &TaskRef) {
        let decoded = child.result().map(|value| ChangeTracker::from_value(&value));
        match decoded {
            Some(Ok(tracker)) => self.latest = tracker,
            Some(Err(err)) => {
                warn!(task = %ctx.name(), child = %child.name(), "Ignoring child result: {}", err);
            }
            None => {
                let index = self.children.iter().position(|id| *id == child.id());
                if let Some(node) = index.and_then(|i| self.nodes.get(i)) {
                    self.latest.apply(node);
                }
            }
        }
    }

    fn on_completion(&mut self, ctx: &mut CompositeContext<'_>) {
        match self.latest.to_value() {
            Ok(value) => ctx.set_result(value),
            Err(err) => warn!(task = %ctx.name(), "Could not publish tracker: {}", err),
        }
    }

    fn on_reset(&mut self) {
        self.children.clear();
        self.latest = self.tracker.clone();
    }
}
