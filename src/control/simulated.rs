//! Executive factory that stands in for the hardware: every node takes a
//! scaled nominal duration and then applies its effect to the tracker.

use crate::control::executive::ExecutiveFactory;
use crate::env::codes;
use crate::sequence::{ChangeTracker, NodeKind, SequenceNode};
use crate::task::{ErrorIndicator, LeafTask, TaskRef};
use dashmap::DashMap;
use futures::FutureExt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scripted failure: the next `count` runs of `kind` fail with `code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSpec {
    pub kind: NodeKind,
    pub count: u32,
    pub code: i32,
}

impl FromStr for FaultSpec {
    type Err = String;

    /// Parse `kind:count[:code]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("expected kind:count[:code], got '{}'", s));
        }
        let kind = parts[0].parse::<NodeKind>()?;
        let count = parts[1]
            .parse::<u32>()
            .map_err(|e| format!("invalid count '{}': {}", parts[1], e))?;
        let code = match parts.get(2) {
            Some(code) => code
                .parse::<i32>()
                .map_err(|e| format!("invalid code '{}': {}", code, e))?,
            None => codes::SIMULATED_FAILURE,
        };
        Ok(Self { kind, count, code })
    }
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    remaining: u32,
    code: i32,
}

pub struct SimulatedExecutives {
    time_scale: f64,
    faults: Arc<DashMap<NodeKind, FaultPlan>>,
    created: DashMap<NodeKind, usize>,
    runs: Arc<DashMap<NodeKind, usize>>,
}

impl SimulatedExecutives {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale: time_scale.max(0.0),
            faults: Arc::new(DashMap::new()),
            created: DashMap::new(),
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn with_fault(self, fault: FaultSpec) -> Self {
        self.faults.insert(
            fault.kind,
            FaultPlan {
                remaining: fault.count,
                code: fault.code,
            },
        );
        self
    }

    /// Tasks created for nodes of `kind`
    pub fn created(&self, kind: NodeKind) -> usize {
        self.created.get(&kind).map(|c| *c).unwrap_or(0)
    }

    /// Executions started for nodes of `kind`, retries included
    pub fn runs(&self, kind: NodeKind) -> usize {
        self.runs.get(&kind).map(|c| *c).unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.created.iter().map(|entry| *entry.value()).sum()
    }

    fn nominal_duration(node: &SequenceNode) -> Duration {
        match node {
            SequenceNode::Slew(_) => Duration::from_secs(2),
            SequenceNode::Config(_) => Duration::from_millis(500),
            SequenceNode::Expose(expose) => {
                Duration::from_millis(expose.exposure_ms.saturating_mul(expose.count as u64))
            }
            SequenceNode::Offset(_) => Duration::from_millis(200),
            SequenceNode::Calibration(calibration) => {
                Duration::from_millis(calibration.exposure_ms.max(100))
            }
            SequenceNode::Acquisition(_) => Duration::from_secs(1),
            SequenceNode::Rotator(_) => Duration::from_millis(800),
            SequenceNode::Autoguider(_) => Duration::from_millis(300),
            SequenceNode::Iterator(_) | SequenceNode::Branch(_) => Duration::ZERO,
        }
    }

    fn take_fault(faults: &DashMap<NodeKind, FaultPlan>, kind: NodeKind) -> Option<i32> {
        let mut plan = faults.get_mut(&kind)?;
        if plan.remaining == 0 {
            return None;
        }
        plan.remaining -= 1;
        Some(plan.code)
    }
}

impl ExecutiveFactory for SimulatedExecutives {
    fn create(&self, node: &SequenceNode, tracker: &ChangeTracker) -> Result<TaskRef, ErrorIndicator> {
        if !node.is_executive() {
            return Err(ErrorIndicator::new(
                codes::INVALID_NODE,
                format!("{} nodes are not carried out by an executive", node.kind()),
            ));
        }

        let kind = node.kind();
        let scaled = Self::nominal_duration(node).as_secs_f64() * self.time_scale;
        let duration = Duration::try_from_secs_f64(scaled).map_err(|_| {
            ErrorIndicator::new(
                codes::INVALID_NODE,
                format!(
                    "{} runs too long to simulate at time scale {}",
                    node.label(),
                    self.time_scale
                ),
            )
        })?;
        *self.created.entry(kind).or_insert(0) += 1;

        let after = tracker.after(std::slice::from_ref(node)).to_value()?;
        let faults = self.faults.clone();
        let runs = self.runs.clone();
        let label = node.label();
        debug!(executive = %label, ?duration, "Created simulated executive");

        let task = LeafTask::from_fn(label.clone(), move |_cancel| {
            let faults = faults.clone();
            let runs = runs.clone();
            let after = after.clone();
            let label = label.clone();
            async move {
                *runs.entry(kind).or_insert(0) += 1;
                tokio::time::sleep(duration).await;
                if let Some(code) = Self::take_fault(&faults, kind) {
                    warn!(executive = %label, code, "Simulated executive failure");
                    return Err(ErrorIndicator::new(
                        code,
                        format!("simulated {} failure", kind),
                    ));
                }
                Ok(Some(after))
            }
            .boxed()
        });
        Ok(Arc::new(task))
    }
}
