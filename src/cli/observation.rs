//! Glue between a loaded sequence document and the control layer
//!
//! Builds the execution context for `tex run` and turns the final outcome
//! into a report for the operator.

use crate::config::ExecutiveSettings;
use crate::control::{ExecutionContext, FaultSpec, InstrumentCapability, SimulatedExecutives, StaticRegistry};
use crate::sequence::{ChangeTracker, IteratorNode, SequenceNode};
use crate::task::TaskOutcome;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Instruments named anywhere in the tree
pub fn referenced_instruments(root: &IteratorNode) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_instruments(&root.children, &mut names);
    names
}

fn collect_instruments(nodes: &[SequenceNode], names: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            SequenceNode::Iterator(iterator) => collect_instruments(&iterator.children, names),
            SequenceNode::Branch(branch) => {
                for component in &branch.components {
                    collect_instruments(&component.children, names);
                }
            }
            SequenceNode::Config(config) => {
                names.insert(config.instrument.clone());
            }
            SequenceNode::Expose(expose) => {
                if let Some(instrument) = &expose.instrument {
                    names.insert(instrument.clone());
                }
            }
            SequenceNode::Calibration(calibration) => {
                names.insert(calibration.instrument.clone());
            }
            SequenceNode::Acquisition(acquisition) => {
                names.insert(acquisition.instrument.clone());
            }
            SequenceNode::Slew(_)
            | SequenceNode::Offset(_)
            | SequenceNode::Rotator(_)
            | SequenceNode::Autoguider(_) => {}
        }
    }
}

/// Registry from the configured instruments. Without any configured, every
/// instrument the sequence names is registered online with full capability.
pub fn registry_for(settings: &ExecutiveSettings, root: &IteratorNode) -> StaticRegistry {
    if !settings.instruments.is_empty() {
        return StaticRegistry::from_settings(&settings.instruments);
    }
    let registry = StaticRegistry::new();
    for name in referenced_instruments(root) {
        debug!("Registering simulated instrument {}", name);
        registry.register(&name, InstrumentCapability::default());
    }
    registry
}

/// Context that runs `root` against simulated executives
pub fn simulated_context(
    settings: ExecutiveSettings,
    root: &IteratorNode,
    time_scale: Option<f64>,
    faults: &[FaultSpec],
) -> (ExecutionContext, Arc<SimulatedExecutives>) {
    let time_scale = time_scale.unwrap_or(settings.simulation.time_scale);
    info!("Simulating executives with time scale {}", time_scale);

    let executives = faults
        .iter()
        .fold(SimulatedExecutives::new(time_scale), |executives, fault| {
            executives.with_fault(*fault)
        });
    let executives = Arc::new(executives);
    let registry = Arc::new(registry_for(&settings, root));

    let context = ExecutionContext::new(executives.clone(), registry).with_settings(settings);
    (context, executives)
}

/// Operator-facing summary of a finished observation
#[derive(Debug, Serialize)]
pub struct ObservationReport {
    pub sequence: String,
    pub status: &'static str,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub executives_created: usize,
    pub tracker: Option<ChangeTracker>,
}

impl ObservationReport {
    pub fn new(sequence: &str, outcome: &TaskOutcome, executives_created: usize) -> Self {
        let status = match outcome {
            TaskOutcome::Done { .. } => "done",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::Aborted { .. } => "aborted",
        };
        let tracker = match outcome {
            TaskOutcome::Done { result: Some(value) } => ChangeTracker::from_value(value).ok(),
            _ => None,
        };
        Self {
            sequence: sequence.to_string(),
            status,
            error_code: outcome.error().map(|e| e.code()),
            error_message: outcome.error().map(|e| e.message().to_string()),
            executives_created,
            tracker,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == "done"
    }

    pub fn print(&self) {
        println!("Sequence: {}", self.sequence);
        println!("Status:   {}", self.status);
        if let (Some(code), Some(message)) = (self.error_code, &self.error_message) {
            println!("Error:    [{}] {}", code, message);
        }
        println!("Executives created: {}", self.executives_created);
        if let Some(tracker) = &self.tracker {
            if let Some(target) = &tracker.target {
                println!("Target:     {} ({:.4}, {:+.4})", target.name, target.ra_deg, target.dec_deg);
            }
            if let Some(instrument) = &tracker.instrument {
                println!("Instrument: {}", instrument);
            }
            for (instrument, config) in &tracker.instrument_configs {
                println!("  {} -> {}", instrument, config);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentSettings;
    use crate::control::{InstrumentRegistry, InstrumentStatus};
    use crate::sequence::{BranchNode, CalibrationNode, ConfigNode, ExposeNode};
    use crate::task::ErrorIndicator;
    use std::collections::BTreeMap;

    fn survey() -> IteratorNode {
        IteratorNode::new("survey")
            .with_child(SequenceNode::Config(ConfigNode {
                instrument: "imager".to_string(),
                config_id: "r-band".to_string(),
                settings: BTreeMap::new(),
            }))
            .with_child(SequenceNode::Branch(BranchNode {
                name: "arms".to_string(),
                components: vec![
                    IteratorNode::new("red").with_child(SequenceNode::Calibration(CalibrationNode {
                        instrument: "red_arm".to_string(),
                        calibration: "arc".to_string(),
                        exposure_ms: 0,
                    })),
                    IteratorNode::new("blue").with_child(SequenceNode::Expose(ExposeNode {
                        instrument: Some("blue_arm".to_string()),
                        exposure_ms: 10,
                        count: 1,
                    })),
                ],
            }))
    }

    #[test]
    fn test_referenced_instruments_walks_branches() {
        let names: Vec<_> = referenced_instruments(&survey()).into_iter().collect();
        assert_eq!(names, vec!["blue_arm", "imager", "red_arm"]);
    }

    #[test]
    fn test_configured_instruments_take_precedence() {
        let mut settings = ExecutiveSettings::default();
        settings.instruments.push(InstrumentSettings {
            name: "imager".to_string(),
            capability: InstrumentCapability::default(),
            status: InstrumentStatus::Offline,
        });

        let registry = registry_for(&settings, &survey());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status("imager"), Some(InstrumentStatus::Offline));
        assert!(registry.descriptor("red_arm").is_none());

        let registry = registry_for(&ExecutiveSettings::default(), &survey());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_report_for_failure() {
        let outcome = TaskOutcome::Failed {
            error: ErrorIndicator::new(1004, "unknown instrument 'nirspec'"),
        };
        let report = ObservationReport::new("survey", &outcome, 0);
        assert!(!report.succeeded());
        assert_eq!(report.status, "failed");
        assert_eq!(report.error_code, Some(1004));
        assert!(report.tracker.is_none());
    }
}
