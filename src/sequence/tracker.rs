//! Snapshot of the configuration state accumulated while walking a sequence.
//!
//! Every field is set, never accumulated, so applying the same nodes twice
//! leaves the same snapshot as applying them once. That is what allows a
//! composite to predict the snapshot each of its children starts from.

use crate::sequence::node::*;
use crate::task::ErrorIndicator;
use crate::env::codes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChangeTracker {
    pub target: Option<Target>,
    /// Instrument selected by the most recent config or acquisition
    pub instrument: Option<String>,
    /// Last configuration applied per instrument
    pub instrument_configs: BTreeMap<String, String>,
    pub offset: OffsetNode,
    pub rotator: Option<RotatorNode>,
    pub autoguiding: bool,
    /// Whether the current target has been acquired
    pub acquired: bool,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the effect of `node`
    pub fn apply(&mut self, node: &SequenceNode) {
        match node {
            SequenceNode::Iterator(iterator) => self.apply_all(&iterator.children),
            SequenceNode::Branch(branch) => {
                let mut merged: Option<ChangeTracker> = None;
                for component in &branch.components {
                    let mut fork = self.clone();
                    fork.apply_all(&component.children);
                    match merged.as_mut() {
                        Some(primary) => primary.merge(&fork),
                        None => merged = Some(fork),
                    }
                }
                if let Some(merged) = merged {
                    *self = merged;
                }
            }
            SequenceNode::Slew(slew) => {
                self.target = Some(slew.target.clone());
                self.offset = OffsetNode::default();
                self.acquired = false;
            }
            SequenceNode::Config(config) => {
                self.instrument = Some(config.instrument.clone());
                self.instrument_configs
                    .insert(config.instrument.clone(), config.config_id.clone());
            }
            SequenceNode::Expose(expose) => {
                if let Some(instrument) = &expose.instrument {
                    self.instrument = Some(instrument.clone());
                }
            }
            SequenceNode::Offset(offset) => self.offset = offset.clone(),
            SequenceNode::Calibration(_) => {}
            SequenceNode::Acquisition(acquisition) => {
                self.instrument = Some(acquisition.instrument.clone());
                self.acquired = true;
            }
            SequenceNode::Rotator(rotator) => self.rotator = Some(rotator.clone()),
            SequenceNode::Autoguider(autoguider) => self.autoguiding = autoguider.enabled,
        }
    }

    pub fn apply_all(&mut self, nodes: &[SequenceNode]) {
        for node in nodes {
            self.apply(node);
        }
    }

    /// Snapshot after applying `nodes` to a copy of `self`
    pub fn after(&self, nodes: &[SequenceNode]) -> Self {
        let mut next = self.clone();
        next.apply_all(nodes);
        next
    }

    /// Fold a concurrently built snapshot into this one. Fields this
    /// snapshot already holds win; instrument configurations are united.
    pub fn merge(&mut self, other: &ChangeTracker) {
        for (instrument, config) in &other.instrument_configs {
            self.instrument_configs
                .entry(instrument.clone())
                .or_insert_with(|| config.clone());
        }
        if self.target.is_none() {
            self.target = other.target.clone();
        }
        if self.instrument.is_none() {
            self.instrument = other.instrument.clone();
        }
        if self.rotator.is_none() {
            self.rotator = other.rotator.clone();
        }
        self.autoguiding |= other.autoguiding;
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ErrorIndicator> {
        serde_json::to_value(self).map_err(|e| {
            ErrorIndicator::new(codes::INIT_FAILURE, "could not encode change tracker").with_cause(e)
        })
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, ErrorIndicator> {
        serde_json::from_value(value.clone()).map_err(|e| {
            ErrorIndicator::new(codes::INIT_FAILURE, "could not decode change tracker").with_cause(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::IterationCondition;

    fn slew(name: &str) -> SequenceNode {
        SequenceNode::Slew(SlewNode {
            target: Target {
                name: name.to_string(),
                ra_deg: 10.68,
                dec_deg: 41.27,
            },
        })
    }

    fn config(instrument: &str, id: &str) -> SequenceNode {
        SequenceNode::Config(ConfigNode {
            instrument: instrument.to_string(),
            config_id: id.to_string(),
            settings: Default::default(),
        })
    }

    #[test]
    fn test_slew_resets_offset_and_acquisition() {
        let mut tracker = ChangeTracker::new();
        tracker.apply(&SequenceNode::Offset(OffsetNode {
            ra_arcsec: 5.0,
            dec_arcsec: -2.0,
        }));
        tracker.apply(&SequenceNode::Acquisition(AcquisitionNode {
            instrument: "imager".to_string(),
            mode: None,
        }));
        assert!(tracker.acquired);

        tracker.apply(&slew("M31"));
        assert_eq!(tracker.offset, OffsetNode::default());
        assert!(!tracker.acquired);
        assert_eq!(tracker.target.as_ref().map(|t| t.name.as_str()), Some("M31"));
    }

    #[test]
    fn test_applying_twice_is_stable() {
        let nodes = vec![
            slew("M42"),
            config("spectrograph", "blue"),
            SequenceNode::Autoguider(AutoguiderNode { enabled: true }),
        ];
        let once = ChangeTracker::new().after(&nodes);
        let twice = once.after(&nodes);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_branch_forks_are_merged() {
        let branch = SequenceNode::Branch(BranchNode {
            name: "fork".to_string(),
            components: vec![
                IteratorNode::new("red")
                    .with_condition(IterationCondition::Once)
                    .with_child(config("red_arm", "r1")),
                IteratorNode::new("blue").with_child(config("blue_arm", "b1")),
            ],
        });

        let tracker = ChangeTracker::new().after(&[slew("M1"), branch]);

        assert_eq!(tracker.instrument.as_deref(), Some("red_arm"));
        assert_eq!(tracker.instrument_configs.len(), 2);
        assert_eq!(tracker.instrument_configs["blue_arm"], "b1");
    }

    #[test]
    fn test_value_conversion() {
        let tracker = ChangeTracker::new().after(&[slew("M51"), config("imager", "r")]);
        let value = tracker.to_value().unwrap();
        assert_eq!(ChangeTracker::from_value(&value).unwrap(), tracker);
    }
}
