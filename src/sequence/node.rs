use crate::sequence::condition::IterationCondition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sky position a slew points at
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// A container that repeats its children under a condition
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IteratorNode {
    pub name: String,
    #[serde(default)]
    pub condition: IterationCondition,
    #[serde(default)]
    pub children: Vec<SequenceNode>,
}

impl IteratorNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: IterationCondition::default(),
            children: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: IterationCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_child(mut self, child: SequenceNode) -> Self {
        self.children.push(child);
        self
    }
}

/// A fork whose components run concurrently
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchNode {
    pub name: String,
    #[serde(default)]
    pub components: Vec<IteratorNode>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SlewNode {
    pub target: Target,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfigNode {
    pub instrument: String,
    pub config_id: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExposeNode {
    /// Defaults to the instrument selected by the last config node
    #[serde(default)]
    pub instrument: Option<String>,
    pub exposure_ms: u64,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OffsetNode {
    pub ra_arcsec: f64,
    pub dec_arcsec: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CalibrationNode {
    pub instrument: String,
    /// Calibration type, such as `arc`, `flat` or `bias`
    pub calibration: String,
    #[serde(default)]
    pub exposure_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AcquisitionNode {
    pub instrument: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotatorMode {
    #[default]
    Sky,
    Mount,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RotatorNode {
    pub angle_deg: f64,
    #[serde(default)]
    pub mode: RotatorMode,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AutoguiderNode {
    pub enabled: bool,
}

/// One node of an observing sequence, decoded once from the document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceNode {
    Iterator(IteratorNode),
    Branch(BranchNode),
    Slew(SlewNode),
    Config(ConfigNode),
    Expose(ExposeNode),
    Offset(OffsetNode),
    Calibration(CalibrationNode),
    Acquisition(AcquisitionNode),
    Rotator(RotatorNode),
    Autoguider(AutoguiderNode),
}

impl SequenceNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            SequenceNode::Iterator(_) => NodeKind::Iterator,
            SequenceNode::Branch(_) => NodeKind::Branch,
            SequenceNode::Slew(_) => NodeKind::Slew,
            SequenceNode::Config(_) => NodeKind::Config,
            SequenceNode::Expose(_) => NodeKind::Expose,
            SequenceNode::Offset(_) => NodeKind::Offset,
            SequenceNode::Calibration(_) => NodeKind::Calibration,
            SequenceNode::Acquisition(_) => NodeKind::Acquisition,
            SequenceNode::Rotator(_) => NodeKind::Rotator,
            SequenceNode::Autoguider(_) => NodeKind::Autoguider,
        }
    }

    /// Whether the node is carried out by an executive rather than a composite
    pub fn is_executive(&self) -> bool {
        !matches!(self, SequenceNode::Iterator(_) | SequenceNode::Branch(_))
    }

    /// Short human readable label used as task name
    pub fn label(&self) -> String {
        match self {
            SequenceNode::Iterator(node) => node.name.clone(),
            SequenceNode::Branch(node) => node.name.clone(),
            SequenceNode::Slew(node) => format!("slew:{}", node.target.name),
            SequenceNode::Config(node) => format!("config:{}:{}", node.instrument, node.config_id),
            SequenceNode::Expose(node) => match &node.instrument {
                Some(instrument) => format!("expose:{}:{}x{}ms", instrument, node.count, node.exposure_ms),
                None => format!("expose:{}x{}ms", node.count, node.exposure_ms),
            },
            SequenceNode::Offset(node) => {
                format!("offset:{:+.1}\",{:+.1}\"", node.ra_arcsec, node.dec_arcsec)
            }
            SequenceNode::Calibration(node) => {
                format!("calibration:{}:{}", node.instrument, node.calibration)
            }
            SequenceNode::Acquisition(node) => format!("acquisition:{}", node.instrument),
            SequenceNode::Rotator(node) => format!("rotator:{:.1}", node.angle_deg),
            SequenceNode::Autoguider(node) => {
                format!("autoguider:{}", if node.enabled { "on" } else { "off" })
            }
        }
    }
}

/// Discriminator of [`SequenceNode`] variants
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Iterator,
    Branch,
    Slew,
    Config,
    Expose,
    Offset,
    Calibration,
    Acquisition,
    Rotator,
    Autoguider,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        NodeKind::Iterator,
        NodeKind::Branch,
        NodeKind::Slew,
        NodeKind::Config,
        NodeKind::Expose,
        NodeKind::Offset,
        NodeKind::Calibration,
        NodeKind::Acquisition,
        NodeKind::Rotator,
        NodeKind::Autoguider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Iterator => "iterator",
            NodeKind::Branch => "branch",
            NodeKind::Slew => "slew",
            NodeKind::Config => "config",
            NodeKind::Expose => "expose",
            NodeKind::Offset => "offset",
            NodeKind::Calibration => "calibration",
            NodeKind::Acquisition => "acquisition",
            NodeKind::Rotator => "rotator",
            NodeKind::Autoguider => "autoguider",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown node kind '{}'", s))
    }
}
