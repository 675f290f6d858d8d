use crate::config::InstrumentSettings;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What an instrument can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentCapability {
    pub can_configure: bool,
    pub can_expose: bool,
    pub can_acquire: bool,
    pub can_calibrate: bool,
}

impl Default for InstrumentCapability {
    fn default() -> Self {
        Self {
            can_configure: true,
            can_expose: true,
            can_acquire: true,
            can_calibrate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentStatus {
    #[default]
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDescriptor {
    pub name: String,
    pub capability: InstrumentCapability,
}

/// Lookup of instruments by name, used to validate preconditions
pub trait InstrumentRegistry: Send + Sync {
    fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor>;

    fn status(&self, name: &str) -> Option<InstrumentStatus>;
}

/// In-memory registry filled from settings or by hand
#[derive(Debug, Default)]
pub struct StaticRegistry {
    instruments: DashMap<String, (InstrumentDescriptor, InstrumentStatus)>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(instruments: &[InstrumentSettings]) -> Self {
        let registry = Self::new();
        for instrument in instruments {
            registry.register(&instrument.name, instrument.capability);
            registry.set_status(&instrument.name, instrument.status);
        }
        registry
    }

    /// Register an online instrument
    pub fn register(&self, name: &str, capability: InstrumentCapability) {
        let descriptor = InstrumentDescriptor {
            name: name.to_string(),
            capability,
        };
        self.instruments
            .insert(name.to_string(), (descriptor, InstrumentStatus::Online));
    }

    /// Update the status of a registered instrument. Unknown names are ignored.
    pub fn set_status(&self, name: &str, status: InstrumentStatus) {
        if let Some(mut entry) = self.instruments.get_mut(name) {
            entry.1 = status;
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl InstrumentRegistry for StaticRegistry {
    fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor> {
        self.instruments.get(name).map(|entry| entry.0.clone())
    }

    fn status(&self, name: &str) -> Option<InstrumentStatus> {
        self.instruments.get(name).map(|entry| entry.1)
    }
}
