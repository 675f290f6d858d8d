use crate::config::ExecutiveSettings;
use crate::control::executive::ExecutiveFactory;
use crate::control::registry::InstrumentRegistry;
use crate::task::{ParallelConfig, RetryPolicy};
use std::sync::Arc;

/// Collaborators threaded through task creation instead of global state.
#[derive(Clone)]
pub struct ExecutionContext {
    pub executives: Arc<dyn ExecutiveFactory>,
    pub instruments: Arc<dyn InstrumentRegistry>,
    pub settings: Arc<ExecutiveSettings>,
}

impl ExecutionContext {
    pub fn new(
        executives: Arc<dyn ExecutiveFactory>,
        instruments: Arc<dyn InstrumentRegistry>,
    ) -> Self {
        Self {
            executives,
            instruments,
            settings: Arc::new(ExecutiveSettings::default()),
        }
    }

    pub fn with_settings(mut self, settings: ExecutiveSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Engine settings for a task of type `identity` named `name`
    pub fn engine_for(&self, identity: &str, name: &str) -> ParallelConfig {
        self.settings.engine_for_task(identity, Some(name))
    }

    pub fn retry_for(&self, identity: &str, name: &str) -> RetryPolicy {
        self.settings.retry_for_task(identity, Some(name))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
