use crate::config::ConfigError;
use crate::control::{InstrumentCapability, InstrumentStatus};
use crate::env::engine;
use crate::task::{ExhaustedAction, ParallelConfig, RetryPolicy, UnblockRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    pub time_budget_secs: Option<u64>,
    pub unblock_rule: UnblockRule,
    pub abortable: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: engine::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            time_budget_secs: None,
            unblock_rule: UnblockRule::RequireDone,
            abortable: true,
        }
    }
}

/// `[retry]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    pub on_exhausted: ExhaustedAction,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: engine::DEFAULT_MAX_ATTEMPTS,
            backoff_ms: engine::DEFAULT_BACKOFF.as_millis() as u64,
            multiplier: 2.0,
            jitter_ms: 0,
            on_exhausted: ExhaustedAction::FailUpward,
        }
    }
}

/// `[simulation]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Factor applied to every simulated executive duration
    pub time_scale: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { time_scale: 1.0 }
    }
}

/// One `[[instruments]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub name: String,
    #[serde(default)]
    pub capability: InstrumentCapability,
    #[serde(default)]
    pub status: InstrumentStatus,
}

/// `[tasks.<identity>]` table; every field overrides the global value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOverrides {
    pub poll_interval_ms: Option<u64>,
    pub time_budget_secs: Option<u64>,
    pub unblock_rule: Option<UnblockRule>,
    pub abortable: Option<bool>,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter_ms: Option<u64>,
    pub on_exhausted: Option<ExhaustedAction>,
}

/// Settings for the executive, usually read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveSettings {
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub simulation: SimulationSettings,
    pub instruments: Vec<InstrumentSettings>,
    pub tasks: BTreeMap<String, TaskOverrides>,
}

impl ExecutiveSettings {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: ExecutiveSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !valid_multiplier(self.retry.multiplier) {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be finite and at least 1.0".to_string(),
            ));
        }
        if self.simulation.time_scale < 0.0 || !self.simulation.time_scale.is_finite() {
            return Err(ConfigError::Invalid(
                "simulation.time_scale must be zero or positive".to_string(),
            ));
        }
        for (identity, overrides) in &self.tasks {
            if overrides.poll_interval_ms == Some(0) || overrides.max_attempts == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "tasks.{}: poll_interval_ms and max_attempts must be positive",
                    identity
                )));
            }
            if let Some(multiplier) = overrides.multiplier
                && !valid_multiplier(multiplier)
            {
                return Err(ConfigError::Invalid(format!(
                    "tasks.{}: multiplier must be finite and at least 1.0",
                    identity
                )));
            }
        }
        Ok(())
    }

    /// Engine settings for a task type
    pub fn engine_for(&self, identity: &str) -> ParallelConfig {
        self.engine_for_task(identity, None)
    }

    /// Engine settings for a task type, with the instance's own table on top
    pub fn engine_for_task(&self, identity: &str, instance: Option<&str>) -> ParallelConfig {
        let mut config = ParallelConfig::default()
            .with_poll_interval(Duration::from_millis(self.engine.poll_interval_ms))
            .with_unblock_rule(self.engine.unblock_rule);
        config.time_budget = self.engine.time_budget_secs.map(Duration::from_secs);
        config.abortable = self.engine.abortable;

        for overrides in self.layers(identity, instance) {
            if let Some(ms) = overrides.poll_interval_ms {
                config.poll_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = overrides.time_budget_secs {
                config.time_budget = Some(Duration::from_secs(secs));
            }
            if let Some(rule) = overrides.unblock_rule {
                config.unblock_rule = rule;
            }
            if let Some(abortable) = overrides.abortable {
                config.abortable = abortable;
            }
        }
        config
    }

    /// Retry policy for a task type
    pub fn retry_for(&self, identity: &str) -> RetryPolicy {
        self.retry_for_task(identity, None)
    }

    /// Retry policy for a task type, with the instance's own table on top
    pub fn retry_for_task(&self, identity: &str, instance: Option<&str>) -> RetryPolicy {
        let mut retry = self.retry.clone();
        for overrides in self.layers(identity, instance) {
            if let Some(max) = overrides.max_attempts {
                retry.max_attempts = max;
            }
            if let Some(ms) = overrides.backoff_ms {
                retry.backoff_ms = ms;
            }
            if let Some(multiplier) = overrides.multiplier {
                retry.multiplier = multiplier;
            }
            if let Some(ms) = overrides.jitter_ms {
                retry.jitter_ms = ms;
            }
            if let Some(action) = overrides.on_exhausted {
                retry.on_exhausted = action;
            }
        }

        let mut policy = RetryPolicy::new(retry.max_attempts, Duration::from_millis(retry.backoff_ms))
            .with_multiplier(retry.multiplier)
            .with_jitter(Duration::from_millis(retry.jitter_ms));
        policy.on_exhausted = retry.on_exhausted;
        policy
    }

    /// Override tables in ascending precedence
    fn layers<'a>(&'a self, identity: &str, instance: Option<&str>) -> Vec<&'a TaskOverrides> {
        let mut layers = Vec::new();
        if let Some(overrides) = self.tasks.get(identity) {
            layers.push(overrides);
        }
        if let Some(overrides) = instance.and_then(|name| self.tasks.get(name)) {
            layers.push(overrides);
        }
        layers
    }
}

fn valid_multiplier(multiplier: f64) -> bool {
    multiplier.is_finite() && multiplier >= 1.0
}
