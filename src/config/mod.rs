//! Configuration discovery and loading
//!
//! Settings are looked up in this order:
//! 1. Current directory: ./tex.toml or ./.tex/config.toml
//! 2. User config: ~/.tex/config.toml
//! 3. System config: /etc/tex/config.toml
//! 4. Built-in defaults

pub mod discovery;
pub mod settings;

pub use discovery::*;
pub use settings::*;

use std::path::PathBuf;

/// Errors raised while loading or validating settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
