use crate::config::{ConfigError, ExecutiveSettings};
use crate::env;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Settings together with the file they came from
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: ExecutiveSettings,
    /// `None` when built-in defaults are in use
    pub source: Option<PathBuf>,
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load an explicit file, or discover one using the hierarchy
    pub fn load(explicit: Option<&Path>) -> Result<LoadedSettings, ConfigError> {
        match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                Ok(LoadedSettings {
                    settings: ExecutiveSettings::from_toml_file(path)?,
                    source: Some(path.to_path_buf()),
                })
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<LoadedSettings, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            let settings = ExecutiveSettings::from_toml_file(&config_path)?;
            return Ok(LoadedSettings {
                settings,
                source: Some(config_path),
            });
        }

        info!("No configuration file found, using defaults");
        Ok(LoadedSettings {
            settings: ExecutiveSettings::default(),
            source: None,
        })
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(Self::get_config_candidates())
    }

    fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Candidates in priority order for a working directory and home directory
    pub fn candidates_for(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(current_dir) = current_dir {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(current_dir));
        }

        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_FILE));

        candidates
    }

    fn get_config_candidates() -> Vec<PathBuf> {
        let current_dir = std_env::current_dir().ok();
        let home_dir = Self::get_home_dir();
        Self::candidates_for(current_dir.as_deref(), home_dir.as_deref())
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write the default settings to `./.tex/config.toml` unless a file exists
    pub fn create_local_config(workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        let config_dir = env::tex_dir_path(workspace_root);
        let config_path = env::local_config_file_path(workspace_root);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|source| ConfigError::Io {
                path: config_dir.clone(),
                source,
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if config_path.exists() {
            warn!("Configuration file already exists: {:?}", config_path);
        } else {
            ExecutiveSettings::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_order() {
        let cwd = PathBuf::from("/obs/night");
        let home = PathBuf::from("/home/astro");
        let candidates = ConfigDiscovery::candidates_for(Some(&cwd), Some(&home));

        assert_eq!(candidates[0], PathBuf::from("/obs/night/tex.toml"));
        assert_eq!(candidates[1], PathBuf::from("/obs/night/.tex/config.toml"));
        assert_eq!(candidates[2], PathBuf::from("/home/astro/.tex/config.toml"));
    }

    #[test]
    fn test_local_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let dot_config = ConfigDiscovery::create_local_config(root).unwrap();
        assert!(dot_config.is_file());
        fs::write(root.join("tex.toml"), "[engine]\npoll_interval_ms = 10\n").unwrap();

        let found = ConfigDiscovery::first_existing(ConfigDiscovery::candidates_for(Some(root), None));
        assert_eq!(found, Some(root.join("tex.toml")));

        let loaded = ConfigDiscovery::load(found.as_deref()).unwrap();
        assert_eq!(loaded.settings.engine.poll_interval_ms, 10);
    }

    #[test]
    fn test_created_config_loads_as_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = ConfigDiscovery::create_local_config(temp_dir.path()).unwrap();

        let loaded = ConfigDiscovery::load(Some(&path)).unwrap();
        assert_eq!(loaded.settings, ExecutiveSettings::default());
        assert_eq!(loaded.source, Some(path));
    }
}
