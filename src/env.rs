//! Environment constants and path utilities for the telescope executive.
//!
//! This module centralizes configuration file names, default engine timings
//! and the numeric error codes reported through [`ErrorIndicator`](crate::task::ErrorIndicator).

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application directory name (hidden directory like .git, .vscode)
pub const TEX_DIR_NAME: &str = ".tex";

/// Configuration file name inside [`TEX_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "tex.toml";

/// System-wide configuration file (Unix-like systems)
pub const SYSTEM_CONFIG_FILE: &str = "/etc/tex/config.toml";

/// Engine timing defaults
pub mod engine {
    use super::Duration;

    /// Interval between two iterations of a composite's worker loop
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

    /// Delay a modal agent waits before yielding control when it has no job
    pub const DEFAULT_MODAL_YIELD_DELAY: Duration = Duration::from_millis(500);

    /// Default number of attempts a retry policy allows
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default delay before the first retry
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

    /// Longest delay a retry policy will ever wait
    pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);
}

/// Task identities used for per-task configuration lookups
pub mod identity {
    pub const GROUP: &str = "group";
    pub const ITERATOR_CONTROL: &str = "iterator_control";
    pub const ITERATOR_SEQUENCE: &str = "iterator_sequence";
    pub const BRANCH_CONTROL: &str = "branch_control";
}

/// Error codes carried by error indicators
pub mod codes {
    /// A dependency edge would create a cycle or names an unknown task
    pub const SEQUENCING_ERROR: i32 = 1001;
    /// A composite could not build its initial structure
    pub const INIT_FAILURE: i32 = 1002;
    /// A branch does not have exactly two components
    pub const BRANCH_CARDINALITY: i32 = 1003;
    /// An instrument named by the sequence is not in the registry
    pub const UNKNOWN_INSTRUMENT: i32 = 1004;
    /// An exposure or acquisition has no target selected before it
    pub const NO_TARGET: i32 = 1005;
    /// An instrument named by the sequence reports itself offline
    pub const INSTRUMENT_OFFLINE: i32 = 1006;
    /// Pending children can never run because their predecessors will not finish
    pub const STALLED_DEPENDENTS: i32 = 1007;
    /// An instrument lacks the capability a node needs
    pub const INSTRUMENT_INCAPABLE: i32 = 1008;
    /// A sequence node is malformed
    pub const INVALID_NODE: i32 = 1009;
    /// Abort propagated from a parent composite
    pub const ABORTED_BY_PARENT: i32 = 1010;
    /// Graceful stop requested
    pub const STOPPED: i32 = 1011;
    /// A task's worker panicked before reporting an outcome
    pub const WORKER_PANIC: i32 = 1012;
    /// Failure reported by a simulated executive
    pub const SIMULATED_FAILURE: i32 = 2001;
}

/// Build the local `.tex` directory path from a workspace root
pub fn tex_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(TEX_DIR_NAME)
}

/// Build the local config file path (`<root>/.tex/config.toml`)
pub fn local_config_file_path(workspace_root: &Path) -> PathBuf {
    tex_dir_path(workspace_root).join(CONFIG_FILE_NAME)
}

/// Build the user config file path (`~/.tex/config.toml`)
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    home_dir.join(TEX_DIR_NAME).join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let root = PathBuf::from("/obs");
        assert_eq!(
            local_config_file_path(&root),
            PathBuf::from("/obs/.tex/config.toml")
        );
        assert_eq!(
            user_config_file_path(&PathBuf::from("/home/astro")),
            PathBuf::from("/home/astro/.tex/config.toml")
        );
    }
}
