//! # Telescope Executive
//!
//! A hierarchical task execution engine for robotic telescope observing
//! sequences. An observation is a tree of tasks: composites schedule their
//! children over a dependency graph, leaves drive a single piece of hardware,
//! and every task reports done, failed or aborted to the composite that
//! manages it.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: The generic engine. Task lists with dependency edges, the
//!   `Task`/`TaskManager` contracts, the `ParallelTask` worker loop
//!   parameterised by a `TaskPolicy`, modal agents and retry policies
//! - **[`sequence`]**: The observing-sequence model and the change tracker
//!   snapshot carried from node to node
//! - **[`control`]**: Iterator, sequence and branch composites that expand a
//!   sequence while it runs, plus simulated executives
//! - **[`config`]**: TOML settings with per-task overrides and discovery
//! - **[`cli`]**: The `tex` command line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telescope_executive::control::{ExecutionContext, SimulatedExecutives, StaticRegistry, observe};
//! use telescope_executive::sequence::load_sequence;
//! use telescope_executive::task::RootManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let root = load_sequence("night.toml".as_ref())?;
//!     let context = ExecutionContext::new(
//!         Arc::new(SimulatedExecutives::new(0.1)),
//!         Arc::new(StaticRegistry::new()),
//!     );
//!
//!     let outcome = RootManager::new().run(Arc::new(observe(root, context))).await;
//!     println!("Observation finished: {:?}", outcome);
//!     Ok(())
//! }
//! ```

/// Task engine: lifecycle, task lists, composites and managers.
pub mod task;

/// Observing-sequence document model.
pub mod sequence;

/// Composites that turn a sequence into running tasks.
pub mod control;

/// Settings loading and discovery.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes configuration file names, engine defaults and error codes.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use config::{ConfigDiscovery, ExecutiveSettings};
pub use control::{ExecutionContext, ExecutiveFactory, InstrumentRegistry, observe};
pub use sequence::{ChangeTracker, IteratorNode, SequenceNode};
pub use task::{
    ErrorIndicator, ParallelTask, RootManager, Task, TaskManager, TaskOutcome, TaskPolicy, TaskRef,
    TaskState,
};
