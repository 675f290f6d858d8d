//! CLI-specific functionality for the telescope executive
//!
//! This module contains argument parsing and the glue that turns a sequence
//! document into a running observation.

pub mod args;
pub mod observation;

pub use args::{Args, ExecutionMode, RunConfig, ValidateConfig};
pub use observation::{ObservationReport, referenced_instruments, registry_for, simulated_context};
