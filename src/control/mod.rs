//! Observation control: composites that expand a sequence document into tasks
//! while it runs.
//!
//! - [`IteratorControl`] repeats a generation while its condition holds
//! - [`IteratorSequence`] runs one generation in document order
//! - [`BranchControl`] runs two components concurrently
//!
//! Collaborators (executive factory, instrument registry, settings) are
//! injected through an [`ExecutionContext`].

pub mod branch;
pub mod context;
pub mod executive;
pub mod iterator;
pub mod registry;
pub mod sequence;
pub mod simulated;

#[cfg(test)]
mod tests;

pub use branch::*;
pub use context::*;
pub use executive::*;
pub use iterator::*;
pub use registry::*;
pub use sequence::*;
pub use simulated::*;

use crate::sequence::{ChangeTracker, IteratorNode};

/// Build the top-level composite for an observation rooted at `root`
pub fn observe(root: IteratorNode, context: ExecutionContext) -> IteratorControlTask {
    IteratorControl::task(root, ChangeTracker::new(), context)
}
