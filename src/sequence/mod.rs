//! Read-only model of an observing sequence.
//!
//! Documents are decoded once into the [`SequenceNode`] sum type; composites
//! dispatch on it with a `match`.

pub mod condition;
pub mod document;
pub mod node;
pub mod tracker;

pub use condition::*;
pub use document::*;
pub use node::*;
pub use tracker::*;
