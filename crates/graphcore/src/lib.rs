//! Core abstractions for the graph engine
//!
//! This crate provides the types every other component depends on: values,
//! attribute descriptors, node definitions, the `Node` trait, build reports
//! and the error taxonomy. It has no scheduling logic.

mod attribute;
mod error;
pub mod events;
pub mod hashing;
mod node;
mod report;
mod spec;
mod value;

pub use attribute::{AttributeDescriptor, NodeDefinition, NodeDefinitionBuilder, Role};
pub use error::{CacheError, DefinitionError, ExecutionError, GraphError, NodeError};
pub use events::*;
pub use node::{Node, NodeContext};
pub use report::{BuildReport, NodeOutcome, NodeState};
pub use spec::{AttrRef, Binding, NodeId, NodeSpec};
pub use value::Value;

/// Logical engine version, part of every fingerprint. Changing it
/// invalidates all persisted fingerprints.
pub const ENGINE_VERSION: &str = "1";

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
