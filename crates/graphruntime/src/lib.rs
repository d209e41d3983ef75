//! Graph build runtime
//!
//! This crate turns node declarations into a validated graph, fingerprints
//! every node, runs the dirty ones in dependency order and persists their
//! outputs so later builds can skip them.

mod artifacts;
mod executor;
mod fingerprint;
mod graph;
mod layout;
mod loader;
mod project;
mod registry;

pub use artifacts::{outs_path_present, ArtifactRecord, ArtifactStore};
pub use executor::{BuildExecutor, NodeStatus};
pub use fingerprint::{compute as compute_fingerprint, FingerprintRecord, FingerprintStore};
pub use graph::{Graph, GraphBuilder, GraphRecord, NodeInstance};
pub use layout::{StateLayout, NWD_PLACEHOLDER};
pub use loader::{DepRef, PipelineFile, PipelineNode};
pub use project::{NodeHandle, Project, ProjectConfig};
pub use registry::{DefinitionRegistry, NodeFactory, NodeMetadata, NodeRegistry};
