use crate::report::BuildReport;
use crate::NodeId;
use thiserror::Error;

/// Top-level error for declaring, closing and building a project.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Cyclic graph: {}", format_cycle(.cycle_path))]
    CyclicGraph { cycle_path: Vec<NodeId> },

    #[error("Node '{referenced_by}' references unknown node '{missing}'")]
    UnknownNode { missing: NodeId, referenced_by: NodeId },

    #[error("Project is already closed")]
    ProjectClosed,

    #[error("Build failed: {}", .0.summary())]
    BuildFailed(Box<BuildReport>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// The report of a failed build, if this is one.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            GraphError::BuildFailed(report) => Some(report),
            _ => None,
        }
    }
}

fn format_cycle(path: &[NodeId]) -> String {
    path.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// Static declaration problems. Raised before anything runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Node definition name must not be empty")]
    EmptyName,

    #[error("Attribute '{attribute}' of '{definition}' is declared more than once")]
    DuplicateAttribute { definition: String, attribute: String },

    #[error("Default of parameter '{attribute}' cannot be fingerprinted: {reason}")]
    UnhashableDefault { attribute: String, reason: String },

    #[error("Plot attribute '{attribute}' needs non-empty x and y columns")]
    InvalidPlotAxes { attribute: String },

    #[error("Definition '{name}' was registered twice with different shapes")]
    ConflictingDefinition { name: String },

    #[error("Node '{node}' has no attribute '{attribute}'")]
    UnknownAttribute { node: String, attribute: String },

    #[error("Attribute '{attribute}' of node '{node}' cannot be bound: {reason}")]
    RoleMismatch { node: String, attribute: String, reason: String },

    #[error("Parameter '{attribute}' of node '{node}' has no default and no value")]
    MissingParameter { node: String, attribute: String },

    #[error("Value of parameter '{attribute}' on node '{node}' cannot be fingerprinted: {reason}")]
    UnhashableParameter { node: String, attribute: String, reason: String },

    #[error("Dependency '{attribute}' of node '{node}' is not bound to any output")]
    UnboundDependency { node: String, attribute: String },

    #[error("Path attribute '{attribute}' of node '{node}' has no path")]
    MissingPath { node: String, attribute: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Node id '{id}' cannot name a state directory: {reason}")]
    InvalidNodeId { id: String, reason: String },

    #[error("Duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    #[error("Second unnamed instance of '{definition}'; give it a name or enable automatic node names")]
    NameCollision { definition: String },
}

/// Error returned by a Node's `run`.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

/// Failure of a single Node during a build. Collected into the report; it
/// never aborts unrelated Nodes.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Node '{node_id}' failed: {cause}")]
    NodeExecution { node_id: NodeId, cause: NodeError },

    #[error("Node '{node_id}' did not produce declared output '{attribute}'")]
    MissingOutput { node_id: NodeId, attribute: String },

    #[error("Plot '{attribute}' of node '{node_id}' is invalid: {reason}")]
    InvalidPlot { node_id: NodeId, attribute: String, reason: String },

    #[error("Persisting results of node '{node_id}' failed: {message}")]
    Persist { node_id: NodeId, message: String },
}

impl ExecutionError {
    pub fn node_id(&self) -> &NodeId {
        match self {
            ExecutionError::NodeExecution { node_id, .. }
            | ExecutionError::MissingOutput { node_id, .. }
            | ExecutionError::InvalidPlot { node_id, .. }
            | ExecutionError::Persist { node_id, .. } => node_id,
        }
    }
}

/// Unreadable or inconsistent persisted state. Recovered by recomputing.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache corruption for node '{node_id}': {detail}")]
    CacheCorruption { node_id: NodeId, detail: String },
}
