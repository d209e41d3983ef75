use crate::events::EventEmitter;
use crate::{DefinitionError, NodeDefinition, NodeError, NodeId, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Core trait that all executable nodes implement
///
/// A node reads its parameters, dependencies and input paths from the
/// context and writes its declared outputs back into it. The engine never
/// looks inside `run`; it only gates it by fingerprint and checks the
/// declared outputs afterwards.
#[async_trait]
pub trait Node: Send + Sync {
    /// Static shape of this node type. Called once per instantiation; the
    /// project caches it by definition name.
    fn definition(&self) -> Result<NodeDefinition, DefinitionError>;

    /// Execute the node with the resolved context
    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError>;
}

/// Execution context passed to `Node::run`
pub struct NodeContext {
    pub node_id: NodeId,

    /// Node working directory, created before `run`
    pub nwd: PathBuf,

    /// Parameter values (defaults merged with instantiation values)
    pub params: BTreeMap<String, Value>,

    /// Resolved upstream values for `Dependency` attributes
    pub deps: BTreeMap<String, Value>,

    /// Resolved locations of every path attribute
    pub paths: BTreeMap<String, PathBuf>,

    /// Event emitter for progress messages
    pub events: EventEmitter,

    outputs: BTreeMap<String, Value>,
}

impl NodeContext {
    pub fn new(node_id: NodeId, nwd: PathBuf, events: EventEmitter) -> Self {
        Self {
            node_id,
            nwd,
            params: BTreeMap::new(),
            deps: BTreeMap::new(),
            paths: BTreeMap::new(),
            events,
            outputs: BTreeMap::new(),
        }
    }

    /// Context for calling `run` directly, outside any build. Nothing is
    /// cached or fingerprinted and events go nowhere.
    pub fn standalone(node_id: impl Into<NodeId>, nwd: impl Into<PathBuf>) -> Self {
        let node_id = node_id.into();
        let events = EventEmitter::detached(node_id.clone());
        Self::new(node_id, nwd.into(), events)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_dep(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.deps.insert(key.into(), value.into());
        self
    }

    pub fn with_path(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(key.into(), path.into());
        self
    }

    /// Get a parameter or return error
    pub fn param(&self, name: &str) -> Result<&Value, NodeError> {
        self.params
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn param_f64(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.param(name)?;
        value.as_f64().ok_or_else(|| mismatch(name, "number", value))
    }

    pub fn param_i64(&self, name: &str) -> Result<i64, NodeError> {
        let value = self.param(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, "int", value))
    }

    pub fn param_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.param(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "string", value))
    }

    /// Get a resolved dependency or return error
    pub fn dep(&self, name: &str) -> Result<&Value, NodeError> {
        self.deps
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn path(&self, name: &str) -> Result<&Path, NodeError> {
        self.paths
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Record an `OutsValue` or `Plot` output.
    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn take_outputs(&mut self) -> BTreeMap<String, Value> {
        std::mem::take(&mut self.outputs)
    }
}

fn mismatch(field: &str, expected: &str, actual: &Value) -> NodeError {
    NodeError::InvalidInputType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}
