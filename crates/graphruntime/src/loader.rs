//! Pipeline files: a JSON declaration of nodes, for use without writing Rust.
//!
//! ```json
//! {
//!   "name": "example",
//!   "nodes": [
//!     {"type": "echo", "name": "greet", "params": {"message": "hello"}},
//!     {"type": "json_write", "deps": {"value": "greet.message"},
//!      "paths": {"target": "{nwd}/greeting.json"}}
//!   ]
//! }
//! ```
//!
//! Parameters are plain JSON. Dependency values are `"node.attr"` strings or
//! lists of them.

use crate::project::Project;
use crate::registry::NodeRegistry;
use graphcore::{AttrRef, Binding, DefinitionError, GraphError, NodeSpec, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<PipelineNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deps: BTreeMap<String, DepRef>,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DepRef {
    One(String),
    Many(Vec<String>),
}

impl PipelineFile {
    pub fn from_path(path: &Path) -> Result<Self, GraphError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Registers every node of the pipeline with `project`, in file order.
    pub fn declare(&self, project: &mut Project, registry: &NodeRegistry) -> Result<(), GraphError> {
        tracing::info!("Declaring pipeline '{}' ({} nodes)", self.name, self.nodes.len());
        for entry in &self.nodes {
            let node = registry.create_node(&entry.node_type)?;
            project.add_shared(node, entry.to_spec()?)?;
        }
        Ok(())
    }
}

impl PipelineNode {
    fn to_spec(&self) -> Result<NodeSpec, DefinitionError> {
        let mut spec = NodeSpec::new();
        spec.name = self.name.clone();
        spec.params = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        spec.paths = self.paths.clone();

        for (attribute, dep) in &self.deps {
            let parse = |text: &str| {
                AttrRef::parse(text).ok_or_else(|| DefinitionError::RoleMismatch {
                    node: self.name.clone().unwrap_or_else(|| self.node_type.clone()),
                    attribute: attribute.clone(),
                    reason: format!("'{}' is not of the form node.attribute", text),
                })
            };
            let binding = match dep {
                DepRef::One(text) => Binding::One(parse(text)?),
                DepRef::Many(texts) => Binding::Many(texts.iter().map(|t| parse(t)).collect::<Result<_, _>>()?),
            };
            spec.deps.insert(attribute.clone(), binding);
        }
        Ok(spec)
    }
}
