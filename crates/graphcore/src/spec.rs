use crate::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Stable node identifier, matched against persisted state across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reference to an output attribute of another node.
///
/// The value is not captured; it is resolved when the referencing node runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrRef {
    pub node: NodeId,
    pub attribute: String,
}

impl AttrRef {
    pub fn new(node: impl Into<NodeId>, attribute: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attribute: attribute.into(),
        }
    }

    /// Parses `"node.attribute"`. The last dot separates the attribute.
    pub fn parse(text: &str) -> Option<Self> {
        let (node, attribute) = text.rsplit_once('.')?;
        if node.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Self::new(node, attribute))
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attribute)
    }
}

/// How a Dependency or DepsPath attribute is wired to upstream outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    One(AttrRef),
    Many(Vec<AttrRef>),
}

impl Binding {
    pub fn refs(&self) -> &[AttrRef] {
        match self {
            Binding::One(r) => std::slice::from_ref(r),
            Binding::Many(refs) => refs,
        }
    }
}

impl From<AttrRef> for Binding {
    fn from(r: AttrRef) -> Self {
        Binding::One(r)
    }
}

impl From<Vec<AttrRef>> for Binding {
    fn from(refs: Vec<AttrRef>) -> Self {
        Binding::Many(refs)
    }
}

/// Instantiation arguments for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: Option<String>,
    pub params: BTreeMap<String, Value>,
    pub deps: BTreeMap<String, Binding>,
    pub paths: BTreeMap<String, String>,
}

impl NodeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_dep(mut self, key: impl Into<String>, binding: impl Into<Binding>) -> Self {
        self.deps.insert(key.into(), binding.into());
        self
    }

    /// Overrides the location of a path attribute.
    pub fn with_path(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.paths.insert(key.into(), path.into());
        self
    }
}
