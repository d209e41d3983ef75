//! Attribute descriptors and node definitions.
//!
//! A `NodeDefinition` is the static shape of a node type: an ordered list of
//! named attributes, each tagged with exactly one `Role`. Definitions are
//! validated once, when they are built, and never change afterwards.

use crate::hashing::hash_value;
use crate::{DefinitionError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a node attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    /// Scalar or structured input value, fingerprinted by value.
    Parameter,
    /// Path to a parameter file, fingerprinted by content.
    ParamsPath,
    /// Reference to another node's output, fingerprinted through that node.
    Dependency,
    /// External input path, fingerprinted by content.
    DepsPath,
    /// Path the node writes. Must exist and be non-empty after `run`.
    OutsPath,
    /// In-memory output value stored by the engine.
    OutsValue,
    /// Tabular output with `x` and `y` columns.
    Plot { x: String, y: String },
}

impl Role {
    pub fn is_output(&self) -> bool {
        matches!(self, Role::OutsPath | Role::OutsValue | Role::Plot { .. })
    }

    /// Outputs persisted by the artifact store rather than by the node.
    pub fn is_stored_value(&self) -> bool {
        matches!(self, Role::OutsValue | Role::Plot { .. })
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Role::ParamsPath | Role::DepsPath | Role::OutsPath)
    }

    /// Roles that may be bound to another node's output at instantiation.
    pub fn accepts_reference(&self) -> bool {
        matches!(self, Role::Dependency | Role::DepsPath)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Parameter => "params",
            Role::ParamsPath => "params_path",
            Role::Dependency => "deps",
            Role::DepsPath => "deps_path",
            Role::OutsPath => "outs_path",
            Role::OutsValue => "outs",
            Role::Plot { .. } => "plots",
        }
    }
}

/// Declaration of one attribute of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub role: Role,
    pub default: Option<Value>,
    pub path_template: Option<String>,
}

impl AttributeDescriptor {
    fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            default: None,
            path_template: None,
        }
    }

    pub fn params(name: impl Into<String>, default: Option<Value>) -> Self {
        Self {
            default,
            ..Self::new(name, Role::Parameter)
        }
    }

    pub fn params_path(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            path_template: path,
            ..Self::new(name, Role::ParamsPath)
        }
    }

    pub fn deps(name: impl Into<String>) -> Self {
        Self::new(name, Role::Dependency)
    }

    pub fn deps_path(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            path_template: path,
            ..Self::new(name, Role::DepsPath)
        }
    }

    pub fn outs_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path_template: Some(path.into()),
            ..Self::new(name, Role::OutsPath)
        }
    }

    pub fn outs(name: impl Into<String>) -> Self {
        Self::new(name, Role::OutsValue)
    }

    pub fn plots(name: impl Into<String>, x: impl Into<String>, y: impl Into<String>) -> Self {
        Self::new(
            name,
            Role::Plot {
                x: x.into(),
                y: y.into(),
            },
        )
    }
}

/// Static shape of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    name: String,
    version: Option<String>,
    attributes: Vec<AttributeDescriptor>,
    identity: String,
}

impl NodeDefinition {
    pub fn builder(name: impl Into<String>) -> NodeDefinitionBuilder {
        NodeDefinitionBuilder {
            name: name.into(),
            version: None,
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Hash of name, version and attributes. Part of every fingerprint.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn with_role<'a>(&'a self, pred: impl Fn(&Role) -> bool + 'a) -> impl Iterator<Item = &'a AttributeDescriptor> + 'a {
        self.attributes.iter().filter(move |a| pred(&a.role))
    }
}

pub struct NodeDefinitionBuilder {
    name: String,
    version: Option<String>,
    attributes: Vec<AttributeDescriptor>,
}

impl NodeDefinitionBuilder {
    /// Code identity marker. Bump it when `run` changes behaviour.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn param(self, name: &str, default: impl Into<Value>) -> Self {
        self.attribute(AttributeDescriptor::params(name, Some(default.into())))
    }

    /// Parameter that must be given at instantiation.
    pub fn required_param(self, name: &str) -> Self {
        self.attribute(AttributeDescriptor::params(name, None))
    }

    pub fn params_path(self, name: &str, path: Option<&str>) -> Self {
        self.attribute(AttributeDescriptor::params_path(name, path.map(str::to_string)))
    }

    pub fn deps(self, name: &str) -> Self {
        self.attribute(AttributeDescriptor::deps(name))
    }

    pub fn deps_path(self, name: &str, path: Option<&str>) -> Self {
        self.attribute(AttributeDescriptor::deps_path(name, path.map(str::to_string)))
    }

    pub fn outs_path(self, name: &str, path: &str) -> Self {
        self.attribute(AttributeDescriptor::outs_path(name, path))
    }

    pub fn outs(self, name: &str) -> Self {
        self.attribute(AttributeDescriptor::outs(name))
    }

    pub fn plots(self, name: &str, x: &str, y: &str) -> Self {
        self.attribute(AttributeDescriptor::plots(name, x, y))
    }

    pub fn build(self) -> Result<NodeDefinition, DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if !seen.insert(attr.name.as_str()) {
                return Err(DefinitionError::DuplicateAttribute {
                    definition: self.name.clone(),
                    attribute: attr.name.clone(),
                });
            }
            match &attr.role {
                Role::Parameter => {
                    if let Some(reason) = attr.default.as_ref().and_then(Value::find_unhashable) {
                        return Err(DefinitionError::UnhashableDefault {
                            attribute: attr.name.clone(),
                            reason,
                        });
                    }
                }
                Role::Plot { x, y } if x.is_empty() || y.is_empty() => {
                    return Err(DefinitionError::InvalidPlotAxes {
                        attribute: attr.name.clone(),
                    });
                }
                _ => {}
            }
        }

        let identity = hash_value(&(&self.name, &self.version, &self.attributes)).map_err(|e| {
            DefinitionError::UnhashableDefault {
                attribute: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(NodeDefinition {
            name: self.name,
            version: self.version,
            attributes: self.attributes,
            identity,
        })
    }
}
