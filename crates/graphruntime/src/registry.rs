use graphcore::{DefinitionError, Node, NodeDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances by type name
///
/// Used when a pipeline is declared in a file rather than in code.
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node
    fn create(&self) -> Arc<dyn Node>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance from a node type
    pub fn create_node(&self, node_type: &str) -> Result<Arc<dyn Node>, DefinitionError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| DefinitionError::UnknownNodeType(node_type.to_string()))?;
        Ok(factory.create())
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Definitions seen by a project, keyed by definition name.
///
/// Each node type is described once; a later instance whose definition has
/// the same name but a different shape is rejected.
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<NodeDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, node: &dyn Node) -> Result<Arc<NodeDefinition>, DefinitionError> {
        let definition = node.definition()?;
        if let Some(existing) = self.definitions.get(definition.name()) {
            if existing.identity() != definition.identity() {
                return Err(DefinitionError::ConflictingDefinition {
                    name: definition.name().to_string(),
                });
            }
            return Ok(Arc::clone(existing));
        }
        let definition = Arc::new(definition);
        self.definitions
            .insert(definition.name().to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<NodeDefinition>> {
        self.definitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
