use async_trait::async_trait;
use graphcore::{DefinitionError, Node, NodeContext, NodeDefinition, NodeError, Value};
use graphruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Parse a JSON file into an output value
pub struct JsonRead;

#[async_trait]
impl Node for JsonRead {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("JsonRead")
            .deps_path("source", None)
            .outs("value")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let source = ctx.path("source")?.to_path_buf();
        let text = tokio::fs::read_to_string(&source).await?;
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error in {}: {}", source.display(), e)))?;

        ctx.set_output("value", Value::from(parsed));
        Ok(())
    }
}

/// Write a dependency value to a JSON file
pub struct JsonWrite;

#[async_trait]
impl Node for JsonWrite {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("JsonWrite")
            .deps("value")
            .outs_path("target", "{nwd}/value.json")
            .build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let json = serde_json::to_string_pretty(&ctx.dep("value")?.to_json())
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;
        let target = ctx.path("target")?;
        tokio::fs::write(target, json).await?;
        Ok(())
    }
}

pub struct JsonReadFactory;

impl NodeFactory for JsonReadFactory {
    fn create(&self) -> Arc<dyn Node> {
        Arc::new(JsonRead)
    }

    fn node_type(&self) -> &str {
        "json.read"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Read a JSON file".to_string(),
            category: "json".to_string(),
        }
    }
}

pub struct JsonWriteFactory;

impl NodeFactory for JsonWriteFactory {
    fn create(&self) -> Arc<dyn Node> {
        Arc::new(JsonWrite)
    }

    fn node_type(&self) -> &str {
        "json.write"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Write a value to a JSON file".to_string(),
            category: "json".to_string(),
        }
    }
}
