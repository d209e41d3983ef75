use async_trait::async_trait;
use graphcore::{DefinitionError, Node, NodeContext, NodeDefinition, NodeError};
use graphruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Emits its `message` parameter as an output value
pub struct Echo;

#[async_trait]
impl Node for Echo {
    fn definition(&self) -> Result<NodeDefinition, DefinitionError> {
        NodeDefinition::builder("Echo").param("message", "").outs("message").build()
    }

    async fn run(&self, ctx: &mut NodeContext) -> Result<(), NodeError> {
        let message = ctx.param_str("message")?.to_string();
        ctx.events.info(format!("echo: {}", message));
        ctx.set_output("message", message);
        Ok(())
    }
}

pub struct EchoFactory;

impl NodeFactory for EchoFactory {
    fn create(&self) -> Arc<dyn Node> {
        Arc::new(Echo)
    }

    fn node_type(&self) -> &str {
        "echo"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Outputs its message parameter".to_string(),
            category: "debug".to_string(),
        }
    }
}
