use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .input_or_config("message")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(no message)".to_string());

        tracing::info!(node_id = %ctx.node_id, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        // Also log all inputs for visibility
        let mut keys: Vec<&String> = ctx.inputs.keys().collect();
        keys.sort();
        for key in keys {
            ctx.events.info(format!("  {}: {}", key, ctx.inputs[key]));
        }

        Ok(NodeOutput::new().with_output("message", message))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
