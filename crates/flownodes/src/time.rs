use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, Value};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .get_config_or("delay_ms", Value::Number(1000.0))
            .as_u64()
            .ok_or_else(|| NodeError::Configuration("delay_ms must be a non-negative integer".to_string()))?;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through any inputs
        Ok(NodeOutput::from_outputs(ctx.inputs))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
