use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};

/// Entry-point node. Hands the run inputs to whatever follows.
pub struct TriggerNode {
    node_type: &'static str,
    required: &'static [&'static str],
    description: &'static str,
}

impl TriggerNode {
    pub fn trigger() -> Self {
        Self {
            node_type: "trigger",
            required: &[],
            description: "Generic entry point",
        }
    }

    pub fn manual() -> Self {
        Self {
            node_type: "manual",
            required: &[],
            description: "Started by hand",
        }
    }

    pub fn webhook() -> Self {
        Self {
            node_type: "webhook",
            required: &["path"],
            description: "Started by an incoming HTTP call",
        }
    }

    pub fn schedule() -> Self {
        Self {
            node_type: "schedule",
            required: &["cron"],
            description: "Started on a cron schedule",
        }
    }
}

#[async_trait]
impl NodeExecutor for TriggerNode {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events
            .info(format!("{} fired with {} input(s)", self.node_type, ctx.inputs.len()));
        Ok(NodeOutput::from_outputs(ctx.inputs))
    }

    fn required_config(&self) -> &[&str] {
        self.required
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: self.description.to_string(),
            category: "trigger".to_string(),
        }
    }
}
