use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, Value};

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input("json")?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.type_name().to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::Permanent(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output("parsed", Value::from(parsed)))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?;
        let pretty = ctx
            .config
            .get("pretty")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let json = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::Permanent(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output("json", json))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Merge static values from config into the incoming data.
pub struct SetNode;

#[async_trait]
impl NodeExecutor for SetNode {
    fn node_type(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let values = ctx
            .require_config("values")?
            .as_object()
            .ok_or_else(|| NodeError::Configuration("values must be an object".to_string()))?;

        let mut outputs = ctx.inputs.clone();
        outputs.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(NodeOutput::from_outputs(outputs))
    }

    fn required_config(&self) -> &[&str] {
        &["values"]
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Set fixed values on the data passing through".to_string(),
            category: "transform".to_string(),
        }
    }
}
