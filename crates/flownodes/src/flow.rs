use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, Value};
use std::collections::HashMap;

/// Iterate over the `items` input, or over `0..max_iterations` when there
/// are no items. `max_iterations` also caps item iteration. Each result is
/// also streamed as a data event on the `results` port.
pub struct LoopNode;

#[async_trait]
impl NodeExecutor for LoopNode {
    fn node_type(&self) -> &str {
        "flow.loop"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let limit = match ctx.config.get("max_iterations") {
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                NodeError::Configuration("max_iterations must be a non-negative integer".to_string())
            })?),
            None => None,
        };

        let items: Vec<Value> = match (ctx.inputs.get("items"), limit) {
            (Some(Value::Array(items)), Some(limit)) => items.iter().take(limit as usize).cloned().collect(),
            (Some(Value::Array(items)), None) => items.clone(),
            (Some(other), _) => {
                return Err(NodeError::InvalidInputType {
                    field: "items".to_string(),
                    expected: "array".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
            (None, Some(limit)) => (0..limit).map(Value::from).collect(),
            (None, None) => {
                return Err(NodeError::Configuration(
                    "flow.loop needs an items input or max_iterations".to_string(),
                ))
            }
        };

        let total = items.len();
        let mut results = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            if ctx.cancellation.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            let mut entry = HashMap::new();
            entry.insert("index".to_string(), Value::from(index as u64));
            entry.insert("item".to_string(), item);
            let entry = Value::Object(entry);
            ctx.events.data("results", entry.clone());
            results.push(entry);

            if total >= 10 && (index + 1) % (total / 10) == 0 {
                ctx.events.progress((index + 1) as f64 * 100.0 / total as f64, None);
            }
            tokio::task::yield_now().await;
        }

        Ok(NodeOutput::new()
            .with_output("count", total as u64)
            .with_output("results", results))
    }

    fn estimate_cost(&self, config: &HashMap<String, Value>) -> Option<u64> {
        // without a cap the iteration count is only known at run time
        Some(config.get("max_iterations").and_then(Value::as_u64).unwrap_or(u64::MAX))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Iterate over items or a fixed count".to_string(),
            category: "flow".to_string(),
        }
    }
}
