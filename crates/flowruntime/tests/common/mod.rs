#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{GraphModel, NodeContext, NodeError, NodeExecutor, NodeOutput, Value, WorkflowEdge, WorkflowNode};
use flowruntime::NodeRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared record of what the test executors did.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Recorder {
    fn record(&self, node_id: &str) {
        self.calls.lock().unwrap().push(node_id.to_string());
    }

    /// Node ids in invocation order, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, node_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == node_id).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Passes inputs through and adds `last` = own node id.
struct Echo {
    node_type: &'static str,
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Echo {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        let mut outputs = ctx.inputs.clone();
        outputs.insert("last".to_string(), Value::from(ctx.node_id.as_str()));
        outputs.insert("upstream_count".to_string(), Value::from(ctx.upstream.len() as u64));
        Ok(NodeOutput::from_outputs(outputs))
    }
}

/// Sleeps for `ms` (default 20) and tracks how many run at once.
struct Slow {
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Slow {
    fn node_type(&self) -> &str {
        "test.slow"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        let now = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let ms = ctx.config.get("ms").and_then(Value::as_u64).unwrap_or(20);
        tokio::time::sleep(Duration::from_millis(ms)).await;

        self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(NodeOutput::new().with_output("slept_ms", ms))
    }
}

/// Fails transiently until attempt `succeed_on`, or forever without it.
struct Flaky {
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Flaky {
    fn node_type(&self) -> &str {
        "test.flaky"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        match ctx.config.get("succeed_on").and_then(Value::as_u64) {
            Some(n) if u64::from(ctx.attempt) >= n => Ok(NodeOutput::new().with_output("attempt", u64::from(ctx.attempt))),
            _ => Err(NodeError::Transient(format!("flaky attempt {}", ctx.attempt))),
        }
    }
}

struct Failing {
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Failing {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        Err(NodeError::Permanent("always fails".to_string()))
    }
}

/// Ignores cancellation and never finishes on its own.
struct Hang {
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Hang {
    fn node_type(&self) -> &str {
        "test.hang"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(NodeOutput::new())
    }
}

struct Panicky {
    recorder: Recorder,
}

#[async_trait]
impl NodeExecutor for Panicky {
    fn node_type(&self) -> &str {
        "test.panic"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.recorder.record(&ctx.node_id);
        panic!("boom");
    }
}

/// Requires an `endpoint` config key.
struct NeedsEndpoint;

#[async_trait]
impl NodeExecutor for NeedsEndpoint {
    fn node_type(&self) -> &str {
        "test.needs_endpoint"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new())
    }

    fn required_config(&self) -> &[&str] {
        &["endpoint"]
    }
}

/// Cost is the `count` config, unbounded without it.
struct Bulk;

#[async_trait]
impl NodeExecutor for Bulk {
    fn node_type(&self) -> &str {
        "test.bulk"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new())
    }

    fn estimate_cost(&self, config: &HashMap<String, Value>) -> Option<u64> {
        Some(config.get("count").and_then(Value::as_u64).unwrap_or(u64::MAX))
    }
}

/// Reports `bytes` of memory use.
struct Memory;

#[async_trait]
impl NodeExecutor for Memory {
    fn node_type(&self) -> &str {
        "test.mem"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let bytes = ctx.config.get("bytes").and_then(Value::as_u64).unwrap_or(0);
        Ok(NodeOutput::new().with_memory_used(bytes))
    }
}

/// Writes `key` = own node id into the run variables, and reports what the
/// variable held before.
struct Variables;

#[async_trait]
impl NodeExecutor for Variables {
    fn node_type(&self) -> &str {
        "test.vars"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let previous = ctx.variable("key").await.unwrap_or_default();
        ctx.set_variable("key", ctx.node_id.as_str()).await;
        Ok(NodeOutput::new().with_output("previous", previous))
    }
}

pub fn registry(recorder: &Recorder) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    for node_type in ["trigger", "manual", "test.ok"] {
        registry
            .register(Arc::new(Echo {
                node_type,
                recorder: recorder.clone(),
            }))
            .unwrap();
    }
    registry.register(Arc::new(Slow { recorder: recorder.clone() })).unwrap();
    registry.register(Arc::new(Flaky { recorder: recorder.clone() })).unwrap();
    registry.register(Arc::new(Failing { recorder: recorder.clone() })).unwrap();
    registry.register(Arc::new(Hang { recorder: recorder.clone() })).unwrap();
    registry.register(Arc::new(Panicky { recorder: recorder.clone() })).unwrap();
    registry.register(Arc::new(NeedsEndpoint)).unwrap();
    registry.register(Arc::new(Bulk)).unwrap();
    registry.register(Arc::new(Memory)).unwrap();
    registry.register(Arc::new(Variables)).unwrap();
    Arc::new(registry)
}

pub fn node(id: &str, node_type: &str) -> WorkflowNode {
    WorkflowNode::new(id, node_type)
}

pub fn graph(nodes: Vec<WorkflowNode>, edges: &[(&str, &str)]) -> Arc<GraphModel> {
    let edges = edges.iter().map(|(s, t)| WorkflowEdge::new(*s, *t)).collect();
    Arc::new(GraphModel::new(nodes, edges).unwrap())
}
