use crate::{events::EventEmitter, NodeError, NodeId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Run-scoped variables shared by every node of one execution.
pub type SharedVariables = Arc<RwLock<HashMap<String, Value>>>;

/// Execution logic for one node type.
///
/// The engine gives at-least-once invocation: an executor may be called
/// again for the same node after a transient failure or timeout, so any
/// side effect that must not be applied twice has to be guarded here.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type tag this executor is registered under (e.g. "http.request").
    fn node_type(&self) -> &str;

    /// Execute one node with the given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Config keys that must be present on every node of this type.
    fn required_config(&self) -> &[&str] {
        &[]
    }

    /// Estimated work units (requests, iterations) for the given config.
    /// `None` means the type carries no notable resource cost.
    fn estimate_cost(&self, _config: &HashMap<String, Value>) -> Option<u64> {
        None
    }

    /// Descriptive metadata for listings.
    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    pub node_type: String,

    /// 1 on the first invocation, incremented on each retry.
    pub attempt: u32,

    /// Run inputs for start nodes, otherwise the merged outputs of all
    /// predecessors.
    pub inputs: HashMap<String, Value>,

    /// Outputs of each direct predecessor, keyed by its node id.
    pub upstream: HashMap<NodeId, HashMap<String, Value>>,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    pub variables: SharedVariables,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires on run cancellation or when this invocation times out.
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            attempt: 1,
            inputs: HashMap::new(),
            upstream: HashMap::new(),
            config: HashMap::new(),
            variables: Arc::new(RwLock::new(HashMap::new())),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Look up an input first, then fall back to config.
    pub fn input_or_config(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).or_else(|| self.config.get(name))
    }

    pub async fn set_variable(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.write().await.insert(key.into(), value.into());
    }

    pub async fn variable(&self, key: &str) -> Option<Value> {
        self.variables.read().await.get(key).cloned()
    }
}

/// Output from node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn from_outputs(outputs: HashMap<String, Value>) -> Self {
        Self {
            outputs,
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_memory_used(mut self, bytes: u64) -> Self {
        self.metadata.memory_used_bytes = Some(bytes);
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Filled in by the engine after the invocation returns.
    pub execution_time_ms: u64,
    pub memory_used_bytes: Option<u64>,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}
