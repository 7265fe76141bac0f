use crate::options::ExecutionOptions;
use crate::registry::NodeRegistry;
use crate::state::ExecutionResult;
use crate::validator::{ValidationResult, Validator, ValidatorConfig};
use crate::ExecutionCore;
use flowcore::{EventBus, ExecutionEvent, FlowError, GraphModel, Value, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Entry point for callers: owns the registry, configuration and event bus,
/// and hands out one [`ExecutionCore`] per run.
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a runtime with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            config,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn validator(&self) -> Validator {
        Validator::with_config(Arc::clone(&self.registry), self.config.validator.clone())
    }

    /// Validate a workflow definition without running it.
    pub fn validate(&self, workflow: &Workflow) -> Result<ValidationResult, FlowError> {
        let graph = GraphModel::from_workflow(workflow)?;
        Ok(self.validator().validate(&graph))
    }

    /// Prepare a run with the runtime's default options. Use this when the
    /// caller wants to observe, poll or cancel the run.
    pub fn execution(&self, workflow: &Workflow) -> Result<ExecutionCore, FlowError> {
        self.execution_with(workflow, self.config.options.clone())
    }

    pub fn execution_with(
        &self,
        workflow: &Workflow,
        options: ExecutionOptions,
    ) -> Result<ExecutionCore, FlowError> {
        let graph = Arc::new(GraphModel::from_workflow(workflow)?);
        Ok(ExecutionCore::new(graph, Arc::clone(&self.registry), options)
            .with_validator_config(self.config.validator.clone())
            .with_event_bus(Arc::clone(&self.event_bus))
            .with_name(workflow.name.clone()))
    }

    /// Execute a workflow directly. Only a malformed definition (duplicate
    /// node ids) is an `Err`; everything else is reported in the result.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        Ok(self.execution(workflow)?.execute(inputs).await)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub options: ExecutionOptions,
    pub validator: ValidatorConfig,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    /// Defaults with execution options taken from `FLOW_*` variables.
    pub fn from_env() -> Self {
        Self {
            options: ExecutionOptions::from_env(),
            ..Self::default()
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            options: ExecutionOptions::default(),
            validator: ValidatorConfig::default(),
            event_buffer_size: 1000,
        }
    }
}
