//! Core abstractions for the flow engine
//!
//! This crate provides the graph model, the executor contract and the
//! event types that the runtime and node library build on. It contains no
//! scheduling logic.

mod error;
pub mod events;
mod node;
mod value;
mod workflow;

pub use error::{ErrorKind, FlowError, NodeError, RegistryError, WorkflowError};
pub use events::*;
pub use node::{ExecutorMetadata, NodeContext, NodeExecutor, NodeMetadata, NodeOutput, SharedVariables};
pub use value::Value;
pub use workflow::{
    is_trigger_type, GraphModel, NodeId, RetryPolicy, Workflow, WorkflowEdge, WorkflowNode,
    TRIGGER_TYPES,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
