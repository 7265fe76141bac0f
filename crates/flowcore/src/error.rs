use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-level failures. Anything surfacing as a `FlowError` during a run
/// is an engine fault, never a node failure.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Whether a failed invocation may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// Failure reported by (or on behalf of) a node executor.
///
/// Executors pick the variant; the queue never inspects messages to decide
/// whether to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Retryable failure (network blip, upstream 5xx, rate limiting).
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Failure that will not go away on retry.
    #[error("Execution failed: {0}")]
    Permanent(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Transient(_) | NodeError::Timeout { .. } => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
}

/// Rejected executor registrations.
#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Node type must not be empty")]
    EmptyType,

    #[error("Node type already registered: {0}")]
    Duplicate(String),
}
