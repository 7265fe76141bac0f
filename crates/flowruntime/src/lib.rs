//! Workflow execution runtime
//!
//! Validates workflow graphs, schedules their nodes with bounded
//! concurrency, retries and timeouts, and reports per-node state and run
//! diagnostics.

mod executor;
mod options;
mod queue;
mod registry;
mod runtime;
mod state;
mod validator;

pub use executor::ExecutionCore;
pub use options::ExecutionOptions;
pub use queue::{ExecutionQueue, QueueOutcome, Termination};
pub use registry::NodeRegistry;
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use state::{
    ExecutionDiagnostics, ExecutionResult, NodeExecutionState, NodeStatus, Progress,
    ProgressTracker, QueueStats, RunPhase,
};
pub use validator::{
    IssueKind, Severity, ValidationIssue, ValidationResult, Validator, ValidatorConfig,
};
