//! Per-run state, progress counters and the final result types.

use crate::validator::ValidationResult;
use chrono::{DateTime, Utc};
use flowcore::{ErrorKind, ExecutionId, NodeError, NodeId, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failed | NodeStatus::Skipped)
    }

    fn slot(self) -> usize {
        match self {
            NodeStatus::Pending => 0,
            NodeStatus::Running => 1,
            NodeStatus::Success => 2,
            NodeStatus::Failed => 3,
            NodeStatus::Skipped => 4,
        }
    }
}

/// Runtime status of one node within one run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeExecutionState {
    pub node_id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    /// Invocations so far, including the first.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub output: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_bytes: Option<u64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub skip_reason: Option<String>,
}

impl NodeExecutionState {
    pub fn pending(node_id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: NodeStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            output: None,
            memory_used_bytes: None,
            error: None,
            error_kind: None,
            skip_reason: None,
        }
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub(crate) fn record_error(&mut self, error: &NodeError) {
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
    }
}

/// Lifecycle of one `ExecutionCore` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Validating,
    InvalidHalt,
    Resolving,
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::InvalidHalt | RunPhase::Completed | RunPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Nodes in a terminal state.
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Status counters shared between the queue (sole writer) and anyone
/// polling progress mid-run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    counts: [AtomicUsize; 5],
    total: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        let tracker = Self::default();
        tracker.reset(total);
        tracker
    }

    pub(crate) fn reset(&self, total: usize) {
        for count in &self.counts {
            count.store(0, Ordering::SeqCst);
        }
        self.counts[NodeStatus::Pending.slot()].store(total, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn transition(&self, from: NodeStatus, to: NodeStatus) {
        if from == to {
            return;
        }
        self.counts[from.slot()].fetch_sub(1, Ordering::SeqCst);
        self.counts[to.slot()].fetch_add(1, Ordering::SeqCst);
    }

    fn count(&self, status: NodeStatus) -> usize {
        self.counts[status.slot()].load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.count(NodeStatus::Pending),
            running: self.count(NodeStatus::Running),
            completed: self.count(NodeStatus::Success),
            failed: self.count(NodeStatus::Failed),
            skipped: self.count(NodeStatus::Skipped),
            total: self.total.load(Ordering::SeqCst),
        }
    }

    pub fn progress(&self) -> Progress {
        let stats = self.stats();
        let completed = stats.completed + stats.failed + stats.skipped;
        let percentage = if stats.total == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / stats.total as f64
        };
        Progress {
            completed,
            total: stats.total,
            percentage,
        }
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionDiagnostics {
    pub execution_time_ms: u64,
    /// Nodes whose executor was invoked at least once.
    pub nodes_executed: usize,
    pub nodes_succeeded: usize,
    pub nodes_failed: usize,
    pub nodes_skipped: usize,
    pub retries: u32,
    /// Failed nodes, error-severity validation issues and run-level failures.
    pub errors: usize,
    pub warnings: Vec<String>,
    pub cycles_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,
    /// Why the run as a whole failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Everything a caller gets back from one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    /// True only when every dispatched node succeeded and the run drained.
    pub success: bool,
    pub phase: RunPhase,
    pub results: HashMap<NodeId, NodeExecutionState>,
    pub diagnostics: ExecutionDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ValidationResult>,
}

impl ExecutionResult {
    pub fn state(&self, node_id: &str) -> Option<&NodeExecutionState> {
        self.results.get(node_id)
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.results.get(node_id).map(|s| s.status)
    }

    pub fn output(&self, node_id: &str, port: &str) -> Option<&Value> {
        self.results
            .get(node_id)
            .and_then(|s| s.output.as_ref())
            .and_then(|outputs| outputs.get(port))
    }
}
