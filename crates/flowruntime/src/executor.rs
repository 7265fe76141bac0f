use crate::options::ExecutionOptions;
use crate::queue::{ExecutionQueue, Termination};
use crate::registry::NodeRegistry;
use crate::state::{
    ExecutionDiagnostics, ExecutionResult, NodeExecutionState, NodeStatus, Progress,
    ProgressTracker, QueueStats, RunPhase,
};
use crate::validator::{ValidationResult, Validator, ValidatorConfig};
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionEvent, ExecutionId, ExecutionObserver, FlowError, GraphModel, NodeId,
    NoopObserver, Value,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a run as a whole did not complete.
#[derive(Debug, Clone, PartialEq)]
enum RunFailure {
    Invalid,
    NoStartNode,
    Cancelled,
    TimedOut(u64),
    Fault(String),
}

impl RunFailure {
    /// Failures not already visible as failed nodes or validation errors.
    fn is_engine_error(&self) -> bool {
        matches!(self, RunFailure::NoStartNode | RunFailure::Fault(_))
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Invalid => f.write_str("workflow failed validation"),
            RunFailure::NoStartNode => f.write_str(
                "workflow has no start node: it needs a trigger, webhook, schedule or manual node without incoming edges",
            ),
            RunFailure::Cancelled => f.write_str("run cancelled"),
            RunFailure::TimedOut(ms) => write!(f, "run timed out after {}ms", ms),
            RunFailure::Fault(message) => write!(f, "engine fault: {}", message),
        }
    }
}

/// Orchestrates one run of one graph:
/// `Idle -> Validating -> (InvalidHalt | Resolving) -> Running -> (Completed | Failed)`.
///
/// An instance runs at most once. It can be shared behind an `Arc` so other
/// tasks can poll progress or cancel while [`ExecutionCore::execute`] is
/// in flight.
pub struct ExecutionCore {
    graph: Arc<GraphModel>,
    registry: Arc<NodeRegistry>,
    options: ExecutionOptions,
    validator_config: ValidatorConfig,
    event_bus: Arc<EventBus>,
    observer: Arc<dyn ExecutionObserver>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    phase: watch::Sender<RunPhase>,
    claimed: AtomicBool,
    execution_id: ExecutionId,
    name: String,
}

impl ExecutionCore {
    pub fn new(graph: Arc<GraphModel>, registry: Arc<NodeRegistry>, options: ExecutionOptions) -> Self {
        let progress = Arc::new(ProgressTracker::new(graph.node_count()));
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            graph,
            registry,
            options,
            validator_config: ValidatorConfig::default(),
            event_bus: Arc::new(EventBus::default()),
            observer: Arc::new(NoopObserver),
            progress,
            cancel: CancellationToken::new(),
            phase,
            claimed: AtomicBool::new(false),
            execution_id: Uuid::new_v4(),
            name: String::from("workflow"),
        }
    }

    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.validator_config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Tie this run to an outside cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn get_progress(&self) -> Progress {
        self.progress.progress()
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        self.progress.stats()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the graph to completion. Never fails: engine faults, panics
    /// included, come back as a `Failed` result.
    pub async fn execute(&self, inputs: HashMap<String, Value>) -> ExecutionResult {
        let started = Instant::now();

        if self.claimed.swap(true, Ordering::SeqCst) {
            tracing::error!(execution_id = %self.execution_id, "Execution core reused");
            let states = self.skipped_states("execution core has already run");
            return self.finish(
                RunPhase::Failed,
                states,
                None,
                Some(RunFailure::Fault("execution core has already run".to_string())),
                started,
            );
        }

        tracing::info!(
            execution_id = %self.execution_id,
            workflow = %self.name,
            nodes = self.graph.node_count(),
            "Starting workflow execution"
        );
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id: self.execution_id,
            workflow: self.name.clone(),
            total_nodes: self.graph.node_count(),
            timestamp: Utc::now(),
        });

        let result = match AssertUnwindSafe(self.drive(inputs, started)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => self.fault_result(fault.to_string(), started),
            Err(_) => self.fault_result("orchestration panicked".to_string(), started),
        };

        tracing::info!(
            execution_id = %self.execution_id,
            success = result.success,
            phase = ?result.phase,
            duration_ms = result.diagnostics.execution_time_ms,
            nodes_executed = result.diagnostics.nodes_executed,
            "Workflow execution finished"
        );
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id: self.execution_id,
            success: result.success,
            duration_ms: result.diagnostics.execution_time_ms,
            timestamp: Utc::now(),
        });
        result
    }

    async fn drive(
        &self,
        inputs: HashMap<String, Value>,
        started: Instant,
    ) -> Result<ExecutionResult, FlowError> {
        let mut validation = None;
        if self.options.validate_before_execution {
            self.transition(RunPhase::Validating);
            let report = Validator::with_config(Arc::clone(&self.registry), self.validator_config.clone())
                .validate(&self.graph);
            for warning in report.warnings() {
                tracing::warn!(node_id = ?warning.node_id, "{}", warning.message);
            }
            if !report.valid {
                for error in report.errors() {
                    tracing::error!(node_id = ?error.node_id, "{}", error.message);
                }
                self.transition(RunPhase::InvalidHalt);
                let states = self.halt("workflow failed validation");
                return Ok(self.finish(
                    RunPhase::InvalidHalt,
                    states,
                    Some(report),
                    Some(RunFailure::Invalid),
                    started,
                ));
            }
            validation = Some(report);
        }

        self.transition(RunPhase::Resolving);
        let start_nodes: Vec<NodeId> = match &validation {
            Some(report) => report.start_nodes.clone(),
            None => self.graph.start_nodes(),
        };
        if start_nodes.is_empty() {
            tracing::error!("No start node, nothing to run");
            self.transition(RunPhase::Failed);
            let states = self.halt("workflow has no start node");
            return Ok(self.finish(
                RunPhase::Failed,
                states,
                validation,
                Some(RunFailure::NoStartNode),
                started,
            ));
        }

        self.transition(RunPhase::Running);
        let mut queue = ExecutionQueue::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.registry),
            self.options.clone(),
        )
        .with_event_bus(Arc::clone(&self.event_bus), self.execution_id)
        .with_progress(Arc::clone(&self.progress))
        .with_inputs(inputs);

        let queued = queue.enqueue(&start_nodes);
        if queued == 0 {
            return Err(FlowError::Execution(
                "start nodes resolved but none could be queued".to_string(),
            ));
        }

        let outcome = queue.process_queue(self.observer.as_ref(), &self.cancel).await;
        let failure = match outcome.termination {
            Termination::Drained => None,
            Termination::Cancelled => Some(RunFailure::Cancelled),
            Termination::TimedOut => Some(RunFailure::TimedOut(
                self.options.run_timeout_ms.unwrap_or_default(),
            )),
        };
        let phase = if failure.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Completed
        };
        self.transition(phase);
        Ok(self.finish(phase, outcome.states, validation, failure, started))
    }

    fn transition(&self, phase: RunPhase) {
        tracing::debug!(execution_id = %self.execution_id, ?phase, "Run phase");
        self.phase.send_replace(phase);
    }

    /// Every node skipped, for runs that never got to the queue.
    fn skipped_states(&self, reason: &str) -> HashMap<NodeId, NodeExecutionState> {
        self.graph
            .list_nodes()
            .iter()
            .map(|node| {
                let mut state = NodeExecutionState::pending(node.id.clone(), node.node_type.clone());
                state.status = NodeStatus::Skipped;
                state.skip_reason = Some(reason.to_string());
                (node.id.clone(), state)
            })
            .collect()
    }

    fn halt(&self, reason: &str) -> HashMap<NodeId, NodeExecutionState> {
        self.progress.reset(self.graph.node_count());
        for _ in self.graph.list_nodes() {
            self.progress.transition(NodeStatus::Pending, NodeStatus::Skipped);
        }
        self.skipped_states(reason)
    }

    fn fault_result(&self, message: String, started: Instant) -> ExecutionResult {
        tracing::error!(execution_id = %self.execution_id, "Engine fault: {}", message);
        self.transition(RunPhase::Failed);
        let states = self.halt("engine fault");
        self.finish(
            RunPhase::Failed,
            states,
            None,
            Some(RunFailure::Fault(message)),
            started,
        )
    }

    fn finish(
        &self,
        phase: RunPhase,
        results: HashMap<NodeId, NodeExecutionState>,
        validation: Option<ValidationResult>,
        failure: Option<RunFailure>,
        started: Instant,
    ) -> ExecutionResult {
        let diagnostics = build_diagnostics(
            &self.graph,
            &results,
            validation.as_ref(),
            failure.as_ref(),
            started.elapsed().as_millis() as u64,
        );
        let success = phase == RunPhase::Completed && failure.is_none() && diagnostics.nodes_failed == 0;

        ExecutionResult {
            execution_id: self.execution_id,
            success,
            phase,
            results,
            diagnostics,
            validation_result: validation,
        }
    }
}

fn build_diagnostics(
    graph: &GraphModel,
    results: &HashMap<NodeId, NodeExecutionState>,
    validation: Option<&ValidationResult>,
    failure: Option<&RunFailure>,
    execution_time_ms: u64,
) -> ExecutionDiagnostics {
    let count = |status: NodeStatus| results.values().filter(|s| s.status == status).count();
    let nodes_failed = count(NodeStatus::Failed);

    let mut warnings: Vec<String> = validation
        .map(|v| v.warnings().map(|i| i.message.clone()).collect())
        .unwrap_or_default();
    // declaration order keeps the list stable between runs
    for node in graph.list_nodes() {
        if let Some(state) = results.get(&node.id) {
            if let (NodeStatus::Skipped, Some(reason)) = (state.status, &state.skip_reason) {
                warnings.push(format!("Node {} skipped: {}", node.id, reason));
            }
        }
    }

    let memory: Vec<u64> = results.values().filter_map(|s| s.memory_used_bytes).collect();
    let memory_usage_mb = if memory.is_empty() {
        None
    } else {
        Some(memory.iter().sum::<u64>() as f64 / (1024.0 * 1024.0))
    };

    let validation_errors = validation.map_or(0, |v| v.errors().count());
    let engine_errors = usize::from(failure.is_some_and(RunFailure::is_engine_error));

    ExecutionDiagnostics {
        execution_time_ms,
        nodes_executed: results.values().filter(|s| s.attempts > 0).count(),
        nodes_succeeded: count(NodeStatus::Success),
        nodes_failed,
        nodes_skipped: count(NodeStatus::Skipped),
        retries: results.values().map(NodeExecutionState::retries).sum(),
        errors: nodes_failed + validation_errors + engine_errors,
        warnings,
        cycles_detected: validation.map_or(0, |v| v.cycles.len()),
        memory_usage_mb,
        failure: failure.map(ToString::to_string),
    }
}
