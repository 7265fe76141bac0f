//! Dependency-aware ready queue with bounded concurrency and retries.
//!
//! The scheduling loop in [`ExecutionQueue::process_queue`] is the only
//! writer of node state. Node invocations run as spawned tasks and report
//! back through a `JoinSet`; they never see any state but their own context.

use crate::options::ExecutionOptions;
use crate::registry::NodeRegistry;
use crate::state::{NodeExecutionState, NodeStatus, ProgressTracker, QueueStats};
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionEvent, ExecutionId, ExecutionObserver, GraphModel, NodeContext, NodeError,
    NodeExecutor, NodeId, NodeOutput, SharedVariables, Value, WorkflowNode,
};
use futures::FutureExt;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How the queue stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing left to run.
    Drained,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct QueueOutcome {
    pub termination: Termination,
    pub states: HashMap<NodeId, NodeExecutionState>,
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    sequence: u64,
    node_id: NodeId,
}

impl Ord for ReadyEntry {
    // max-heap: higher priority first, then lower sequence (FIFO)
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TaskOutcome {
    node_id: NodeId,
    result: Result<NodeOutput, NodeError>,
    duration_ms: u64,
}

pub struct ExecutionQueue {
    graph: Arc<GraphModel>,
    registry: Arc<NodeRegistry>,
    options: ExecutionOptions,
    execution_id: ExecutionId,
    event_bus: Arc<EventBus>,
    progress: Arc<ProgressTracker>,
    inputs: HashMap<String, Value>,
    variables: SharedVariables,

    states: HashMap<NodeId, NodeExecutionState>,
    /// Predecessors of each node that have not succeeded yet.
    unmet: HashMap<NodeId, usize>,
    reachable: HashSet<NodeId>,
    ready: BinaryHeap<ReadyEntry>,
    retrying: HashSet<NodeId>,
    sequence: u64,
    cancelled: bool,
}

impl ExecutionQueue {
    pub fn new(graph: Arc<GraphModel>, registry: Arc<NodeRegistry>, options: ExecutionOptions) -> Self {
        let mut states = HashMap::with_capacity(graph.node_count());
        let mut unmet = HashMap::with_capacity(graph.node_count());
        for node in graph.list_nodes() {
            states.insert(
                node.id.clone(),
                NodeExecutionState::pending(node.id.clone(), node.node_type.clone()),
            );
            unmet.insert(node.id.clone(), graph.predecessors(&node.id).len());
        }
        let progress = Arc::new(ProgressTracker::new(graph.node_count()));

        Self {
            graph,
            registry,
            options,
            execution_id: Uuid::new_v4(),
            event_bus: Arc::new(EventBus::new(64)),
            progress,
            inputs: HashMap::new(),
            variables: SharedVariables::default(),
            states,
            unmet,
            reachable: HashSet::new(),
            ready: BinaryHeap::new(),
            retrying: HashSet::new(),
            sequence: 0,
            cancelled: false,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>, execution_id: ExecutionId) -> Self {
        self.event_bus = event_bus;
        self.execution_id = execution_id;
        self
    }

    /// Share progress counters with an outside poller.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        progress.reset(self.graph.node_count());
        self.progress = progress;
        self
    }

    /// Inputs handed to start nodes.
    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_variables(mut self, variables: SharedVariables) -> Self {
        self.variables = variables;
        self
    }

    /// Seed the ready queue. Nodes with unmet dependencies are not queued.
    /// Returns the number of nodes queued.
    pub fn enqueue(&mut self, start_nodes: &[NodeId]) -> usize {
        let mut frontier: VecDeque<&str> = VecDeque::new();
        for id in start_nodes {
            if self.graph.contains(id) && self.reachable.insert(id.clone()) {
                frontier.push_back(id);
            }
        }
        while let Some(id) = frontier.pop_front() {
            for next in self.graph.successors(id) {
                if self.reachable.insert(next.to_string()) {
                    frontier.push_back(next);
                }
            }
        }

        let mut in_ready: HashSet<NodeId> = self.ready.iter().map(|e| e.node_id.clone()).collect();
        let mut queued = 0;
        for id in start_nodes {
            if self.unmet.get(id) != Some(&0) {
                tracing::warn!(node_id = %id, "Not enqueued: node has unmet dependencies or does not exist");
                continue;
            }
            if self.status(id) == Some(NodeStatus::Pending) && in_ready.insert(id.clone()) {
                self.push_ready(id.clone());
                queued += 1;
            }
        }
        queued
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        self.progress.stats()
    }

    pub fn states(&self) -> &HashMap<NodeId, NodeExecutionState> {
        &self.states
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.states.get(node_id).map(|s| s.status)
    }

    /// Drain the queue. Resolves once nothing is ready, running or waiting
    /// for a retry, or when the run is cancelled or times out.
    pub async fn process_queue(
        &mut self,
        observer: &dyn ExecutionObserver,
        cancel: &CancellationToken,
    ) -> QueueOutcome {
        let concurrency = self.options.concurrency();
        let deadline = self.options.run_timeout().map(|d| Instant::now() + d);
        let mut running: JoinSet<TaskOutcome> = JoinSet::new();
        let mut delayed: JoinSet<NodeId> = JoinSet::new();
        let mut termination = Termination::Drained;

        loop {
            if !self.cancelled && cancel.is_cancelled() {
                termination = Termination::Cancelled;
                self.begin_cancel(&mut delayed, observer);
            }
            if !self.cancelled {
                while running.len() < concurrency {
                    let Some(entry) = self.ready.pop() else {
                        break;
                    };
                    self.dispatch(entry.node_id, &mut running, observer, cancel);
                }
            }

            if running.is_empty() && delayed.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = wait_until(deadline) => {
                    termination = Termination::TimedOut;
                    running.abort_all();
                    delayed.abort_all();
                    break;
                }

                _ = cancel.cancelled(), if !self.cancelled => {
                    termination = Termination::Cancelled;
                    self.begin_cancel(&mut delayed, observer);
                }

                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok(outcome) => self.complete(outcome, &mut delayed, observer),
                        Err(e) => tracing::error!("Node task failed to join: {}", e),
                    }
                }

                Some(joined) = delayed.join_next(), if !delayed.is_empty() => {
                    if let Ok(node_id) = joined {
                        self.retrying.remove(&node_id);
                        if self.cancelled {
                            self.skip(&node_id, "run cancelled before the retry started", observer);
                        } else {
                            self.push_ready(node_id);
                        }
                    }
                }

                else => break,
            }
        }

        if termination == Termination::TimedOut {
            self.fail_unfinished(observer);
        } else {
            self.finalize(observer);
        }

        QueueOutcome {
            termination,
            states: self.states.clone(),
        }
    }

    fn begin_cancel(&mut self, delayed: &mut JoinSet<NodeId>, observer: &dyn ExecutionObserver) {
        tracing::warn!("Run cancelled, no further nodes will start");
        self.cancelled = true;
        drop(std::mem::take(delayed));
        self.abandon_retries(observer);
        self.skip_ready(observer);
    }

    fn push_ready(&mut self, node_id: NodeId) {
        let priority = self
            .graph
            .get_node(&node_id)
            .and_then(|n| n.priority)
            .unwrap_or(0);
        self.sequence += 1;
        self.ready.push(ReadyEntry {
            priority,
            sequence: self.sequence,
            node_id,
        });
    }

    fn dispatch(
        &mut self,
        node_id: NodeId,
        running: &mut JoinSet<TaskOutcome>,
        observer: &dyn ExecutionObserver,
        cancel: &CancellationToken,
    ) {
        let graph = Arc::clone(&self.graph);
        let Some(node) = graph.get_node(&node_id) else {
            return;
        };
        let Some(executor) = self.registry.get(&node.node_type) else {
            let error = NodeError::UnknownNodeType(node.node_type.clone());
            self.set_status(&node_id, NodeStatus::Failed);
            if let Some(state) = self.states.get_mut(&node_id) {
                state.record_error(&error);
                state.finished_at = Some(Utc::now());
            }
            self.report_failure(&node_id, &error, observer);
            self.cascade_skip(&node_id, observer);
            return;
        };

        self.set_status(&node_id, NodeStatus::Running);
        let attempt = match self.states.get_mut(&node_id) {
            Some(state) => {
                state.attempts += 1;
                state.started_at.get_or_insert_with(Utc::now);
                state.attempts
            }
            None => 1,
        };

        tracing::debug!(node_id = %node_id, node_type = %node.node_type, attempt, "Dispatching node");
        observer.on_node_start(&node_id);
        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: node_id.clone(),
            node_type: node.node_type.clone(),
            attempt,
            timestamp: Utc::now(),
        });

        let token = cancel.child_token();
        let ctx = self.build_context(node, attempt, token.clone());
        let timeout = self.options.node_timeout_for(node);
        running.spawn(invoke(executor, ctx, node_id, timeout, token));
    }

    fn build_context(&self, node: &WorkflowNode, attempt: u32, cancellation: CancellationToken) -> NodeContext {
        let predecessors = self.graph.predecessors(&node.id);
        let mut upstream = HashMap::with_capacity(predecessors.len());
        let mut inputs = HashMap::new();

        if predecessors.is_empty() {
            inputs = self.inputs.clone();
        }
        for pred in predecessors {
            if let Some(outputs) = self.states.get(pred).and_then(|s| s.output.as_ref()) {
                inputs.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                upstream.insert(pred.to_string(), outputs.clone());
            }
        }

        NodeContext {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            attempt,
            inputs,
            upstream,
            config: node.config.clone(),
            variables: Arc::clone(&self.variables),
            events: self.event_bus.create_emitter(self.execution_id, node.id.clone()),
            cancellation,
        }
    }

    fn complete(&mut self, outcome: TaskOutcome, delayed: &mut JoinSet<NodeId>, observer: &dyn ExecutionObserver) {
        let TaskOutcome {
            node_id,
            result,
            duration_ms,
        } = outcome;

        match result {
            Ok(mut output) => {
                output.metadata.execution_time_ms = duration_ms;
                tracing::info!(node_id = %node_id, duration_ms, "Node completed");
                self.set_status(&node_id, NodeStatus::Success);
                if let Some(state) = self.states.get_mut(&node_id) {
                    state.finished_at = Some(Utc::now());
                    state.duration_ms = Some(duration_ms);
                    state.output = Some(output.outputs.clone());
                    state.memory_used_bytes = output.metadata.memory_used_bytes;
                    state.error = None;
                    state.error_kind = None;
                }
                observer.on_node_complete(&node_id, &output);
                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id: self.execution_id,
                    node_id: node_id.clone(),
                    outputs: output.outputs,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                self.release_dependents(&node_id, observer);
            }
            Err(error) => {
                let attempts = self.states.get(&node_id).map_or(0, |s| s.attempts);
                let policy = match self.graph.get_node(&node_id) {
                    Some(node) => self.options.retry_policy_for(node),
                    None => Default::default(),
                };

                if error.is_transient() && attempts <= policy.max_retries && !self.cancelled {
                    let delay_ms = policy.delay_for(attempts);
                    tracing::warn!(
                        node_id = %node_id,
                        attempt = attempts,
                        delay_ms,
                        "Transient failure, retrying: {}",
                        error
                    );
                    self.set_status(&node_id, NodeStatus::Pending);
                    if let Some(state) = self.states.get_mut(&node_id) {
                        state.record_error(&error);
                    }
                    observer.on_node_retry(&node_id, attempts + 1, &error);
                    self.event_bus.emit(ExecutionEvent::NodeRetrying {
                        execution_id: self.execution_id,
                        node_id: node_id.clone(),
                        attempt: attempts + 1,
                        delay_ms,
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    });
                    self.retrying.insert(node_id.clone());
                    delayed.spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        node_id
                    });
                    return;
                }

                self.set_status(&node_id, NodeStatus::Failed);
                if let Some(state) = self.states.get_mut(&node_id) {
                    state.record_error(&error);
                    state.finished_at = Some(Utc::now());
                    state.duration_ms = Some(duration_ms);
                }
                self.report_failure(&node_id, &error, observer);
                self.cascade_skip(&node_id, observer);
            }
        }
    }

    fn report_failure(&self, node_id: &str, error: &NodeError, observer: &dyn ExecutionObserver) {
        tracing::error!(node_id = %node_id, kind = ?error.kind(), "Node failed: {}", error);
        observer.on_node_error(node_id, error);
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Queue every successor whose predecessors have now all succeeded.
    fn release_dependents(&mut self, node_id: &str, observer: &dyn ExecutionObserver) {
        let graph = Arc::clone(&self.graph);
        for next in graph.successors(node_id) {
            let Some(count) = self.unmet.get_mut(next) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && self.status(next) == Some(NodeStatus::Pending) {
                if self.cancelled {
                    self.skip(next, "run cancelled before the node started", observer);
                } else {
                    self.push_ready(next.to_string());
                }
            }
        }
    }

    /// Skip everything downstream of a failed node that has not started.
    fn cascade_skip(&mut self, failed: &str, observer: &dyn ExecutionObserver) {
        let graph = Arc::clone(&self.graph);
        let reason = format!("upstream node {} failed", failed);
        let mut frontier: VecDeque<&str> = graph.successors(failed).into();
        while let Some(id) = frontier.pop_front() {
            if self.status(id) != Some(NodeStatus::Pending) || self.retrying.contains(id) {
                continue;
            }
            self.skip(id, &reason, observer);
            frontier.extend(graph.successors(id));
        }
    }

    fn skip(&mut self, node_id: &str, reason: &str, observer: &dyn ExecutionObserver) {
        tracing::warn!(node_id = %node_id, "Skipping node: {}", reason);
        self.set_status(node_id, NodeStatus::Skipped);
        if let Some(state) = self.states.get_mut(node_id) {
            state.skip_reason = Some(reason.to_string());
            state.finished_at = Some(Utc::now());
        }
        observer.on_node_skipped(node_id, reason);
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: self.execution_id,
            node_id: node_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn skip_ready(&mut self, observer: &dyn ExecutionObserver) {
        while let Some(entry) = self.ready.pop() {
            self.skip(&entry.node_id, "run cancelled before the node started", observer);
        }
    }

    /// Nodes waiting on a retry when the run is cancelled keep their last
    /// error and fail.
    fn abandon_retries(&mut self, observer: &dyn ExecutionObserver) {
        let mut abandoned: Vec<NodeId> = self.retrying.drain().collect();
        abandoned.sort_by_key(|id| self.graph.position(id));
        for node_id in abandoned {
            self.set_status(&node_id, NodeStatus::Failed);
            let error = match self.states.get_mut(&node_id) {
                Some(state) => {
                    state.finished_at = Some(Utc::now());
                    NodeError::Permanent(format!(
                        "retry abandoned on cancellation: {}",
                        state.error.clone().unwrap_or_default()
                    ))
                }
                None => NodeError::Cancelled,
            };
            self.report_failure(&node_id, &error, observer);
            self.cascade_skip(&node_id, observer);
        }
    }

    /// Explain every node that never reached a terminal state.
    fn finalize(&mut self, observer: &dyn ExecutionObserver) {
        let graph = Arc::clone(&self.graph);
        for node in graph.list_nodes() {
            match self.status(&node.id) {
                Some(NodeStatus::Pending) => {
                    let reason = if self.cancelled {
                        "run cancelled before the node started"
                    } else if !self.reachable.contains(&node.id) {
                        "not reachable from any start node"
                    } else {
                        "dependencies never satisfied"
                    };
                    self.skip(&node.id, reason, observer);
                }
                Some(NodeStatus::Running) => {
                    let error = NodeError::Permanent("node task was lost".to_string());
                    self.set_status(&node.id, NodeStatus::Failed);
                    if let Some(state) = self.states.get_mut(&node.id) {
                        state.record_error(&error);
                        state.finished_at = Some(Utc::now());
                    }
                    self.report_failure(&node.id, &error, observer);
                }
                _ => {}
            }
        }
    }

    /// Whole-run timeout: everything unfinished fails.
    fn fail_unfinished(&mut self, observer: &dyn ExecutionObserver) {
        let ms = self.options.run_timeout_ms.unwrap_or_default();
        let error = NodeError::Timeout { ms };
        let graph = Arc::clone(&self.graph);
        self.retrying.clear();
        self.ready.clear();
        for node in graph.list_nodes() {
            if self.status(&node.id).is_some_and(|s| !s.is_terminal()) {
                self.set_status(&node.id, NodeStatus::Failed);
                if let Some(state) = self.states.get_mut(&node.id) {
                    state.error = Some(format!("run timed out after {}ms", ms));
                    state.error_kind = Some(error.kind());
                    state.finished_at = Some(Utc::now());
                }
                self.report_failure(&node.id, &error, observer);
            }
        }
    }

    fn set_status(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(state) = self.states.get_mut(node_id) {
            self.progress.transition(state.status, status);
            state.status = status;
        }
    }
}

async fn invoke(
    executor: Arc<dyn NodeExecutor>,
    ctx: NodeContext,
    node_id: NodeId,
    timeout: Duration,
    token: CancellationToken,
) -> TaskOutcome {
    let started = std::time::Instant::now();
    let invocation = AssertUnwindSafe(executor.execute(ctx)).catch_unwind();
    let result = match tokio::time::timeout(timeout, invocation).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(NodeError::Panicked(panic_message(panic))),
        Err(_) => {
            token.cancel();
            Err(NodeError::Timeout {
                ms: timeout.as_millis() as u64,
            })
        }
    };
    TaskOutcome {
        node_id,
        result,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
