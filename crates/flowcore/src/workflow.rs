use crate::{Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type NodeId = String;

/// Node types that may act as a run's entry point.
pub const TRIGGER_TYPES: [&str; 4] = ["trigger", "webhook", "schedule", "manual"];

pub fn is_trigger_type(node_type: &str) -> bool {
    TRIGGER_TYPES.contains(&node_type)
}

/// Serializable workflow definition, as authored or loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(WorkflowEdge::new(source, target));
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One executable step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Higher runs first among simultaneously ready nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: HashMap::new(),
            priority: None,
            retry: None,
            timeout_ms: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_retry(mut self, max_retries: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_retries,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn is_trigger(&self) -> bool {
        is_trigger_type(&self.node_type)
    }
}

/// Directed dependency from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: NodeId,
    pub target: NodeId,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Per-node retry override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,
}

fn default_backoff() -> f64 {
    1.0
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> u64 {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        (self.delay_ms as f64 * factor) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 250,
            backoff_multiplier: 2.0,
        }
    }
}

/// Immutable view of one run's nodes and edges.
///
/// Edges pointing at unknown node ids are kept so the validator can report
/// them; they are indexed but never resolve through [`GraphModel::get_node`].
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: Vec<WorkflowNode>,
    index: HashMap<NodeId, usize>,
    edges: Vec<WorkflowEdge>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
}

impl GraphModel {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Result<Self, WorkflowError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (pos, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "node at position {} has an empty id",
                    pos
                )));
            }
            if index.insert(node.id.clone(), pos).is_some() {
                return Err(WorkflowError::DuplicateNode(node.id.clone()));
            }
        }

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(idx);
            incoming.entry(edge.target.clone()).or_default().push(idx);
        }

        Ok(Self {
            nodes,
            index,
            edges,
            outgoing,
            incoming,
        })
    }

    pub fn from_workflow(workflow: &Workflow) -> Result<Self, WorkflowError> {
        Self::new(workflow.nodes.clone(), workflow.edges.clone())
    }

    pub fn get_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position of the node in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Nodes in declaration order.
    pub fn list_nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges_from<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.outgoing
            .get(id)
            .into_iter()
            .flat_map(move |indices| indices.iter().map(move |&i| &self.edges[i]))
    }

    pub fn edges_to<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.incoming
            .get(id)
            .into_iter()
            .flat_map(move |indices| indices.iter().map(move |&i| &self.edges[i]))
    }

    /// Distinct existing successors, in edge order.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.edges_from(id)
            .map(|e| e.target.as_str())
            .filter(|t| self.contains(t) && seen.insert(*t))
            .collect()
    }

    /// Distinct existing predecessors, in edge order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.edges_to(id)
            .map(|e| e.source.as_str())
            .filter(|s| self.contains(s) && seen.insert(*s))
            .collect()
    }

    /// Trigger-typed nodes with no incoming edges, in declaration order.
    pub fn start_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_trigger() && self.edges_to(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect()
    }
}
