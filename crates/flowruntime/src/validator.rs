//! Structural validation of a workflow graph before it runs.
//!
//! Checks run in a fixed order and never stop early: node config, edge
//! references, cycles, reachability, then resource heuristics. Only
//! error-severity issues make a graph invalid.

use crate::registry::NodeRegistry;
use flowcore::{FlowError, GraphModel, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownNodeType,
    MissingConfig,
    DanglingEdge,
    Cycle,
    NoStartNode,
    OrphanedNode,
    ResourceUsage,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl ValidationIssue {
    fn error(kind: IssueKind, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }

    fn warning(kind: IssueKind, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    /// Each cycle as a closed walk: `[a, b, a]`.
    pub cycles: Vec<Vec<NodeId>>,
    pub orphaned_nodes: Vec<NodeId>,
    pub start_nodes: Vec<NodeId>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    fn internal_failure(error: &FlowError) -> Self {
        Self {
            valid: false,
            issues: vec![ValidationIssue::error(
                IssueKind::Internal,
                format!("Validation aborted by an internal error: {}", error),
                None,
            )],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Graphs with more nodes + edges than this skip the DFS pass and go
    /// straight to the SCC pass.
    pub dfs_threshold: usize,
    /// Estimated work units above which a node draws a warning.
    pub resource_soft_limit: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            dfs_threshold: 64,
            resource_soft_limit: 1000,
        }
    }
}

pub struct Validator {
    registry: Arc<NodeRegistry>,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, ValidatorConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: ValidatorConfig) -> Self {
        Self { registry, config }
    }

    /// Validate a graph. Never fails: problems, including internal ones,
    /// come back as issues.
    pub fn validate(&self, graph: &GraphModel) -> ValidationResult {
        match self.run_checks(graph) {
            Ok(result) => {
                tracing::debug!(
                    valid = result.valid,
                    issues = result.issues.len(),
                    cycles = result.cycles.len(),
                    "Validation finished"
                );
                result
            }
            Err(e) => {
                tracing::error!("Validation aborted: {}", e);
                ValidationResult::internal_failure(&e)
            }
        }
    }

    fn run_checks(&self, graph: &GraphModel) -> Result<ValidationResult, FlowError> {
        let mut issues = Vec::new();

        self.check_node_config(graph, &mut issues);
        check_edges(graph, &mut issues);

        let cycles = self.find_cycles(graph)?;
        for cycle in &cycles {
            issues.push(ValidationIssue::error(
                IssueKind::Cycle,
                format!("Cycle detected: {}", cycle.join(" -> ")),
                cycle.first().map(String::as_str),
            ));
        }

        let start_nodes = graph.start_nodes();
        if start_nodes.is_empty() {
            issues.push(ValidationIssue::warning(
                IssueKind::NoStartNode,
                "Workflow has no start node (a trigger-type node without incoming edges)",
                None,
            ));
        }
        let orphaned_nodes = find_orphans(graph, &start_nodes);
        for orphan in &orphaned_nodes {
            issues.push(ValidationIssue::warning(
                IssueKind::OrphanedNode,
                format!("Node {} is not reachable from any start node", orphan),
                Some(orphan),
            ));
        }

        self.check_resources(graph, &mut issues);

        let valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Ok(ValidationResult {
            valid,
            issues,
            cycles,
            orphaned_nodes,
            start_nodes,
        })
    }

    fn check_node_config(&self, graph: &GraphModel, issues: &mut Vec<ValidationIssue>) {
        for node in graph.list_nodes() {
            let Some(executor) = self.registry.get(&node.node_type) else {
                issues.push(ValidationIssue::error(
                    IssueKind::UnknownNodeType,
                    format!("Node {} has unregistered type '{}'", node.id, node.node_type),
                    Some(&node.id),
                ));
                continue;
            };

            for key in executor.required_config() {
                let present = node.config.get(*key).is_some_and(|v| !v.is_null());
                if !present {
                    issues.push(ValidationIssue::error(
                        IssueKind::MissingConfig,
                        format!(
                            "Node {} ({}) is missing required config '{}'",
                            node.id, node.node_type, key
                        ),
                        Some(&node.id),
                    ));
                }
            }
        }
    }

    fn check_resources(&self, graph: &GraphModel, issues: &mut Vec<ValidationIssue>) {
        let limit = self.config.resource_soft_limit;
        for node in graph.list_nodes() {
            let Some(executor) = self.registry.get(&node.node_type) else {
                continue;
            };
            match executor.estimate_cost(&node.config) {
                Some(u64::MAX) => issues.push(ValidationIssue::warning(
                    IssueKind::ResourceUsage,
                    format!("Node {} ({}) has unbounded resource usage", node.id, node.node_type),
                    Some(&node.id),
                )),
                Some(cost) if cost > limit => issues.push(ValidationIssue::warning(
                    IssueKind::ResourceUsage,
                    format!(
                        "Node {} ({}) is estimated at {} work units, above the soft limit of {}",
                        node.id, node.node_type, cost, limit
                    ),
                    Some(&node.id),
                )),
                _ => {}
            }
        }
    }

    /// Two tiers: a cheap colouring DFS on small graphs, then Tarjan's SCC
    /// whenever the graph is large or the DFS found anything. The DFS stops
    /// at the first cycle per root, so it can only prove absence.
    fn find_cycles(&self, graph: &GraphModel) -> Result<Vec<Vec<NodeId>>, FlowError> {
        let adjacency = build_adjacency(graph);
        let small = graph.node_count() + graph.edge_count() <= self.config.dfs_threshold;

        let quick = if small {
            simple_dfs_cycles(&adjacency)
        } else {
            Vec::new()
        };
        if small && quick.is_empty() {
            return Ok(Vec::new());
        }

        let mut search = CycleSearch::new(adjacency.len());
        let mut cycles = Vec::new();
        for (idx, component) in cyclic_components(&adjacency)?.iter().enumerate() {
            let stamp = idx + 1;
            search.mark(component, stamp);
            let cycle = quick
                .iter()
                .find(|c| c.iter().all(|&n| search.component[n] == stamp))
                .cloned()
                .or_else(|| search.shortest_cycle(&adjacency, component[0], stamp))
                .ok_or_else(|| {
                    FlowError::Execution("strongly connected component without a cycle".to_string())
                })?;
            cycles.push(
                cycle
                    .into_iter()
                    .map(|pos| graph.list_nodes()[pos].id.clone())
                    .collect(),
            );
        }
        Ok(cycles)
    }
}

fn check_edges(graph: &GraphModel, issues: &mut Vec<ValidationIssue>) {
    for edge in graph.edges() {
        let source_ok = graph.contains(&edge.source);
        let target_ok = graph.contains(&edge.target);
        if !source_ok {
            issues.push(ValidationIssue::error(
                IssueKind::DanglingEdge,
                format!(
                    "Edge {} -> {} references unknown source node {}",
                    edge.source, edge.target, edge.source
                ),
                target_ok.then_some(edge.target.as_str()),
            ));
        }
        if !target_ok {
            issues.push(ValidationIssue::error(
                IssueKind::DanglingEdge,
                format!(
                    "Edge {} -> {} references unknown target node {}",
                    edge.source, edge.target, edge.target
                ),
                source_ok.then_some(edge.source.as_str()),
            ));
        }
    }
}

/// Nodes not reachable from `start_nodes`, in declaration order.
fn find_orphans(graph: &GraphModel, start_nodes: &[NodeId]) -> Vec<NodeId> {
    let mut reachable: HashSet<&str> = start_nodes.iter().map(String::as_str).collect();
    let mut queue: VecDeque<&str> = start_nodes.iter().map(String::as_str).collect();
    while let Some(id) = queue.pop_front() {
        for next in graph.successors(id) {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }

    graph
        .list_nodes()
        .iter()
        .filter(|n| !reachable.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Deduplicated successor lists by declaration position, ignoring edges
/// with unknown endpoints.
fn build_adjacency(graph: &GraphModel) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); graph.node_count()];
    let mut seen: HashSet<(usize, usize)> = HashSet::with_capacity(graph.edge_count());
    for edge in graph.edges() {
        if let (Some(from), Some(to)) = (graph.position(&edge.source), graph.position(&edge.target)) {
            if seen.insert((from, to)) {
                adjacency[from].push(to);
            }
        }
    }
    adjacency
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative three-colour DFS. Reports at most one cycle per root and
/// abandons the root once it has one.
fn simple_dfs_cycles(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut color = vec![Color::White; adjacency.len()];
    let mut cycles = Vec::new();

    for root in 0..adjacency.len() {
        if color[root] != Color::White {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        color[root] = Color::Gray;

        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            top.1 += 1;
            if let Some(&child) = adjacency[node].get(cursor) {
                match color[child] {
                    Color::White => {
                        color[child] = Color::Gray;
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                        cycle.push(child);
                        cycles.push(cycle);
                        for &(n, _) in &stack {
                            color[n] = Color::Black;
                        }
                        stack.clear();
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }
    cycles
}

/// Strongly connected components that contain a cycle, ordered by their
/// earliest declared member, which also leads each component.
fn cyclic_components(adjacency: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, FlowError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(adjacency.len(), 0);
    let indices: Vec<NodeIndex> = (0..adjacency.len()).map(|pos| graph.add_node(pos)).collect();
    for (from, targets) in adjacency.iter().enumerate() {
        for &to in targets {
            graph.add_edge(indices[from], indices[to], ());
        }
    }

    // Slot per earliest member keeps the ordering linear.
    let mut by_first: Vec<Option<Vec<usize>>> = vec![None; adjacency.len()];
    for scc in petgraph::algo::tarjan_scc(&graph) {
        let mut members = scc
            .iter()
            .map(|idx| {
                graph
                    .node_weight(*idx)
                    .copied()
                    .ok_or_else(|| FlowError::Execution(format!("dangling graph index {:?}", idx)))
            })
            .collect::<Result<Vec<usize>, FlowError>>()?;
        let Some(lead) = (0..members.len()).min_by_key(|&i| members[i]) else {
            continue;
        };
        members.swap(0, lead);
        let first = members[0];
        let self_loop = members.len() == 1 && adjacency[first].contains(&first);
        if members.len() > 1 || self_loop {
            by_first[first] = Some(members);
        }
    }
    Ok(by_first.into_iter().flatten().collect())
}

/// Scratch buffers shared by every component's search. Entries are tagged
/// with the component's stamp, so nothing is reset between components.
struct CycleSearch {
    component: Vec<usize>,
    visited: Vec<usize>,
    parent: Vec<usize>,
}

impl CycleSearch {
    fn new(len: usize) -> Self {
        Self {
            component: vec![0; len],
            visited: vec![0; len],
            parent: vec![0; len],
        }
    }

    fn mark(&mut self, members: &[usize], stamp: usize) {
        for &m in members {
            self.component[m] = stamp;
        }
    }

    /// Shortest cycle through `start`, staying inside the stamped component.
    fn shortest_cycle(&mut self, adjacency: &[Vec<usize>], start: usize, stamp: usize) -> Option<Vec<usize>> {
        self.visited[start] = stamp;
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for &next in &adjacency[node] {
                if next == start {
                    let mut path = vec![node];
                    let mut cursor = node;
                    while cursor != start {
                        cursor = self.parent[cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    path.push(start);
                    return Some(path);
                }
                if self.component[next] == stamp && self.visited[next] != stamp {
                    self.visited[next] = stamp;
                    self.parent[next] = node;
                    queue.push_back(next);
                }
            }
        }
        None
    }
}
