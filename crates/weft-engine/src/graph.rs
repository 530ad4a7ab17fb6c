//! Pipeline graph algorithms: ordering, cycle detection, neighbourhood
//! queries and structural validation. Pure and synchronous.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};
use weft_core::types::{PipelineEdge, PipelineNode};

/// Order nodes so that every edge points forward (Kahn's algorithm).
///
/// Edges whose source or target is not in `nodes` are ignored. Independent
/// nodes keep their declaration order, so the result is stable across calls.
pub fn topological_sort<'a>(
    nodes: &'a [PipelineNode],
    edges: &[PipelineEdge],
) -> Result<Vec<&'a PipelineNode>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for edge in edges {
        let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) else {
            continue;
        };
        adjacency[from].push(to);
        in_degree[to] += 1;
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = queue.pop_front() {
        order.push(&nodes[i]);
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < nodes.len() {
        let unordered = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, n)| n.id.clone())
            .collect();
        return Err(WeftError::Cycle { unordered });
    }

    Ok(order)
}

/// Nodes whose type is one of the trigger types.
pub fn find_trigger_nodes(nodes: &[PipelineNode]) -> Vec<&PipelineNode> {
    nodes.iter().filter(|n| n.node_type.is_trigger()).collect()
}

/// Direct successors of `node_id`.
///
/// With `source_handle`, only edges leaving through that handle count;
/// without it, every outgoing edge counts regardless of handle.
pub fn downstream_nodes<'a>(
    node_id: &str,
    edges: &'a [PipelineEdge],
    source_handle: Option<&str>,
) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .filter(|e| e.source == node_id)
        .filter(|e| source_handle.map_or(true, |h| e.source_handle.as_deref() == Some(h)))
        .map(|e| e.target.as_str())
        .filter(|t| seen.insert(*t))
        .collect()
}

/// Direct predecessors of `node_id`.
pub fn upstream_nodes<'a>(node_id: &str, edges: &'a [PipelineEdge]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .filter(|e| e.target == node_id)
        .map(|e| e.source.as_str())
        .filter(|s| seen.insert(*s))
        .collect()
}

/// `start` plus every node reachable from it, breadth-first, ignoring handles.
pub fn descendants<'a>(start: &'a str, edges: &'a [PipelineEdge]) -> Vec<&'a str> {
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut order = vec![start];
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in downstream_nodes(current, edges, None) {
            if visited.insert(next) {
                order.push(next);
                queue.push_back(next);
            }
        }
    }

    order
}

/// Outcome of structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check edge references, acyclicity and trigger presence.
///
/// All checks run; every failure is reported.
pub fn validate(nodes: &[PipelineNode], edges: &[PipelineEdge]) -> ValidationResult {
    let mut errors = Vec::new();
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in edges {
        if !ids.contains(edge.source.as_str()) {
            errors.push(format!(
                "Edge '{}' references missing source node '{}'",
                edge.id, edge.source
            ));
        }
        if !ids.contains(edge.target.as_str()) {
            errors.push(format!(
                "Edge '{}' references missing target node '{}'",
                edge.id, edge.target
            ));
        }
    }

    if topological_sort(nodes, edges).is_err() {
        errors.push("Pipeline contains a cycle".to_string());
    }

    if find_trigger_nodes(nodes).is_empty() {
        errors.push(
            "Pipeline must have at least one trigger node (cron, webhook, task_event, manual)"
                .to_string(),
        );
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}
