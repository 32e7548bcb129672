//! Dependency ordering for component evaluation.
//!
//! Components are sorted topologically over their dependencies with Kahn's
//! algorithm. Ties between ready components are broken by
//! `(sequence_order, code)`, so the order is the same on every run.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};

/// One component in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    /// Component code.
    pub code: String,
    /// Tie-break order.
    pub sequence_order: u32,
    /// Codes that must be evaluated first.
    pub dependencies: BTreeSet<String>,
}

/// Returns node indices in evaluation order.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] when a node depends on an unknown
/// code, or when the graph has a cycle. A cycle error names every component
/// on one cycle, in dependency order.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::{PlanNode, topological_order};
/// use std::collections::BTreeSet;
///
/// let node = |code: &str, seq, deps: &[&str]| PlanNode {
///     code: code.to_string(),
///     sequence_order: seq,
///     dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
/// };
/// let nodes = vec![
///     node("housing", 1, &["base_pay"]),
///     node("base_pay", 2, &[]),
/// ];
///
/// assert_eq!(topological_order(&nodes).unwrap(), vec![1, 0]);
/// ```
pub fn topological_order(nodes: &[PlanNode]) -> EngineResult<Vec<usize>> {
    let index: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.code.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dependency in &node.dependencies {
            let Some(&j) = index.get(dependency.as_str()) else {
                return Err(EngineError::configuration(
                    format!(
                        "component '{}' depends on unknown component '{}'",
                        node.code, dependency
                    ),
                    [node.code.clone()],
                ));
            };
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<(u32, &str, usize)> = nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, node)| (node.sequence_order, node.code.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        let (_, _, i) = next;
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                let node = &nodes[dependent];
                ready.insert((node.sequence_order, node.code.as_str(), dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let cycle = find_cycle(nodes, &index, &in_degree);
        return Err(EngineError::configuration(
            format!("dependency cycle between components: {}", cycle.join(" -> ")),
            cycle,
        ));
    }
    Ok(order)
}

/// Walks unresolved dependencies from the first blocked node until a node
/// repeats. Every blocked node has at least one blocked dependency, so the
/// walk always closes a cycle.
fn find_cycle(nodes: &[PlanNode], index: &BTreeMap<&str, usize>, in_degree: &[usize]) -> Vec<String> {
    let blocked = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..nodes.len()).filter(|&i| blocked(i)).min_by(|&a, &b| {
        nodes[a].code.cmp(&nodes[b].code)
    }) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: BTreeMap<usize, usize> = BTreeMap::new();
    let mut current = start;
    loop {
        if let Some(&at) = position.get(&current) {
            return path[at..].iter().map(|&i| nodes[i].code.clone()).collect();
        }
        position.insert(current, path.len());
        path.push(current);
        let next = nodes[current]
            .dependencies
            .iter()
            .filter_map(|code| index.get(code.as_str()).copied())
            .find(|&j| blocked(j));
        match next {
            Some(j) => current = j,
            None => return path.iter().map(|&i| nodes[i].code.clone()).collect(),
        }
    }
}
