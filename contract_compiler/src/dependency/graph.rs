//! Dependency graph over registry entries and batch contracts
//!
//! Nodes live in an arena ordered by service id; edges are indices into it.

use super::error::DependencyError;
use super::registry::DependencyRegistry;
use crate::config::compile_time::dependency::{
    MAX_CYCLE_PATH_LENGTH, MAX_GRAPH_NODES, MAX_REPORTED_CYCLES,
};
use crate::log_debug;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct Node {
    id: String,
    edges: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: BTreeMap<String, usize>,
}

impl DependencyGraph {
    pub fn build(registry: &DependencyRegistry) -> Result<Self, DependencyError> {
        let mut ids = BTreeSet::new();
        for entry in registry.entries() {
            ids.insert(entry.name.as_str());
            ids.extend(entry.requires.iter().map(|req| req.name.as_str()));
        }
        if ids.len() > MAX_GRAPH_NODES {
            return Err(DependencyError::GraphTooLarge {
                count: ids.len(),
                limit: MAX_GRAPH_NODES,
            });
        }

        let index: BTreeMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), i))
            .collect();
        let mut nodes: Vec<Node> = ids
            .iter()
            .map(|id| Node {
                id: id.to_string(),
                edges: Vec::new(),
            })
            .collect();

        for entry in registry.entries() {
            let Some(&from) = index.get(&entry.name) else {
                continue;
            };
            let mut edges: Vec<usize> = entry
                .requires
                .iter()
                .filter_map(|req| index.get(&req.name).copied())
                .collect();
            edges.sort_unstable();
            edges.dedup();
            nodes[from].edges = edges;
        }

        Ok(Self { nodes, index })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.nodes[i]
                    .edges
                    .iter()
                    .map(|&e| self.nodes[e].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Three-color iterative DFS; each cycle starts at its smallest member
    /// and repeats it at the end
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut colors = vec![Color::White; self.nodes.len()];
        let mut found: BTreeSet<Vec<usize>> = BTreeSet::new();

        for start in 0..self.nodes.len() {
            if colors[start] != Color::White {
                continue;
            }
            // (node, next edge to follow)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            colors[start] = Color::Grey;

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                top.1 += 1;
                match self.nodes[node].edges.get(next) {
                    Some(&neighbor) => match colors[neighbor] {
                        Color::White => {
                            colors[neighbor] = Color::Grey;
                            stack.push((neighbor, 0));
                        }
                        Color::Grey => {
                            let from = stack
                                .iter()
                                .position(|&(n, _)| n == neighbor)
                                .unwrap_or(0);
                            let members: Vec<usize> = stack[from..].iter().map(|&(n, _)| n).collect();
                            found.insert(canonical(members));
                        }
                        Color::Black => {}
                    },
                    None => {
                        colors[node] = Color::Black;
                        stack.pop();
                    }
                }
            }
        }

        let total = found.len();
        let cycles: Vec<Vec<String>> = found
            .into_iter()
            .take(MAX_REPORTED_CYCLES)
            .map(|members| self.cycle_path(&members))
            .collect();

        if total > cycles.len() {
            log_debug!("Cycle report truncated",
                "found" => total,
                "reported" => cycles.len());
        }
        cycles
    }

    fn cycle_path(&self, members: &[usize]) -> Vec<String> {
        let mut path: Vec<String> = members
            .iter()
            .map(|&i| self.nodes[i].id.clone())
            .collect();
        let Some(first) = path.first().cloned() else {
            return path;
        };
        if path.len() + 1 > MAX_CYCLE_PATH_LENGTH {
            path.truncate(MAX_CYCLE_PATH_LENGTH.saturating_sub(2).max(1));
            path.push("...".to_string());
        }
        path.push(first);
        path
    }
}

/// Rotate so the smallest index (and so the smallest id) comes first
fn canonical(mut members: Vec<usize>) -> Vec<usize> {
    if let Some(min_at) = members
        .iter()
        .enumerate()
        .min_by_key(|&(_, n)| *n)
        .map(|(i, _)| i)
    {
        members.rotate_left(min_at);
    }
    members
}
