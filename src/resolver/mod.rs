//! Dependency resolution for task workflows.
//!
//! [`DependencyResolver::resolve`] builds a [`DependencyGraph`], rejects it if
//! it has construction errors or cycles, and otherwise produces a
//! priority-aware topological order, execution levels, and the critical path.
//! Resolution never panics; every problem is reported in the result.

pub mod graph;
pub mod tracker;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::ResolverConfig;
use crate::types::Task;

pub use graph::{DependencyGraph, Edge, ReleaseCondition};
pub use tracker::{ExecutionTracker, TaskStatus, TrackerError};

/// Estimated duration for task types missing from the table.
pub const DEFAULT_TASK_DURATION: u64 = 10;

/// Built-in estimated durations per task type.
const DEFAULT_DURATIONS: &[(&str, u64)] = &[
    ("research", 30),
    ("analysis", 20),
    ("writing", 25),
    ("content_generation", 25),
    ("review", 10),
    ("data_collection", 15),
    ("validation", 5),
    ("deployment", 15),
];

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of resolving a task set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyResolutionResult {
    /// False when there were construction errors or cycles.
    pub is_valid: bool,
    /// Topological order (empty when invalid).
    pub execution_order: Vec<String>,
    /// Longest cumulative-duration chain.
    pub critical_path: Vec<String>,
    /// Estimated duration of the critical path.
    pub critical_path_duration: u64,
    /// Task → execution level (roots are level 0).
    pub execution_levels: BTreeMap<String, usize>,
    /// Task → tasks that must finish before it.
    pub blocking: BTreeMap<String, Vec<String>>,
    /// Cycles, each closed by repeating its first task.
    pub cycles: Vec<Vec<String>>,
    /// Construction errors.
    pub errors: Vec<String>,
}

impl DependencyResolutionResult {
    /// Tasks grouped by level; within a group, in execution order.
    pub fn parallel_groups(&self) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = Vec::new();
        for id in &self.execution_order {
            let Some(&level) = self.execution_levels.get(id) else {
                continue;
            };
            if groups.len() <= level {
                groups.resize_with(level.saturating_add(1), Vec::new);
            }
            groups[level].push(id.clone());
        }
        groups
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.execution_levels
            .values()
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Orders tasks by their dependencies.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    catalog: Option<Arc<Catalog>>,
    durations: HashMap<String, u64>,
    default_duration: u64,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    /// Resolver with the built-in duration table and no agent dependencies.
    pub fn new() -> Self {
        Self {
            catalog: None,
            durations: DEFAULT_DURATIONS
                .iter()
                .map(|(t, d)| ((*t).to_owned(), *d))
                .collect(),
            default_duration: DEFAULT_TASK_DURATION,
        }
    }

    /// Resolver configured from the `[resolver]` section.
    pub fn from_config(catalog: Option<Arc<Catalog>>, config: &ResolverConfig) -> Self {
        let mut resolver = Self::new();
        resolver.catalog = catalog;
        resolver.default_duration = config.default_duration;
        resolver.durations.extend(
            config
                .durations
                .iter()
                .map(|(t, d)| (t.clone(), *d)),
        );
        resolver
    }

    /// Pull agent-level ordering from `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Override the estimated duration of one task type.
    pub fn with_duration(mut self, task_type: impl Into<String>, duration: u64) -> Self {
        self.durations.insert(task_type.into(), duration);
        self
    }

    /// Estimated duration of `task_type`.
    pub fn duration_for(&self, task_type: &str) -> u64 {
        self.durations
            .get(task_type)
            .copied()
            .unwrap_or(self.default_duration)
    }

    /// Build the dependency graph for `tasks`.
    pub fn build_graph(&self, tasks: &[Task]) -> DependencyGraph {
        DependencyGraph::build(tasks, self.catalog.as_deref())
    }

    /// Resolve `tasks` into an execution plan.
    pub fn resolve(&self, tasks: &[Task]) -> DependencyResolutionResult {
        self.resolve_graph(&self.build_graph(tasks))
    }

    /// Resolve an already-built graph.
    pub fn resolve_graph(&self, graph: &DependencyGraph) -> DependencyResolutionResult {
        let mut result = DependencyResolutionResult {
            errors: graph.errors().to_vec(),
            ..DependencyResolutionResult::default()
        };
        for (idx, id) in graph.ids().iter().enumerate() {
            let prereqs = graph
                .incoming(idx)
                .iter()
                .map(|e| graph.id(e.prerequisite).to_owned())
                .collect();
            result.blocking.insert(id.clone(), prereqs);
        }

        result.cycles = find_cycles(graph)
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| graph.id(i).to_owned()).collect())
            .collect();

        if !result.errors.is_empty() || !result.cycles.is_empty() {
            warn!(
                errors = result.errors.len(),
                cycles = result.cycles.len(),
                "dependency resolution failed"
            );
            return result;
        }

        let order = topological_order(graph);
        if order.len() != graph.len() {
            // Only reachable if cycle detection missed a cycle.
            result
                .errors
                .push("topological sort did not cover every task".to_owned());
            return result;
        }

        let mut levels = vec![0usize; graph.len()];
        for &idx in &order {
            levels[idx] = graph
                .incoming(idx)
                .iter()
                .map(|e| levels[e.prerequisite].saturating_add(1))
                .max()
                .unwrap_or(0);
        }

        let (path, duration) = self.critical_path(graph, &order);

        result.is_valid = true;
        result.execution_order = order.iter().map(|&i| graph.id(i).to_owned()).collect();
        result.execution_levels = order
            .iter()
            .map(|&i| (graph.id(i).to_owned(), levels[i]))
            .collect();
        result.critical_path = path.into_iter().map(|i| graph.id(i).to_owned()).collect();
        result.critical_path_duration = duration;

        debug!(
            tasks = graph.len(),
            depth = result.depth(),
            critical_path_duration = duration,
            "dependencies resolved"
        );
        result
    }

    /// Longest path by cumulative duration. Ties go to the task that comes
    /// first in topological order.
    fn critical_path(&self, graph: &DependencyGraph, order: &[usize]) -> (Vec<usize>, u64) {
        let mut position = vec![0usize; graph.len()];
        for (pos, &idx) in order.iter().enumerate() {
            position[idx] = pos;
        }

        let mut total = vec![0u64; graph.len()];
        let mut previous: Vec<Option<usize>> = vec![None; graph.len()];
        for &idx in order {
            let mut best: Option<usize> = None;
            for edge in graph.incoming(idx) {
                let p = edge.prerequisite;
                best = match best {
                    None => Some(p),
                    Some(b)
                        if total[p] > total[b]
                            || (total[p] == total[b] && position[p] < position[b]) =>
                    {
                        Some(p)
                    }
                    keep => keep,
                };
            }
            let own = self.duration_for(graph.task_type(idx));
            total[idx] = own.saturating_add(best.map_or(0, |b| total[b]));
            previous[idx] = best;
        }

        let mut end: Option<usize> = None;
        for &idx in order {
            if end.map_or(true, |e| total[idx] > total[e]) {
                end = Some(idx);
            }
        }
        let Some(end) = end else {
            return (Vec::new(), 0);
        };

        let mut path = vec![end];
        let mut cursor = end;
        while let Some(prev) = previous[cursor] {
            path.push(prev);
            cursor = prev;
        }
        path.reverse();
        (path, total[end])
    }
}

// ---------------------------------------------------------------------------
// Graph algorithms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// Every cycle reachable by DFS in input order. A cycle is the path from the
/// revisited node's first occurrence to the current node, closed by repeating
/// the revisited node.
fn find_cycles(graph: &DependencyGraph) -> Vec<Vec<usize>> {
    let n = graph.len();
    let mut state = vec![Visit::New; n];
    let mut path_pos = vec![0usize; n];
    let mut path: Vec<usize> = Vec::new();
    let mut cycles = Vec::new();

    for start in 0..n {
        if state[start] != Visit::New {
            continue;
        }
        // Explicit (node, next child) stack; no recursion.
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        state[start] = Visit::OnStack;
        path_pos[start] = path.len();
        path.push(start);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if let Some(&next) = graph.outgoing(node).get(frame.1) {
                frame.1 = frame.1.saturating_add(1);
                match state[next] {
                    Visit::New => {
                        state[next] = Visit::OnStack;
                        path_pos[next] = path.len();
                        path.push(next);
                        stack.push((next, 0));
                    }
                    Visit::OnStack => {
                        let mut cycle = path[path_pos[next]..].to_vec();
                        cycle.push(next);
                        cycles.push(cycle);
                    }
                    Visit::Done => {}
                }
            } else {
                state[node] = Visit::Done;
                path.pop();
                stack.pop();
            }
        }
    }
    cycles
}

/// Kahn's algorithm. The ready set is ordered by priority, then by the order
/// tasks became ready: roots in input order, later arrivals behind them.
fn topological_order(graph: &DependencyGraph) -> Vec<usize> {
    let n = graph.len();
    let mut indegree: Vec<usize> = (0..n).map(|i| graph.incoming(i).len()).collect();
    let mut ready: BinaryHeap<Reverse<(u8, usize, usize)>> = BinaryHeap::new();
    let mut discovered: usize = 0;
    for idx in (0..n).filter(|&i| indegree[i] == 0) {
        ready.push(Reverse((graph.priority(idx).rank(), discovered, idx)));
        discovered = discovered.saturating_add(1);
    }

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, _, idx))) = ready.pop() {
        order.push(idx);
        for &dependent in graph.outgoing(idx) {
            let Some(remaining) = indegree.get_mut(dependent) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                ready.push(Reverse((graph.priority(dependent).rank(), discovered, dependent)));
                discovered = discovered.saturating_add(1);
            }
        }
    }
    order
}
