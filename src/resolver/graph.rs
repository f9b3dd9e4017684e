//! Task dependency graph.
//!
//! Edges run from prerequisite to dependent ("must finish before"). They come
//! from task-level declarations and from the assigned agent's descriptor
//! (`before_execution` agents and `task_dependencies` by task type). The graph
//! is rebuilt for every resolution; construction problems are collected in
//! [`DependencyGraph::errors`] instead of failing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::Catalog;
use crate::types::{DependencyKind, Priority, Task};

/// Outcome of a prerequisite that releases a conditional dependent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseCondition {
    /// Prerequisite completed successfully.
    #[default]
    Success,
    /// Prerequisite failed.
    Failure,
    /// Prerequisite reached any terminal state.
    Completion,
}

impl ReleaseCondition {
    /// Parse a condition string; unknown text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "" | "success" | "succeeded" | "on_success" => Some(Self::Success),
            "failure" | "failed" | "on_failure" => Some(Self::Failure),
            "completion" | "completed" | "always" | "on_completion" => Some(Self::Completion),
            _ => None,
        }
    }
}

/// One incoming edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Index of the prerequisite task.
    pub prerequisite: usize,
    /// Dependency strength.
    pub kind: DependencyKind,
    /// When a conditional edge is released (always `Success` otherwise).
    pub release: ReleaseCondition,
}

/// Directed graph over one workflow's tasks.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    priorities: Vec<Priority>,
    task_types: Vec<String>,
    incoming: Vec<Vec<Edge>>,
    outgoing: Vec<Vec<usize>>,
    errors: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph for `tasks`, pulling agent-level ordering from
    /// `catalog` when given.
    pub fn build(tasks: &[Task], catalog: Option<&Catalog>) -> Self {
        let mut graph = Self::default();
        let mut kept: Vec<&Task> = Vec::with_capacity(tasks.len());

        for task in tasks {
            if task.id.trim().is_empty() {
                graph.errors.push("task with empty id".to_owned());
                continue;
            }
            if graph.index.contains_key(&task.id) {
                graph.errors.push(format!("duplicate task id '{}'", task.id));
                continue;
            }
            graph.index.insert(task.id.clone(), graph.ids.len());
            graph.ids.push(task.id.clone());
            graph.priorities.push(task.priority);
            graph.task_types.push(task.task_type.clone());
            kept.push(task);
        }
        graph.incoming = vec![Vec::new(); kept.len()];
        graph.outgoing = vec![Vec::new(); kept.len()];

        for (idx, task) in kept.iter().enumerate() {
            for dep in &task.dependencies {
                let Some(&prereq) = graph.index.get(&dep.task_id) else {
                    match dep.kind {
                        DependencyKind::Strict => graph.errors.push(format!(
                            "task '{}' depends on unknown task '{}'",
                            task.id, dep.task_id
                        )),
                        DependencyKind::Soft | DependencyKind::Conditional => warn!(
                            task = %task.id,
                            prerequisite = %dep.task_id,
                            "ignoring dependency on unknown task"
                        ),
                    }
                    continue;
                };
                let release = match (dep.kind, dep.condition.as_deref()) {
                    (DependencyKind::Conditional, Some(text)) => {
                        ReleaseCondition::parse(text).unwrap_or_else(|| {
                            warn!(
                                task = %task.id,
                                condition = text,
                                "unknown dependency condition, treating as success"
                            );
                            ReleaseCondition::Success
                        })
                    }
                    _ => ReleaseCondition::Success,
                };
                graph.add_edge(prereq, idx, dep.kind, release);
            }
        }

        if let Some(catalog) = catalog {
            graph.add_agent_edges(&kept, catalog);
        }
        graph
    }

    fn add_agent_edges(&mut self, tasks: &[&Task], catalog: &Catalog) {
        for (idx, task) in tasks.iter().enumerate() {
            let Some(profile) = task.agent.as_deref().and_then(|a| catalog.get(a)) else {
                continue;
            };
            let before: HashSet<&str> = profile
                .dependencies
                .before_execution
                .iter()
                .map(String::as_str)
                .collect();
            let type_prereqs: HashSet<&str> = profile
                .dependencies
                .task_dependencies
                .get(&task.task_type)
                .map(|types| types.iter().map(String::as_str).collect())
                .unwrap_or_default();
            if before.is_empty() && type_prereqs.is_empty() {
                continue;
            }

            for (other_idx, other) in tasks.iter().enumerate() {
                if other_idx == idx {
                    continue;
                }
                let by_agent = other.agent.as_deref().is_some_and(|a| before.contains(a));
                let by_type = type_prereqs.contains(other.task_type.as_str());
                if by_agent || by_type {
                    self.add_edge(
                        other_idx,
                        idx,
                        DependencyKind::Strict,
                        ReleaseCondition::Success,
                    );
                }
            }
        }
    }

    /// Add `prereq → dependent` unless the pair is already connected.
    fn add_edge(
        &mut self,
        prereq: usize,
        dependent: usize,
        kind: DependencyKind,
        release: ReleaseCondition,
    ) {
        if self.incoming[dependent]
            .iter()
            .any(|e| e.prerequisite == prereq)
        {
            return;
        }
        self.incoming[dependent].push(Edge {
            prerequisite: prereq,
            kind,
            release,
        });
        self.outgoing[prereq].push(dependent);
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Task ids in input order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Id of the task at `idx`.
    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    /// Index of `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Priority of the task at `idx`.
    pub fn priority(&self, idx: usize) -> Priority {
        self.priorities[idx]
    }

    /// Task type of the task at `idx`.
    pub fn task_type(&self, idx: usize) -> &str {
        &self.task_types[idx]
    }

    /// Incoming edges of the task at `idx`.
    pub fn incoming(&self, idx: usize) -> &[Edge] {
        &self.incoming[idx]
    }

    /// Dependents of the task at `idx`.
    pub fn outgoing(&self, idx: usize) -> &[usize] {
        &self.outgoing[idx]
    }

    /// Prerequisite ids of `id`.
    pub fn prerequisites(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|idx| {
                self.incoming[idx]
                    .iter()
                    .map(|e| self.ids[e.prerequisite].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Dependent ids of `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|idx| {
                self.outgoing[idx]
                    .iter()
                    .map(|d| self.ids[*d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Problems found while building.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
