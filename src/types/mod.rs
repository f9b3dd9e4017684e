//! Core workflow types shared by the resolver, router, and bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority of a task. Earlier variants are scheduled first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Must run before anything else that is ready.
    Critical,
    /// Ahead of routine work.
    High,
    /// Routine work.
    #[default]
    Medium,
    /// Runs when nothing else is ready.
    Low,
}

impl Priority {
    /// Sort rank (0 is scheduled first).
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Lowercase label used in descriptors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// How strongly a task depends on its prerequisite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Prerequisite must succeed; its failure cancels the dependent.
    #[default]
    Strict,
    /// Ordering only; the dependent may still run if the prerequisite fails.
    Soft,
    /// Release depends on the prerequisite outcome named by the condition.
    Conditional,
}

/// A declared prerequisite of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// Identifier of the prerequisite task.
    pub task_id: String,
    /// Dependency strength.
    #[serde(default)]
    pub kind: DependencyKind,
    /// Optional condition (`success`, `failure`, or `completion`) for
    /// conditional dependencies.
    #[serde(default)]
    pub condition: Option<String>,
}

impl TaskDependency {
    /// A strict dependency on `task_id`.
    pub fn strict(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: DependencyKind::Strict,
            condition: None,
        }
    }

    /// A soft dependency on `task_id`.
    pub fn soft(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: DependencyKind::Soft,
            condition: None,
        }
    }

    /// A conditional dependency on `task_id`.
    pub fn conditional(task_id: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: DependencyKind::Conditional,
            condition: Some(condition.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work submitted as part of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the workflow.
    pub id: String,
    /// Task type, e.g. `research` or `writing`.
    pub task_type: String,
    /// Agent the submitter expects to run this task.
    #[serde(default)]
    pub agent: Option<String>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Declared prerequisites.
    #[serde(default)]
    pub dependencies: Vec<TaskDependency>,
    /// Tools the task needs.
    #[serde(default)]
    pub required_tools: Vec<String>,
}

impl Task {
    /// Create a medium-priority task with no dependencies.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            agent: None,
            priority: Priority::Medium,
            dependencies: Vec::new(),
            required_tools: Vec::new(),
        }
    }

    /// Set the assigned-agent hint.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a strict dependency.
    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(TaskDependency::strict(task_id));
        self
    }

    /// Add an arbitrary dependency.
    pub fn with_dependency(mut self, dependency: TaskDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add a required tool.
    pub fn requires_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tools.push(tool.into());
        self
    }
}
