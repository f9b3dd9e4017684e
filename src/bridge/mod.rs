//! Admission bridge: resolve, assign, validate, and annotate a workflow.
//!
//! [`AdmissionBridge::route_dag_with_policy`] resolves the task graph, asks
//! the external [`BaseRouter`] for an agent per task, and validates every
//! assignment's required tools through the capability router and a policy
//! preflight. A failed assignment moves to the agent's fallbacks in order; a
//! task with no valid agent is rejected and so are its strict dependents.
//! Tasks in the same execution level are validated concurrently, at most
//! `max_concurrent` at a time.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::policy::PolicyEnforcer;
use crate::resolver::{DependencyResolutionResult, DependencyResolver};
use crate::router::{CallContext, CapabilityRouter};
use crate::types::{DependencyKind, Task};

// ---------------------------------------------------------------------------
// Base router seam
// ---------------------------------------------------------------------------

/// Agent proposed for each task by the base router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRoutingPlan {
    /// Task id → agent id.
    pub assignments: BTreeMap<String, String>,
}

/// The external multi-agent router that proposes assignments.
pub trait BaseRouter: Send + Sync {
    /// Propose an agent for each task. Tasks may be left unassigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot produce a plan at all.
    fn assign(&self, tasks: &[Task], context: &CallContext) -> anyhow::Result<BaseRoutingPlan>;
}

/// Base router that follows each task's agent hint, falling back to a
/// default agent for tasks without one.
#[derive(Debug, Clone, Default)]
pub struct HintRouter {
    default_agent: Option<String>,
}

impl HintRouter {
    /// Router with no default agent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign unhinted tasks to `agent`.
    pub fn with_default_agent(agent: impl Into<String>) -> Self {
        Self {
            default_agent: Some(agent.into()),
        }
    }
}

impl BaseRouter for HintRouter {
    fn assign(&self, tasks: &[Task], _context: &CallContext) -> anyhow::Result<BaseRoutingPlan> {
        let assignments = tasks
            .iter()
            .filter_map(|task| {
                task.agent
                    .clone()
                    .or_else(|| self.default_agent.clone())
                    .map(|agent| (task.id.clone(), agent))
            })
            .collect();
        Ok(BaseRoutingPlan { assignments })
    }
}

// ---------------------------------------------------------------------------
// Admission records
// ---------------------------------------------------------------------------

/// Admission state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAdmissionState {
    /// Not yet considered.
    Pending,
    /// Waiting on prerequisites in earlier levels.
    DependencyBlocked,
    /// The base router's agent is being validated.
    CandidateAssigned,
    /// Every required tool passed validation.
    ToolValidated,
    /// Committed to the plan.
    Admitted,
    /// A fallback agent is being validated.
    FallbackAssigned,
    /// No agent could take the task.
    Rejected,
}

impl TaskAdmissionState {
    /// Whether moving to `next` is legal.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskAdmissionState::*;
        matches!(
            (self, next),
            (Pending, DependencyBlocked | CandidateAssigned | Rejected)
                | (DependencyBlocked, CandidateAssigned | Rejected)
                | (CandidateAssigned, ToolValidated | FallbackAssigned | Rejected)
                | (FallbackAssigned, ToolValidated | FallbackAssigned | Rejected)
                | (ToolValidated, Admitted)
        )
    }

    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Admitted | Self::Rejected)
    }
}

impl fmt::Display for TaskAdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::DependencyBlocked => "DEPENDENCY_BLOCKED",
            Self::CandidateAssigned => "CANDIDATE_ASSIGNED",
            Self::ToolValidated => "TOOL_VALIDATED",
            Self::Admitted => "ADMITTED",
            Self::FallbackAssigned => "FALLBACK_ASSIGNED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(label)
    }
}

/// Admission record of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAdmission {
    /// Task id.
    pub task_id: String,
    /// Agent proposed by the base router.
    pub proposed_agent: Option<String>,
    /// Agent committed to, when admitted.
    pub agent: Option<String>,
    /// Whether a fallback agent was committed to.
    pub fallback_used: bool,
    /// Agents validated for the task, in order.
    pub agents_tried: Vec<String>,
    /// Execution level.
    pub level: usize,
    /// Current state.
    pub state: TaskAdmissionState,
    /// Every state visited, in order.
    pub history: Vec<TaskAdmissionState>,
    /// Validation problems encountered along the way.
    pub reasons: Vec<String>,
}

impl TaskAdmission {
    fn new(task_id: &str, proposed_agent: Option<String>, level: usize) -> Self {
        Self {
            task_id: task_id.to_owned(),
            proposed_agent,
            agent: None,
            fallback_used: false,
            agents_tried: Vec::new(),
            level,
            state: TaskAdmissionState::Pending,
            history: vec![TaskAdmissionState::Pending],
            reasons: Vec::new(),
        }
    }

    fn transition(&mut self, next: TaskAdmissionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                task = %self.task_id,
                from = %self.state,
                to = %next,
                "illegal admission transition ignored"
            );
            return;
        }
        self.state = next;
        self.history.push(next);
    }
}

/// Why a task was left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// Task id.
    pub task_id: String,
    /// Agents tried, in order.
    pub agents_tried: Vec<String>,
    /// What failed.
    pub reasons: Vec<String>,
}

/// Base plan annotated with ordering and admission results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotatedRoutingPlan {
    /// Unique id of this plan, for correlating decision and compliance logs.
    pub plan_id: String,
    /// Task id → agent. Admitted tasks only, unless degraded.
    pub assignments: BTreeMap<String, String>,
    /// Topological order.
    pub execution_order: Vec<String>,
    /// Critical path.
    pub critical_path: Vec<String>,
    /// Estimated duration of the critical path.
    pub critical_path_duration: u64,
    /// Task → level.
    pub execution_levels: BTreeMap<String, usize>,
    /// Tasks grouped by level.
    pub parallel_groups: Vec<Vec<String>>,
    /// Dependency cycles that made resolution fail.
    pub cycles: Vec<Vec<String>>,
    /// True when resolution failed and the base plan is passed through.
    pub degraded: bool,
    /// Why the plan is degraded.
    pub degradation_reason: Option<String>,
    /// Tasks excluded from the plan.
    pub validation_failures: Vec<ValidationFailure>,
    /// Per-task admission records.
    pub admissions: BTreeMap<String, TaskAdmission>,
}

impl AnnotatedRoutingPlan {
    /// Whether `task` was admitted.
    pub fn is_admitted(&self, task: &str) -> bool {
        self.admissions
            .get(task)
            .is_some_and(|a| a.state == TaskAdmissionState::Admitted)
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Composes resolver, router, and enforcer into per-task admission.
pub struct AdmissionBridge {
    catalog: Arc<Catalog>,
    resolver: DependencyResolver,
    router: Arc<CapabilityRouter>,
    enforcer: Arc<PolicyEnforcer>,
    base: Arc<dyn BaseRouter>,
    max_concurrent: NonZeroUsize,
}

impl fmt::Debug for AdmissionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionBridge")
            .field("catalog", &self.catalog)
            .field("resolver", &self.resolver)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl AdmissionBridge {
    /// Assemble a bridge from its parts. Admission runs up to one worker per
    /// available CPU.
    pub fn new(
        catalog: Arc<Catalog>,
        resolver: DependencyResolver,
        router: Arc<CapabilityRouter>,
        enforcer: Arc<PolicyEnforcer>,
        base: Arc<dyn BaseRouter>,
    ) -> Self {
        Self {
            catalog,
            resolver,
            router,
            enforcer,
            base,
            max_concurrent: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Cap the number of tasks validated at once within a level.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Resolve, assign, and validate `tasks`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the base router fails. Every other problem
    /// is reported in the plan.
    pub fn route_dag_with_policy(
        &self,
        tasks: &[Task],
        context: &CallContext,
    ) -> anyhow::Result<AnnotatedRoutingPlan> {
        let resolution = self.resolver.resolve(tasks);
        let base_plan = self.base.assign(tasks, context)?;

        if !resolution.is_valid {
            let reason = degradation_reason(&resolution);
            warn!(reason = %reason, "dependency resolution failed, passing base plan through");
            return Ok(AnnotatedRoutingPlan {
                plan_id: new_plan_id(),
                assignments: base_plan.assignments,
                cycles: resolution.cycles,
                degraded: true,
                degradation_reason: Some(reason),
                ..AnnotatedRoutingPlan::default()
            });
        }

        let resolved = &resolution;
        let by_id: BTreeMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let groups = resolution.parallel_groups();
        let mut admissions: BTreeMap<String, TaskAdmission> = BTreeMap::new();
        let mut rejected: HashSet<String> = HashSet::new();

        for (level, group) in groups.iter().enumerate() {
            let level_tasks: Vec<&Task> = group
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            for chunk in level_tasks.chunks(self.max_concurrent.get()) {
                let results =
                    self.admit_chunk(chunk, level, resolved, &base_plan, &rejected, context);
                for admission in results {
                    if admission.state == TaskAdmissionState::Rejected {
                        rejected.insert(admission.task_id.clone());
                    }
                    admissions.insert(admission.task_id.clone(), admission);
                }
            }
        }

        let mut plan = AnnotatedRoutingPlan {
            plan_id: new_plan_id(),
            execution_order: resolution.execution_order.clone(),
            critical_path: resolution.critical_path.clone(),
            critical_path_duration: resolution.critical_path_duration,
            execution_levels: resolution.execution_levels.clone(),
            parallel_groups: groups,
            ..AnnotatedRoutingPlan::default()
        };

        for id in &resolution.execution_order {
            let Some(admission) = admissions.remove(id) else {
                continue;
            };
            match (&admission.state, &admission.agent) {
                (TaskAdmissionState::Admitted, Some(agent)) => {
                    plan.assignments.insert(id.clone(), agent.clone());
                }
                _ => plan.validation_failures.push(ValidationFailure {
                    task_id: id.clone(),
                    agents_tried: admission.agents_tried.clone(),
                    reasons: admission.reasons.clone(),
                }),
            }
            plan.admissions.insert(id.clone(), admission);
        }

        info!(
            plan = %plan.plan_id,
            tasks = tasks.len(),
            admitted = plan.assignments.len(),
            rejected = plan.validation_failures.len(),
            "admission plan built"
        );
        Ok(plan)
    }

    /// Admit `chunk` on scoped worker threads. A worker that cannot be spawned
    /// is replaced by admitting its task on the calling thread.
    fn admit_chunk(
        &self,
        chunk: &[&Task],
        level: usize,
        resolution: &DependencyResolutionResult,
        base_plan: &BaseRoutingPlan,
        rejected: &HashSet<String>,
        context: &CallContext,
    ) -> Vec<TaskAdmission> {
        let admit = |task: &Task| {
            self.admit(
                task,
                base_plan.assignments.get(&task.id).cloned(),
                level,
                resolution,
                rejected_prerequisites(task, resolution, rejected),
                context,
            )
        };

        std::thread::scope(|scope| {
            let workers: Vec<_> = chunk
                .iter()
                .map(|&task| {
                    let spawned = std::thread::Builder::new()
                        .name(format!("admit-{}", task.id))
                        .spawn_scoped(scope, move || admit(task));
                    (task, spawned)
                })
                .collect();
            workers
                .into_iter()
                .map(|(task, spawned)| match spawned {
                    Ok(handle) => joined(
                        task,
                        level,
                        base_plan.assignments.get(&task.id).cloned(),
                        handle.join(),
                    ),
                    Err(e) => {
                        warn!(task = %task.id, error = %e, "admission worker not spawned, admitting inline");
                        admit(task)
                    }
                })
                .collect()
        })
    }

    /// Walk one task through the admission state machine.
    fn admit(
        &self,
        task: &Task,
        proposed: Option<String>,
        level: usize,
        resolution: &DependencyResolutionResult,
        blocked_by: Vec<String>,
        context: &CallContext,
    ) -> TaskAdmission {
        let mut admission = TaskAdmission::new(&task.id, proposed.clone(), level);

        let has_prereqs = resolution
            .blocking
            .get(&task.id)
            .is_some_and(|p| !p.is_empty());
        if has_prereqs {
            admission.transition(TaskAdmissionState::DependencyBlocked);
        }

        if !blocked_by.is_empty() {
            admission.reasons.push(format!(
                "strict prerequisite rejected: {}",
                blocked_by.join(", ")
            ));
            admission.transition(TaskAdmissionState::Rejected);
            return admission;
        }

        let Some(candidate) = proposed else {
            admission
                .reasons
                .push("base router assigned no agent".to_owned());
            admission.transition(TaskAdmissionState::Rejected);
            return admission;
        };

        admission.transition(TaskAdmissionState::CandidateAssigned);
        admission.agents_tried.push(candidate.clone());
        match self.validate_agent(&candidate, task, context) {
            Ok(()) => {
                admission.agent = Some(candidate);
                admission.transition(TaskAdmissionState::ToolValidated);
                admission.transition(TaskAdmissionState::Admitted);
                return admission;
            }
            Err(reasons) => admission.reasons.extend(reasons),
        }

        let fallbacks = self
            .catalog
            .get(&candidate)
            .map(|p| p.fallback_agents.clone())
            .unwrap_or_default();
        for fallback in fallbacks {
            if admission.agents_tried.contains(&fallback) {
                continue;
            }
            admission.transition(TaskAdmissionState::FallbackAssigned);
            admission.agents_tried.push(fallback.clone());
            match self.validate_agent(&fallback, task, context) {
                Ok(()) => {
                    debug!(task = %task.id, agent = %fallback, "fallback agent admitted");
                    admission.agent = Some(fallback);
                    admission.fallback_used = true;
                    admission.transition(TaskAdmissionState::ToolValidated);
                    admission.transition(TaskAdmissionState::Admitted);
                    return admission;
                }
                Err(reasons) => admission.reasons.extend(reasons),
            }
        }

        admission.transition(TaskAdmissionState::Rejected);
        admission
    }

    /// Check every required tool for `agent`: router access, then policy
    /// preflight. Neither consumes quota.
    fn validate_agent(
        &self,
        agent: &str,
        task: &Task,
        context: &CallContext,
    ) -> Result<(), Vec<String>> {
        let mut reasons = Vec::new();
        for tool in &task.required_tools {
            let decision = self
                .router
                .validate_tool_access(agent, &task.task_type, tool, context);
            if !decision.is_allowed() {
                reasons.push(format!("{agent}: {tool}: {} ({})", decision.status, decision.reason));
                continue;
            }
            let policy = self.enforcer.preflight(agent, tool);
            if !policy.allowed {
                reasons.push(format!("{agent}: {tool}: {}", policy.reason));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}

/// Strict prerequisites of `task` that were rejected. Agent-level edges count
/// as strict.
fn rejected_prerequisites(
    task: &Task,
    resolution: &DependencyResolutionResult,
    rejected: &HashSet<String>,
) -> Vec<String> {
    let Some(prereqs) = resolution.blocking.get(&task.id) else {
        return Vec::new();
    };
    prereqs
        .iter()
        .filter(|p| rejected.contains(*p))
        .filter(|p| {
            task.dependencies
                .iter()
                .find(|d| &d.task_id == *p)
                .map_or(true, |d| d.kind == DependencyKind::Strict)
        })
        .cloned()
        .collect()
}

/// Admission record of a joined worker. A worker that panicked rejects its
/// task, so dependents are not admitted past it.
fn joined(
    task: &Task,
    level: usize,
    proposed: Option<String>,
    outcome: std::thread::Result<TaskAdmission>,
) -> TaskAdmission {
    match outcome {
        Ok(admission) => admission,
        Err(_) => {
            warn!(task = %task.id, level, "admission worker panicked, rejecting task");
            let mut admission = TaskAdmission::new(&task.id, proposed, level);
            admission
                .reasons
                .push("admission check panicked".to_owned());
            admission.transition(TaskAdmissionState::Rejected);
            admission
        }
    }
}

fn new_plan_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn degradation_reason(resolution: &DependencyResolutionResult) -> String {
    let mut parts: Vec<String> = resolution.errors.clone();
    for cycle in &resolution.cycles {
        parts.push(format!("cycle: {}", cycle.join(" -> ")));
    }
    if parts.is_empty() {
        "dependency resolution failed".to_owned()
    } else {
        parts.join("; ")
    }
}
