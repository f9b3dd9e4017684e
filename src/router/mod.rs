//! Capability-based routing of tool calls.
//!
//! [`CapabilityRouter::route_tool_call`] runs the checks in a fixed order and
//! stops at the first failure:
//!
//! 1. capability match (denied pattern ⇒ fallback, undeclared ⇒ denied)
//! 2. preconditions
//! 3. input validation
//! 4. safety vetoes
//! 5. default-parameter expansion
//! 6. suitability scoring
//!
//! Every terminal decision is appended to the [`DecisionLog`].

pub mod decision_log;
pub mod preconditions;
pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::catalog::{AgentProfile, Catalog, ToolCall, ToolCapability};
use crate::config::RouterConfig;

pub use decision_log::{DecisionLog, DecisionRecord};
pub use preconditions::{
    CallContext, PreconditionCheck, PreconditionRegistry, ToolInvocation,
    UnknownPreconditionPolicy,
};
pub use validation::ToolFamily;

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Verdict of a routing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    /// The agent may make the call.
    Allowed,
    /// The call is refused.
    Denied,
    /// The agent refuses the tool; delegate to the suggested agent.
    RequiresFallback,
    /// One or more preconditions failed.
    MissingDependency,
}

impl DecisionStatus {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Denied => "DENIED",
            Self::RequiresFallback => "REQUIRES_FALLBACK",
            Self::MissingDependency => "MISSING_DEPENDENCY",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of routing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Verdict.
    pub status: DecisionStatus,
    /// Tool the decision is about.
    pub tool: String,
    /// Human-readable explanation.
    pub reason: String,
    /// Agent to delegate to, when one is known.
    pub fallback_agent: Option<String>,
    /// Arguments after default expansion (only set when allowed).
    pub args: Value,
    /// Preconditions that failed.
    pub failed_preconditions: Vec<String>,
    /// Suitability score in `[0, 1]`.
    pub score: f64,
}

impl RoutingDecision {
    fn new(status: DecisionStatus, tool: &str, reason: impl Into<String>) -> Self {
        Self {
            status,
            tool: tool.to_owned(),
            reason: reason.into(),
            fallback_agent: None,
            args: Value::Null,
            failed_preconditions: Vec::new(),
            score: 0.0,
        }
    }

    /// Whether the call may proceed.
    pub fn is_allowed(&self) -> bool {
        self.status == DecisionStatus::Allowed
    }
}

/// A declared tool ranked for a task type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTool {
    /// Tool name.
    pub tool: String,
    /// Suitability score.
    pub score: f64,
    /// Whether the tool lists the task type among its best uses.
    pub best_for: bool,
}

/// Decision counts since the router was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Decisions made.
    pub total: usize,
    /// Decisions per status.
    pub by_status: BTreeMap<DecisionStatus, usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes tool calls against agent capability maps.
#[derive(Debug)]
pub struct CapabilityRouter {
    catalog: Arc<Catalog>,
    preconditions: PreconditionRegistry,
    log: DecisionLog,
    default_fallback_agent: Option<String>,
    stats: Mutex<RouterStats>,
}

impl CapabilityRouter {
    /// Router with built-in preconditions and an in-memory decision log.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_parts(
            catalog,
            PreconditionRegistry::default(),
            DecisionLog::in_memory(100),
            None,
        )
    }

    /// Router configured from the `[router]` section, logging to `sink`.
    pub fn from_config(catalog: Arc<Catalog>, config: &RouterConfig, sink: Option<AuditSink>) -> Self {
        let log = match sink {
            Some(sink) => DecisionLog::with_sink(sink, config.flush_every),
            None => DecisionLog::in_memory(config.flush_every),
        };
        Self::with_parts(
            catalog,
            PreconditionRegistry::new(config.unknown_preconditions),
            log,
            config.default_fallback_agent.clone(),
        )
    }

    /// Router from explicit parts.
    pub fn with_parts(
        catalog: Arc<Catalog>,
        preconditions: PreconditionRegistry,
        log: DecisionLog,
        default_fallback_agent: Option<String>,
    ) -> Self {
        Self {
            catalog,
            preconditions,
            log,
            default_fallback_agent,
            stats: Mutex::new(RouterStats::default()),
        }
    }

    /// Precondition registry, e.g. to register custom checks before use.
    pub fn preconditions_mut(&mut self) -> &mut PreconditionRegistry {
        &mut self.preconditions
    }

    /// Decision log.
    pub fn decision_log(&self) -> &DecisionLog {
        &self.log
    }

    /// Run the full check sequence for one call.
    pub fn route_tool_call(
        &self,
        agent: &str,
        task_type: &str,
        tool: &str,
        args: &Value,
        ctx: &CallContext,
    ) -> RoutingDecision {
        let decision = self.route_inner(agent, task_type, tool, args, ctx);
        self.finish(agent, task_type, tool, decision)
    }

    /// Capability and precondition checks only, for admission planning.
    pub fn validate_tool_access(
        &self,
        agent: &str,
        task_type: &str,
        tool: &str,
        ctx: &CallContext,
    ) -> RoutingDecision {
        let decision = match self.capability(agent, tool, None) {
            Err(decision) => decision,
            Ok(capability) => match self.check_preconditions(&capability, tool, ctx) {
                Some(decision) => decision,
                None => {
                    let mut decision = RoutingDecision::new(
                        DecisionStatus::Allowed,
                        tool,
                        "capability and preconditions satisfied",
                    );
                    decision.score = capability.suitability();
                    decision
                }
            },
        };
        self.finish(agent, task_type, tool, decision)
    }

    /// Declared tools ordered by best-for match, then suitability, then name.
    /// Tools the agent also refuses are left out.
    pub fn rank_tools(&self, agent: &str, task_type: &str) -> Vec<RankedTool> {
        let Some(profile) = self.catalog.get(agent) else {
            return Vec::new();
        };
        let mut ranked: Vec<RankedTool> = profile
            .capabilities
            .tools
            .values()
            .filter(|cap| profile.capabilities.refuses(&cap.name, None).is_none())
            .map(|cap| RankedTool {
                tool: cap.name.clone(),
                score: cap.suitability(),
                best_for: cap.is_best_for(task_type),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.best_for
                .cmp(&a.best_for)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.tool.cmp(&b.tool))
        });
        ranked
    }

    /// Best-ranked tool whose capability and preconditions pass.
    pub fn select_tool(&self, agent: &str, task_type: &str, ctx: &CallContext) -> Option<String> {
        self.rank_tools(agent, task_type)
            .into_iter()
            .find(|ranked| {
                self.validate_tool_access(agent, task_type, &ranked.tool, ctx)
                    .is_allowed()
            })
            .map(|ranked| ranked.tool)
    }

    /// Decision counts so far.
    pub fn stats(&self) -> RouterStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => RouterStats::default(),
        }
    }

    /// Forget cached precondition results.
    pub fn clear_precondition_cache(&self) {
        self.preconditions.clear_cache();
    }

    // -- internals ----------------------------------------------------------

    fn route_inner(
        &self,
        agent: &str,
        task_type: &str,
        tool: &str,
        args: &Value,
        ctx: &CallContext,
    ) -> RoutingDecision {
        let command = validation::shell_command(tool, args);
        let capability = match self.capability(agent, tool, command) {
            Ok(capability) => capability,
            Err(decision) => return decision,
        };

        if let Some(decision) = self.check_preconditions(&capability, tool, ctx) {
            return decision;
        }

        if let Err(reason) = validation::validate_input(tool, args) {
            return RoutingDecision::new(DecisionStatus::Denied, tool, reason);
        }

        if let Some(reason) = validation::safety_veto(tool, args, ctx) {
            warn!(agent, tool, reason = %reason, "safety veto");
            return RoutingDecision::new(DecisionStatus::Denied, tool, format!("safety veto: {reason}"));
        }

        let mut decision = RoutingDecision::new(
            DecisionStatus::Allowed,
            tool,
            format!("{agent} may use {tool} for {task_type}"),
        );
        decision.args = validation::expand_params(tool, args);
        decision.score = capability.suitability();
        decision
    }

    /// Capability metadata for the call, or the refusing decision.
    fn capability(
        &self,
        agent: &str,
        tool: &str,
        command: Option<&str>,
    ) -> Result<ToolCapability, RoutingDecision> {
        let base = ToolCall::split(tool, None).name;
        let Some(profile) = self.catalog.get(agent) else {
            debug!(agent, tool, "agent not in catalog, not capability-restricted");
            return Ok(ToolCapability::unlisted(base));
        };
        let caps = &profile.capabilities;

        if let Some(pattern) = caps.refuses(tool, command) {
            let mut decision = RoutingDecision::new(
                DecisionStatus::RequiresFallback,
                tool,
                format!("{agent} refuses {tool} (denied pattern '{pattern}')"),
            );
            decision.fallback_agent = self.fallback_for(&profile);
            return Err(decision);
        }

        let declared = caps.declares(tool, command).is_some() || caps.tool(tool).is_some();
        if !declared {
            let mut decision = RoutingDecision::new(
                DecisionStatus::Denied,
                tool,
                format!("{agent} does not declare {tool}"),
            );
            decision.fallback_agent = self.fallback_for(&profile);
            return Err(decision);
        }

        Ok(caps
            .tool(tool)
            .cloned()
            .unwrap_or_else(|| ToolCapability::unlisted(base)))
    }

    fn check_preconditions(
        &self,
        capability: &ToolCapability,
        tool: &str,
        ctx: &CallContext,
    ) -> Option<RoutingDecision> {
        let failed = self
            .preconditions
            .failed(&capability.name, &capability.preconditions, ctx);
        if failed.is_empty() {
            return None;
        }
        let mut decision = RoutingDecision::new(
            DecisionStatus::MissingDependency,
            tool,
            format!("unmet preconditions: {}", failed.join(", ")),
        );
        decision.failed_preconditions = failed;
        Some(decision)
    }

    fn fallback_for(&self, profile: &AgentProfile) -> Option<String> {
        profile
            .fallback_agents
            .first()
            .cloned()
            .or_else(|| self.default_fallback_agent.clone())
    }

    fn finish(
        &self,
        agent: &str,
        task_type: &str,
        tool: &str,
        decision: RoutingDecision,
    ) -> RoutingDecision {
        debug!(agent, tool, status = %decision.status, "routing decision");
        if let Ok(mut stats) = self.stats.lock() {
            stats.total = stats.total.saturating_add(1);
            let count = stats.by_status.entry(decision.status).or_default();
            *count = count.saturating_add(1);
        }
        self.log
            .record(DecisionRecord::new(agent, tool, task_type, decision.clone()));
        decision
    }
}
