//! Agent descriptor documents and their parsed form.
//!
//! A descriptor is one TOML or JSON file per agent. Every section is optional;
//! missing fields take the defaults below. Parsing turns the raw document into
//! an [`AgentProfile`] whose patterns and rule conditions are already compiled,
//! so malformed descriptors are rejected at load time rather than per call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::pattern::{parse_patterns, PatternError, ToolCall, ToolPattern};
use crate::policy::condition::{Condition, ConditionError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The descriptor file could not be read.
    #[error("failed to read descriptor {path}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The descriptor file is not valid TOML/JSON for the schema.
    #[error("failed to parse descriptor {path}: {message}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The file extension is neither `.toml` nor `.json`.
    #[error("unsupported descriptor format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A tool pattern could not be parsed.
    #[error("agent {agent}: invalid tool pattern: {source}")]
    Pattern {
        /// Agent whose descriptor is malformed.
        agent: String,
        /// Pattern parse error.
        #[source]
        source: PatternError,
    },

    /// An action rule condition could not be parsed.
    #[error("agent {agent}: action rule {index}: {source}")]
    Condition {
        /// Agent whose descriptor is malformed.
        agent: String,
        /// Zero-based rule index.
        index: usize,
        /// Condition parse error.
        #[source]
        source: ConditionError,
    },

    /// A value is out of range or otherwise invalid.
    #[error("agent {agent}: {message}")]
    Invalid {
        /// Agent whose descriptor is malformed (may be empty).
        agent: String,
        /// What is wrong.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Raw descriptor
// ---------------------------------------------------------------------------

/// Raw per-agent descriptor as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Agent identifier.
    pub agent_id: String,
    /// Tool permissions and metadata.
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
    /// Ordering constraints relative to other agents and task types.
    #[serde(default)]
    pub dependencies: AgentDependencies,
    /// Conditional allow/deny rules with optional rate limits.
    #[serde(default)]
    pub action_rules: Vec<ActionRuleSpec>,
    /// Safety limits.
    #[serde(default)]
    pub safety_constraints: SafetyConstraints,
    /// Compliance settings.
    #[serde(default)]
    pub compliance: ComplianceSettings,
    /// Agents to try, in order, when this agent cannot take a task.
    #[serde(default)]
    pub fallback_agents: Vec<String>,
}

impl AgentDescriptor {
    /// A descriptor with only an id; every other section takes its default.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: CapabilitiesSection::default(),
            dependencies: AgentDependencies::default(),
            action_rules: Vec::new(),
            safety_constraints: SafetyConstraints::default(),
            compliance: ComplianceSettings::default(),
            fallback_agents: Vec::new(),
        }
    }
}

/// `capabilities` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSection {
    /// Tool patterns the agent may use.
    pub allowed_tools: Vec<String>,
    /// Tool patterns the agent must never use.
    pub denied_tools: Vec<String>,
    /// Per-tool metadata keyed by tool name.
    pub tool_dependencies: HashMap<String, ToolMetadata>,
}

/// Metadata for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolMetadata {
    /// Named preconditions checked before use.
    pub preconditions: Vec<String>,
    /// Relative cost (0–10 scale).
    pub cost: f64,
    /// Expected latency in milliseconds.
    pub latency_ms: f64,
    /// Historical success rate (0–1).
    pub success_rate: f64,
    /// Task types this tool suits best.
    pub best_for: Vec<String>,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            preconditions: Vec::new(),
            cost: default_tool_cost(),
            latency_ms: default_tool_latency_ms(),
            success_rate: default_tool_success_rate(),
            best_for: Vec::new(),
        }
    }
}

/// `dependencies` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDependencies {
    /// Agents whose tasks must finish before this agent's tasks start.
    pub before_execution: Vec<String>,
    /// Task type → task types that must finish first.
    pub task_dependencies: HashMap<String, Vec<String>>,
}

/// Outcome of a matching action rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Permit (subject to the rule's rate limit).
    #[default]
    Allow,
    /// Block the call.
    Deny,
}

/// Raw `[[action_rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRuleSpec {
    /// Condition in the rule grammar.
    pub condition: String,
    /// Action when the condition holds.
    #[serde(default)]
    pub action: RuleAction,
    /// Human-readable reason reported on denial.
    #[serde(default)]
    pub reason: String,
    /// Maximum matching calls per hour.
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

/// `safety_constraints` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConstraints {
    /// Token ceiling per call.
    pub max_tokens_per_call: u32,
    /// Permitted calls per enforcer session.
    pub max_calls_per_session: u32,
    /// Wall-clock ceiling per call, in seconds.
    pub max_execution_time_secs: u64,
    /// Maximum tool output length, in characters.
    pub max_output_length: usize,
    /// Scan arguments and outputs for PII.
    pub pii_detection: bool,
    /// Replace detected PII with placeholders.
    pub redact_pii: bool,
}

impl Default for SafetyConstraints {
    fn default() -> Self {
        Self {
            max_tokens_per_call: 4000,
            max_calls_per_session: 1000,
            max_execution_time_secs: 300,
            max_output_length: 100_000,
            pii_detection: true,
            redact_pii: true,
        }
    }
}

/// `compliance` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceSettings {
    /// Retention period for compliance records, in days.
    pub data_retention_days: u32,
    /// Write a compliance-log entry for every call.
    #[serde(alias = "audit_logging")]
    pub log_all_calls: bool,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            data_retention_days: 90,
            log_all_calls: true,
        }
    }
}

fn default_tool_cost() -> f64 {
    1.0
}
fn default_tool_latency_ms() -> f64 {
    1000.0
}
fn default_tool_success_rate() -> f64 {
    0.9
}

// ---------------------------------------------------------------------------
// Parsed profile
// ---------------------------------------------------------------------------

/// A tool an agent can use, with routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCapability {
    /// Tool name as declared.
    pub name: String,
    /// Named preconditions.
    pub preconditions: Vec<String>,
    /// Relative cost.
    pub cost: f64,
    /// Expected latency in milliseconds.
    pub latency_ms: f64,
    /// Success rate (0–1).
    pub success_rate: f64,
    /// Task types this tool suits best.
    pub best_for: Vec<String>,
}

impl ToolCapability {
    /// Capability with default metadata, for tools declared without any.
    pub fn unlisted(name: impl Into<String>) -> Self {
        Self::from_metadata(name, &ToolMetadata::default())
    }

    fn from_metadata(name: impl Into<String>, meta: &ToolMetadata) -> Self {
        Self {
            name: name.into(),
            preconditions: meta.preconditions.clone(),
            cost: meta.cost,
            latency_ms: meta.latency_ms,
            success_rate: meta.success_rate,
            best_for: meta.best_for.clone(),
        }
    }

    /// Suitability in `[0, 1]`: weighted success rate, cheapness, and speed.
    pub fn suitability(&self) -> f64 {
        let cost_term = (1.0 - self.cost / 10.0).max(0.0);
        let latency_term = (1.0 - self.latency_ms / 10_000.0).max(0.0);
        0.5 * self.success_rate + 0.3 * cost_term + 0.2 * latency_term
    }

    /// Whether the tool lists `task_type` among its best uses.
    pub fn is_best_for(&self, task_type: &str) -> bool {
        self.best_for.iter().any(|t| t == task_type)
    }
}

/// Which tools an agent may use and what they cost.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    /// Allowed patterns.
    pub allowed: Vec<ToolPattern>,
    /// Denied patterns.
    pub denied: Vec<ToolPattern>,
    /// Per-tool metadata keyed by declared name.
    pub tools: HashMap<String, ToolCapability>,
}

impl CapabilityMap {
    /// First allowed pattern covering the call.
    pub fn declares(&self, tool: &str, command: Option<&str>) -> Option<&ToolPattern> {
        self.allowed.iter().find(|p| p.matches(tool, command))
    }

    /// First denied pattern covering the call.
    pub fn refuses(&self, tool: &str, command: Option<&str>) -> Option<&ToolPattern> {
        self.denied.iter().find(|p| p.matches(tool, command))
    }

    /// Metadata for `tool`, looked up by full name, then by base name.
    pub fn tool(&self, tool: &str) -> Option<&ToolCapability> {
        self.tools
            .get(tool)
            .or_else(|| self.tools.get(ToolCall::split(tool, None).name))
    }
}

/// A compiled action rule.
#[derive(Debug, Clone)]
pub struct ActionRule {
    /// Parsed condition.
    pub condition: Condition,
    /// Action when the condition holds.
    pub action: RuleAction,
    /// Reason reported on denial.
    pub reason: String,
    /// Calls per hour, if limited.
    pub rate_limit: Option<u32>,
}

/// Per-agent authorization and safety document.
#[derive(Debug, Clone, Default)]
pub struct PolicyCard {
    /// Allowed patterns; empty means allow by default.
    pub allowed: Vec<ToolPattern>,
    /// Denied patterns; always checked first.
    pub denied: Vec<ToolPattern>,
    /// Ordered action rules.
    pub rules: Vec<ActionRule>,
    /// Safety limits.
    pub safety: SafetyConstraints,
    /// Compliance settings.
    pub compliance: ComplianceSettings,
}

/// Everything the pipeline knows about one agent.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    /// Agent identifier.
    pub agent_id: String,
    /// Capability map used by the router.
    pub capabilities: CapabilityMap,
    /// Policy card used by the enforcer.
    pub policy: PolicyCard,
    /// Ordering constraints used by the resolver.
    pub dependencies: AgentDependencies,
    /// Fallback agents in preference order.
    pub fallback_agents: Vec<String>,
    /// File the profile was loaded from, if any.
    pub source: Option<PathBuf>,
}

impl AgentProfile {
    /// Compile a raw descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when an id is missing, a pattern or condition
    /// is malformed, or tool metadata is out of range.
    pub fn from_descriptor(descriptor: AgentDescriptor) -> Result<Self, CatalogError> {
        let agent = descriptor.agent_id.trim().to_owned();
        if agent.is_empty() {
            return Err(CatalogError::Invalid {
                agent,
                message: "agent_id must not be empty".to_owned(),
            });
        }

        let caps = &descriptor.capabilities;
        let allowed = parse_patterns(&caps.allowed_tools).map_err(|source| CatalogError::Pattern {
            agent: agent.clone(),
            source,
        })?;
        let denied = parse_patterns(&caps.denied_tools).map_err(|source| CatalogError::Pattern {
            agent: agent.clone(),
            source,
        })?;

        let mut tools = HashMap::with_capacity(caps.tool_dependencies.len());
        for (name, meta) in &caps.tool_dependencies {
            validate_metadata(&agent, name, meta)?;
            tools.insert(name.clone(), ToolCapability::from_metadata(name, meta));
        }

        let mut rules = Vec::with_capacity(descriptor.action_rules.len());
        for (index, spec) in descriptor.action_rules.iter().enumerate() {
            let condition =
                Condition::parse(&spec.condition).map_err(|source| CatalogError::Condition {
                    agent: agent.clone(),
                    index,
                    source,
                })?;
            if spec.rate_limit == Some(0) {
                return Err(CatalogError::Invalid {
                    agent,
                    message: format!("action rule {index}: rate_limit must be positive"),
                });
            }
            rules.push(ActionRule {
                condition,
                action: spec.action,
                reason: spec.reason.clone(),
                rate_limit: spec.rate_limit,
            });
        }

        Ok(Self {
            capabilities: CapabilityMap {
                allowed: allowed.clone(),
                denied: denied.clone(),
                tools,
            },
            policy: PolicyCard {
                allowed,
                denied,
                rules,
                safety: descriptor.safety_constraints,
                compliance: descriptor.compliance,
            },
            dependencies: descriptor.dependencies,
            fallback_agents: descriptor.fallback_agents,
            source: None,
            agent_id: agent,
        })
    }
}

fn validate_metadata(agent: &str, tool: &str, meta: &ToolMetadata) -> Result<(), CatalogError> {
    let invalid = |message: String| CatalogError::Invalid {
        agent: agent.to_owned(),
        message,
    };
    if !(0.0..=1.0).contains(&meta.success_rate) {
        return Err(invalid(format!(
            "tool {tool}: success_rate {} outside 0..=1",
            meta.success_rate
        )));
    }
    if meta.cost < 0.0 || !meta.cost.is_finite() {
        return Err(invalid(format!("tool {tool}: cost must be non-negative")));
    }
    if meta.latency_ms < 0.0 || !meta.latency_ms.is_finite() {
        return Err(invalid(format!("tool {tool}: latency_ms must be non-negative")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// File parsing
// ---------------------------------------------------------------------------

/// Whether `path` has a descriptor extension.
pub fn is_descriptor_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("json")
    )
}

/// Read and parse one descriptor file.
///
/// # Errors
///
/// Returns [`CatalogError`] on I/O failure, unsupported extension, or a
/// document that does not match the schema.
pub fn parse_descriptor_file(path: &Path) -> Result<AgentDescriptor, CatalogError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_descriptor_str(path, &contents)
}

/// Parse descriptor text, choosing the format from `path`'s extension.
///
/// # Errors
///
/// Returns [`CatalogError::Parse`] or [`CatalogError::UnsupportedFormat`].
pub fn parse_descriptor_str(path: &Path, contents: &str) -> Result<AgentDescriptor, CatalogError> {
    let parse_err = |message: String| CatalogError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(contents).map_err(|e| parse_err(e.to_string())),
        Some("json") => serde_json::from_str(contents).map_err(|e| parse_err(e.to_string())),
        _ => Err(CatalogError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Read, parse, and compile one descriptor file.
///
/// # Errors
///
/// Returns [`CatalogError`] for any read, parse, or validation failure.
pub fn load_profile(path: &Path) -> Result<AgentProfile, CatalogError> {
    let descriptor = parse_descriptor_file(path)?;
    let mut profile = AgentProfile::from_descriptor(descriptor)?;
    profile.source = Some(path.to_path_buf());
    Ok(profile)
}
