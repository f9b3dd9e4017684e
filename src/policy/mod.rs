//! Policy enforcement for tool calls.
//!
//! [`PolicyEnforcer::check_tool_call`] re-checks permissions (deny overrides
//! allow), evaluates the agent's action rules with sliding-window rate limits,
//! scans arguments for PII, and records every decision. Agents without a
//! policy card are not managed and are allowed.

pub mod condition;
pub mod pii;
pub mod rate_limit;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::catalog::{Catalog, PolicyCard, RuleAction, ToolCall};
use crate::config::PolicyConfig;

pub use condition::{Condition, ConditionEnv, ConditionError};
pub use pii::{PiiKind, PiiScanner};
pub use rate_limit::{QuotaStatus, RateLimiter};

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Why a call was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A denied pattern matched, or the allow list did not.
    #[error("permission denied for tool {tool}: {reason}")]
    PermissionDenied {
        /// Tool as called.
        tool: String,
        /// Which pattern decided.
        reason: String,
    },

    /// A matching action rule denies the call.
    #[error("action rule denied tool {tool}: {reason}")]
    RuleDenied {
        /// Tool as called.
        tool: String,
        /// The rule's reason.
        reason: String,
    },

    /// The hourly quota for (agent, tool) is used up.
    #[error("rate limit exceeded for tool {tool}: {used}/{limit} calls in window, retry in {retry_after_secs}s")]
    RateLimited {
        /// Tool as rate-limited.
        tool: String,
        /// Strictest matching limit.
        limit: u32,
        /// Calls already in the window.
        used: u32,
        /// Seconds until a slot frees up.
        retry_after_secs: u64,
    },

    /// The agent used up its per-session call allowance.
    #[error("session call limit reached for agent {agent} ({limit} calls)")]
    SessionLimit {
        /// Agent over its allowance.
        agent: String,
        /// Configured `max_calls_per_session`.
        limit: u32,
    },
}

/// Outcome of [`PolicyEnforcer::check_tool_call`].
#[derive(Debug, Clone, Serialize)]
pub struct PolicyResult {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Human-readable explanation.
    pub reason: String,
    /// Redacted copy of the arguments when PII was found and redaction is on.
    pub modified_args: Option<Value>,
    /// Whether PII was found in the arguments.
    pub pii_detected: bool,
    /// PII categories found.
    pub pii_types: Vec<PiiKind>,
    /// Calls left under the strictest matching rate limit, if any applies.
    pub remaining_quota: Option<u32>,
    /// Structured denial, when refused.
    #[serde(skip)]
    pub denial: Option<PolicyError>,
}

impl PolicyResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            modified_args: None,
            pii_detected: false,
            pii_types: Vec::new(),
            remaining_quota: None,
            denial: None,
        }
    }

    fn deny(error: PolicyError) -> Self {
        Self {
            allowed: false,
            reason: error.to_string(),
            modified_args: None,
            pii_detected: false,
            pii_types: Vec::new(),
            remaining_quota: None,
            denial: Some(error),
        }
    }
}

/// Outcome of [`PolicyEnforcer::validate_output`].
#[derive(Debug, Clone, Serialize)]
pub struct OutputValidation {
    /// False when PII was found but the card does not allow redacting it.
    pub valid: bool,
    /// Output to hand on: redacted and truncated as the card requires.
    pub output: String,
    /// Whether PII was found.
    pub pii_detected: bool,
    /// PII categories found.
    pub pii_types: Vec<PiiKind>,
    /// Whether the output was cut to `max_output_length`.
    pub truncated: bool,
    /// Everything worth reporting about the output.
    pub issues: Vec<String>,
}

/// One checked call.
#[derive(Debug, Clone, Serialize)]
pub struct CallHistoryEntry {
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Calling agent.
    pub agent: String,
    /// Tool as called.
    pub tool: String,
    /// Outcome.
    pub allowed: bool,
    /// Explanation.
    pub reason: String,
    /// Whether the arguments carried PII.
    pub pii_detected: bool,
}

/// Aggregate counts over the call history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyStats {
    /// Checks recorded.
    pub total_checks: usize,
    /// Allowed checks.
    pub allowed: usize,
    /// Denied checks.
    pub denied: usize,
    /// Checks whose arguments carried PII.
    pub pii_detections: usize,
    /// Checks per agent.
    pub by_agent: BTreeMap<String, usize>,
}

/// Compliance-log line. Arguments appear only as a redacted, truncated summary.
#[derive(Debug, Serialize)]
struct ComplianceRecord<'a> {
    timestamp: String,
    agent: &'a str,
    tool: &'a str,
    decision: &'static str,
    reason: &'a str,
    pii_detected: bool,
    pii_types: &'a [PiiKind],
    args_summary: String,
    retention_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Enforce,
    Preflight,
}

// ---------------------------------------------------------------------------
// Enforcer
// ---------------------------------------------------------------------------

/// Default length of the argument summary in compliance records.
pub const DEFAULT_SUMMARY_LENGTH: usize = 200;

/// Checks tool calls against policy cards. Owns all cross-call state.
#[derive(Debug)]
pub struct PolicyEnforcer {
    catalog: Arc<Catalog>,
    limiter: RateLimiter,
    scanner: PiiScanner,
    history: Mutex<Vec<CallHistoryEntry>>,
    session_calls: Mutex<HashMap<String, u32>>,
    compliance: Option<AuditSink>,
    summary_length: usize,
}

impl PolicyEnforcer {
    /// Enforcer with a one-hour rate window and no compliance log.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            limiter: RateLimiter::default(),
            scanner: PiiScanner::new(),
            history: Mutex::new(Vec::new()),
            session_calls: Mutex::new(HashMap::new()),
            compliance: None,
            summary_length: DEFAULT_SUMMARY_LENGTH,
        }
    }

    /// Enforcer configured from the `[policy]` section.
    pub fn from_config(catalog: Arc<Catalog>, config: &PolicyConfig) -> Self {
        Self::new(catalog)
            .with_rate_window(Duration::from_secs(config.rate_window_secs))
            .with_summary_length(config.summary_length)
    }

    /// Override the rate-limit window.
    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.limiter = RateLimiter::new(window);
        self
    }

    /// Override the compliance argument-summary length.
    pub fn with_summary_length(mut self, length: usize) -> Self {
        self.summary_length = length;
        self
    }

    /// Write compliance records to `sink`.
    pub fn with_compliance_log(mut self, sink: AuditSink) -> Self {
        self.compliance = Some(sink);
        self
    }

    /// Catalog the enforcer reads policy cards from.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Check and record a tool call.
    pub fn check_tool_call(&self, agent: &str, tool: &str, args: &Value) -> PolicyResult {
        self.check_tool_call_at(agent, tool, args, Instant::now())
    }

    /// [`check_tool_call`](Self::check_tool_call) with an explicit clock.
    pub fn check_tool_call_at(
        &self,
        agent: &str,
        tool: &str,
        args: &Value,
        now: Instant,
    ) -> PolicyResult {
        let profile = self.catalog.get(agent);
        let card = profile.as_ref().map(|p| &p.policy);
        let result = self.evaluate(agent, card, tool, args, now, Mode::Enforce);

        if result.allowed {
            debug!(agent, tool, pii = result.pii_detected, "tool call allowed");
        } else {
            info!(agent, tool, reason = %result.reason, "tool call denied");
        }

        self.record_history(agent, tool, &result);
        if let Some(card) = card {
            if card.compliance.log_all_calls {
                self.write_compliance(agent, tool, args, card, &result);
            }
        }
        result
    }

    /// Permission, rule, session, and quota checks without recording anything
    /// or consuming quota.
    ///
    /// Rules are evaluated against empty arguments: conditions on `args` never
    /// match here, and `command` is only known when the tool name carries it
    /// (`Shell(rm -rf)`). Argument-based deny rules therefore only fire in
    /// [`check_tool_call`](Self::check_tool_call).
    pub fn preflight(&self, agent: &str, tool: &str) -> PolicyResult {
        let profile = self.catalog.get(agent);
        let args = Value::Object(serde_json::Map::new());
        self.evaluate(
            agent,
            profile.as_ref().map(|p| &p.policy),
            tool,
            &args,
            Instant::now(),
            Mode::Preflight,
        )
    }

    /// Calls left under the strictest rate limit matching this call, or `None`
    /// if no limited rule applies.
    pub fn remaining_quota(&self, agent: &str, tool: &str, args: &Value) -> Option<u32> {
        let profile = self.catalog.get(agent)?;
        let call = split_call(tool, args);
        let (_, limit) = match_rules(&profile.policy, agent, call, args);
        let limit = limit?;
        Some(
            self.limiter
                .remaining(agent, call.name, limit, Instant::now()),
        )
    }

    /// Apply the card's PII and length rules to a tool's output.
    pub fn validate_output(&self, agent: &str, output: &str) -> OutputValidation {
        let Some(profile) = self.catalog.get(agent) else {
            return OutputValidation {
                valid: true,
                output: output.to_owned(),
                pii_detected: false,
                pii_types: Vec::new(),
                truncated: false,
                issues: Vec::new(),
            };
        };
        let safety = &profile.policy.safety;
        let mut issues = Vec::new();
        let mut valid = true;
        let mut text = output.to_owned();
        let mut pii_types = Vec::new();

        if safety.pii_detection {
            let (redacted, found) = self.scanner.analyze(&text);
            if !found.is_empty() {
                let labels: Vec<&str> = found.iter().map(|k| k.as_str()).collect();
                if safety.redact_pii {
                    issues.push(format!("redacted PII: {}", labels.join(", ")));
                    text = redacted;
                } else {
                    issues.push(format!("output contains PII: {}", labels.join(", ")));
                    valid = false;
                }
                pii_types = found;
            }
        }

        let length = text.chars().count();
        let truncated = length > safety.max_output_length;
        if truncated {
            text = text.chars().take(safety.max_output_length).collect();
            issues.push(format!(
                "output truncated from {length} to {} characters",
                safety.max_output_length
            ));
        }

        if !issues.is_empty() {
            debug!(agent, valid, ?issues, "output validated");
        }
        OutputValidation {
            valid,
            output: text,
            pii_detected: !pii_types.is_empty(),
            pii_types,
            truncated,
            issues,
        }
    }

    /// Snapshot of the call history.
    pub fn history(&self) -> Vec<CallHistoryEntry> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Aggregate statistics over the call history.
    pub fn stats(&self) -> PolicyStats {
        let Ok(history) = self.history.lock() else {
            return PolicyStats::default();
        };
        let mut stats = PolicyStats {
            total_checks: history.len(),
            ..PolicyStats::default()
        };
        for entry in history.iter() {
            if entry.allowed {
                stats.allowed = stats.allowed.saturating_add(1);
            } else {
                stats.denied = stats.denied.saturating_add(1);
            }
            if entry.pii_detected {
                stats.pii_detections = stats.pii_detections.saturating_add(1);
            }
            let count = stats.by_agent.entry(entry.agent.clone()).or_default();
            *count = count.saturating_add(1);
        }
        stats
    }

    // -- internals ----------------------------------------------------------

    fn evaluate(
        &self,
        agent: &str,
        card: Option<&PolicyCard>,
        tool: &str,
        args: &Value,
        now: Instant,
        mode: Mode,
    ) -> PolicyResult {
        let Some(card) = card else {
            return PolicyResult::allow("no policy card for agent; allowed by default");
        };
        let call = split_call(tool, args);

        if let Some(pattern) = card.denied.iter().find(|p| p.matches(tool, call.argument)) {
            return PolicyResult::deny(PolicyError::PermissionDenied {
                tool: tool.to_owned(),
                reason: format!("matches denied pattern '{pattern}'"),
            });
        }
        if !card.allowed.is_empty() && !card.allowed.iter().any(|p| p.matches(tool, call.argument))
        {
            return PolicyResult::deny(PolicyError::PermissionDenied {
                tool: tool.to_owned(),
                reason: "not in allowed tools".to_owned(),
            });
        }

        let (denied_by, limit) = match_rules(card, agent, call, args);
        if let Some(reason) = denied_by {
            return PolicyResult::deny(PolicyError::RuleDenied {
                tool: tool.to_owned(),
                reason,
            });
        }

        let session_limit = card.safety.max_calls_per_session;
        match mode {
            Mode::Enforce => {
                if let Err(e) = self.reserve_session(agent, session_limit) {
                    return PolicyResult::deny(e);
                }
            }
            Mode::Preflight => {
                if self.session_count(agent) >= session_limit {
                    return PolicyResult::deny(PolicyError::SessionLimit {
                        agent: agent.to_owned(),
                        limit: session_limit,
                    });
                }
            }
        }

        let mut remaining_quota = None;
        if let Some(limit) = limit {
            match mode {
                Mode::Enforce => {
                    match self.limiter.check_and_record(agent, call.name, limit, now) {
                        Ok(status) => remaining_quota = Some(status.remaining),
                        Err(e) => {
                            self.release_session(agent);
                            return PolicyResult::deny(e);
                        }
                    }
                }
                Mode::Preflight => {
                    let used = self.limiter.usage(agent, call.name, now);
                    if used >= limit {
                        return PolicyResult::deny(PolicyError::RateLimited {
                            tool: call.name.to_owned(),
                            limit,
                            used,
                            retry_after_secs: self.limiter.window().as_secs(),
                        });
                    }
                    remaining_quota = Some(limit.saturating_sub(used));
                }
            }
        }

        let mut result = PolicyResult::allow("allowed by policy");
        result.remaining_quota = remaining_quota;

        if card.safety.pii_detection {
            let found = self.scanner.scan_value(args);
            if !found.is_empty() {
                result.pii_detected = true;
                if card.safety.redact_pii {
                    result.modified_args = Some(self.scanner.redact_value(args));
                    result.reason = "allowed with PII redacted".to_owned();
                } else {
                    result.reason = "allowed; arguments contain PII".to_owned();
                }
                result.pii_types = found;
            }
        }
        result
    }

    fn session_count(&self, agent: &str) -> u32 {
        match self.session_calls.lock() {
            Ok(counts) => counts.get(agent).copied().unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "session counter lock poisoned");
                u32::MAX
            }
        }
    }

    /// Take one session slot for `agent`, under the same guard as the check.
    fn reserve_session(&self, agent: &str, limit: u32) -> Result<(), PolicyError> {
        let denied = || PolicyError::SessionLimit {
            agent: agent.to_owned(),
            limit,
        };
        let mut counts = self.session_calls.lock().map_err(|e| {
            warn!(error = %e, "session counter lock poisoned");
            denied()
        })?;
        let used = counts.entry(agent.to_owned()).or_default();
        if *used >= limit {
            return Err(denied());
        }
        *used = used.saturating_add(1);
        Ok(())
    }

    /// Give back a slot taken by a call that a later check refused.
    fn release_session(&self, agent: &str) {
        match self.session_calls.lock() {
            Ok(mut counts) => {
                if let Some(used) = counts.get_mut(agent) {
                    *used = used.saturating_sub(1);
                }
            }
            Err(e) => warn!(error = %e, "session counter lock poisoned"),
        }
    }

    fn record_history(&self, agent: &str, tool: &str, result: &PolicyResult) {
        let entry = CallHistoryEntry {
            timestamp: Utc::now(),
            agent: agent.to_owned(),
            tool: tool.to_owned(),
            allowed: result.allowed,
            reason: result.reason.clone(),
            pii_detected: result.pii_detected,
        };
        match self.history.lock() {
            Ok(mut history) => history.push(entry),
            Err(e) => warn!(error = %e, "history lock poisoned"),
        }
    }

    fn write_compliance(
        &self,
        agent: &str,
        tool: &str,
        args: &Value,
        card: &PolicyCard,
        result: &PolicyResult,
    ) {
        let Some(sink) = &self.compliance else {
            return;
        };
        let summary = self.scanner.redact_value(args).to_string();
        let record = ComplianceRecord {
            timestamp: Utc::now().to_rfc3339(),
            agent,
            tool,
            decision: if result.allowed { "allow" } else { "deny" },
            reason: &result.reason,
            pii_detected: result.pii_detected,
            pii_types: &result.pii_types,
            args_summary: truncate_chars(&summary, self.summary_length),
            retention_days: card.compliance.data_retention_days,
        };
        if let Err(e) = sink.write_record(&record) {
            warn!(error = %e, agent, tool, "failed to write compliance record");
        }
    }
}

/// Split a call into base name and command, taking the command from
/// `args.command` when the tool name is not parameterized.
fn split_call<'a>(tool: &'a str, args: &'a Value) -> ToolCall<'a> {
    ToolCall::split(tool, args.get("command").and_then(Value::as_str))
}

/// Evaluate action rules in order: the first matching deny rule's reason, and
/// the strictest rate limit among matching rules.
fn match_rules(
    card: &PolicyCard,
    agent: &str,
    call: ToolCall<'_>,
    args: &Value,
) -> (Option<String>, Option<u32>) {
    let env = ConditionEnv {
        tool: call.name,
        command: call.argument,
        agent,
        args,
    };
    let mut limit: Option<u32> = None;
    for rule in &card.rules {
        if !rule.condition.evaluate(&env) {
            continue;
        }
        if rule.action == RuleAction::Deny {
            let reason = if rule.reason.is_empty() {
                format!("condition '{}' matched", rule.condition)
            } else {
                rule.reason.clone()
            };
            return (Some(reason), None);
        }
        if let Some(rule_limit) = rule.rate_limit {
            limit = Some(limit.map_or(rule_limit, |l| l.min(rule_limit)));
        }
    }
    (None, limit)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push('…');
    cut
}
