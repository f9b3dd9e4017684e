//! Tests for `src/policy/mod.rs`: permission, rule, quota, and PII checks.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use turnstile::audit::AuditSink;
use turnstile::catalog::{AgentDescriptor, Catalog};
use turnstile::policy::{PiiKind, PiiScanner, PolicyEnforcer, PolicyError};

const ANALYST: &str = r#"
agent_id = "analyst"

[capabilities]
allowed_tools = ["web_search", "Read", "Shell", "send_email"]
denied_tools = ["Shell(*)"]

[[action_rules]]
condition = "tool == 'Read' and args.path startswith '/etc'"
action = "deny"
reason = "system files are off limits"

[[action_rules]]
condition = "tool == 'web_search'"
rate_limit = 3

[[action_rules]]
condition = "tool == 'web_search' and args.deep == true"
rate_limit = 1

[safety_constraints]
max_calls_per_session = 100
max_output_length = 20
"#;

const LEAKY: &str = r#"
agent_id = "leaky"

[safety_constraints]
redact_pii = false
max_calls_per_session = 2

[compliance]
log_all_calls = false
"#;

const METERED: &str = r#"
agent_id = "metered"

[[action_rules]]
condition = "tool == 'poll'"
rate_limit = 1

[safety_constraints]
max_calls_per_session = 2
"#;

fn enforcer() -> PolicyEnforcer {
    let descriptors: Vec<AgentDescriptor> = [ANALYST, LEAKY, METERED]
        .iter()
        .map(|d| toml::from_str(d).expect("descriptor should parse"))
        .collect();
    let catalog = Catalog::from_descriptors(descriptors).expect("catalog should build");
    PolicyEnforcer::new(Arc::new(catalog))
}

#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Cursor<Vec<u8>>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("test lock").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().expect("test lock").flush()
    }
}

#[test]
fn wildcard_deny_overrides_allow() {
    let e = enforcer();
    let result = e.check_tool_call("analyst", "Shell(rm)", &json!({}));
    assert!(!result.allowed);
    assert!(matches!(
        result.denial,
        Some(PolicyError::PermissionDenied { .. })
    ));

    let bare = e.check_tool_call("analyst", "Shell", &json!({}));
    assert!(!bare.allowed, "Shell(*) also covers calls without a command");
}

#[test]
fn tools_outside_allow_list_are_denied() {
    let result = enforcer().check_tool_call("analyst", "Write", &json!({"path": "x"}));
    assert!(!result.allowed);
    assert!(result.reason.contains("not in allowed tools"));
}

#[test]
fn deny_rule_reports_its_reason() {
    let e = enforcer();
    let result = e.check_tool_call("analyst", "Read", &json!({"path": "/etc/shadow"}));
    assert!(!result.allowed);
    assert_eq!(
        result.denial,
        Some(PolicyError::RuleDenied {
            tool: "Read".to_owned(),
            reason: "system files are off limits".to_owned(),
        })
    );
    assert!(e.check_tool_call("analyst", "Read", &json!({"path": "notes.md"})).allowed);
}

#[test]
fn hourly_limit_admits_exactly_n_calls() {
    let e = enforcer();
    let start = Instant::now();
    let args = json!({"query": "rust"});

    for expected_remaining in [2, 1, 0] {
        let result = e.check_tool_call_at("analyst", "web_search", &args, start);
        assert!(result.allowed);
        assert_eq!(result.remaining_quota, Some(expected_remaining));
    }

    let denied = e.check_tool_call_at("analyst", "web_search", &args, start + Duration::from_secs(60));
    assert!(!denied.allowed);
    match denied.denial {
        Some(PolicyError::RateLimited {
            limit,
            used,
            retry_after_secs,
            ..
        }) => {
            assert_eq!(limit, 3);
            assert_eq!(used, 3);
            assert!(retry_after_secs > 0 && retry_after_secs <= 3600);
        }
        other => panic!("expected rate limit denial, got {other:?}"),
    }

    let later = e.check_tool_call_at("analyst", "web_search", &args, start + Duration::from_secs(3601));
    assert!(later.allowed, "window has slid past the first calls");
}

#[test]
fn strictest_matching_limit_applies() {
    let e = enforcer();
    let deep = json!({"query": "rust", "deep": true});
    assert!(e.check_tool_call("analyst", "web_search", &deep).allowed);
    assert!(!e.check_tool_call("analyst", "web_search", &deep).allowed);
    assert_eq!(e.remaining_quota("analyst", "web_search", &json!({"query": "x"})), Some(2));
}

#[test]
fn preflight_consumes_nothing() {
    let e = enforcer();
    for _ in 0..10 {
        assert!(e.preflight("analyst", "web_search").allowed);
    }
    assert!(e.history().is_empty());
    assert_eq!(e.remaining_quota("analyst", "web_search", &json!({})), Some(3));
    assert!(!e.preflight("analyst", "Shell(ls)").allowed);
}

#[test]
fn preflight_cannot_see_argument_rules() {
    let e = enforcer();
    assert!(e.preflight("analyst", "Read").allowed);
    let call = e.check_tool_call("analyst", "Read", &json!({"path": "/etc/passwd"}));
    assert!(!call.allowed);
}

#[test]
fn email_is_redacted_and_rescan_is_clean() {
    let e = enforcer();
    let args = json!({"to": "alice@example.com", "body": "see you"});
    let result = e.check_tool_call("analyst", "send_email", &args);

    assert!(result.allowed);
    assert!(result.pii_detected);
    assert_eq!(result.pii_types, vec![PiiKind::Email]);
    let modified = result.modified_args.expect("args should be redacted");
    assert_eq!(modified["to"], "[REDACTED_EMAIL]");
    assert_eq!(modified["body"], "see you");
    assert!(PiiScanner::new().scan_value(&modified).is_empty());
}

#[test]
fn pii_without_redaction_is_flagged_only() {
    let result = enforcer().check_tool_call("leaky", "send_email", &json!({"to": "bob@example.org"}));
    assert!(result.allowed);
    assert!(result.pii_detected);
    assert!(result.modified_args.is_none());
}

#[test]
fn session_allowance_is_enforced() {
    let e = enforcer();
    assert!(e.check_tool_call("leaky", "anything", &json!({})).allowed);
    assert!(e.check_tool_call("leaky", "anything", &json!({})).allowed);
    let third = e.check_tool_call("leaky", "anything", &json!({}));
    assert_eq!(
        third.denial,
        Some(PolicyError::SessionLimit {
            agent: "leaky".to_owned(),
            limit: 2,
        })
    );
}

#[test]
fn concurrent_callers_never_pass_the_session_allowance() {
    let body = "x".repeat(50_000);
    let args = json!({ "body": body });
    for _ in 0..50 {
        let e = enforcer();
        let allowed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| e.check_tool_call("leaky", "t", &args).allowed))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("worker should not panic"))
                .filter(|allowed| *allowed)
                .count()
        });
        assert_eq!(allowed, 2);
    }
}

#[test]
fn concurrent_callers_never_pass_the_rate_limit() {
    let e = enforcer();
    let args = json!({"query": "rust"});
    let allowed = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| e.check_tool_call("analyst", "web_search", &args).allowed))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker should not panic"))
            .filter(|allowed| *allowed)
            .count()
    });
    assert_eq!(allowed, 3);
    assert_eq!(e.remaining_quota("analyst", "web_search", &args), Some(0));
}

#[test]
fn rate_limited_calls_do_not_use_session_allowance() {
    let e = enforcer();
    assert!(e.check_tool_call("metered", "poll", &json!({})).allowed);
    let limited = e.check_tool_call("metered", "poll", &json!({}));
    assert!(matches!(limited.denial, Some(PolicyError::RateLimited { .. })));

    assert!(e.check_tool_call("metered", "fetch", &json!({})).allowed);
    let over = e.check_tool_call("metered", "fetch", &json!({}));
    assert!(matches!(over.denial, Some(PolicyError::SessionLimit { limit: 2, .. })));
}

#[test]
fn agents_without_a_card_are_allowed() {
    let e = enforcer();
    let result = e.check_tool_call("stranger", "Shell(rm -rf /)", &json!({}));
    assert!(result.allowed);
    assert_eq!(e.history().len(), 1);
}

#[test]
fn output_is_redacted_then_truncated() {
    let e = enforcer();
    let out = e.validate_output("analyst", "mail carol@example.com now");
    assert!(out.valid);
    assert!(out.pii_detected);
    assert!(out.truncated);
    assert_eq!(out.output.chars().count(), 20);
    assert!(out.output.starts_with("mail [REDACTED_"));

    let short = e.validate_output("analyst", "fine");
    assert!(short.valid && !short.truncated && short.issues.is_empty());
}

#[test]
fn output_with_pii_is_invalid_when_redaction_is_off() {
    let out = enforcer().validate_output("leaky", "ssn 123-45-6789");
    assert!(!out.valid);
    assert_eq!(out.pii_types, vec![PiiKind::Ssn]);
    assert_eq!(out.output, "ssn 123-45-6789");
}

#[test]
fn stats_summarise_history() {
    let e = enforcer();
    e.check_tool_call("analyst", "Read", &json!({"path": "a"}));
    e.check_tool_call("analyst", "Write", &json!({}));
    e.check_tool_call("analyst", "send_email", &json!({"to": "d@example.com"}));

    let stats = e.stats();
    assert_eq!(stats.total_checks, 3);
    assert_eq!(stats.allowed, 2);
    assert_eq!(stats.denied, 1);
    assert_eq!(stats.pii_detections, 1);
    assert_eq!(stats.by_agent["analyst"], 3);
}

#[test]
fn compliance_log_gets_redacted_summary() {
    let buf = SharedBuf(Arc::new(Mutex::new(Cursor::new(Vec::new()))));
    let e = enforcer()
        .with_summary_length(40)
        .with_compliance_log(AuditSink::from_writer(Box::new(buf.clone())));

    e.check_tool_call("analyst", "send_email", &json!({"to": "erin@example.com"}));
    e.check_tool_call("leaky", "send_email", &json!({"to": "frank@example.com"}));

    let cursor = buf.0.lock().expect("test lock");
    let text = String::from_utf8_lossy(cursor.get_ref()).to_string();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("line should be JSON"))
        .collect();
    assert_eq!(lines.len(), 1, "leaky does not log every call");
    assert_eq!(lines[0]["agent"], "analyst");
    assert_eq!(lines[0]["decision"], "allow");
    assert_eq!(lines[0]["retention_days"], 90);
    let summary = lines[0]["args_summary"].as_str().expect("summary string");
    assert!(summary.contains("[REDACTED_EMAIL]"));
    assert!(!summary.contains("erin@example.com"));
}
