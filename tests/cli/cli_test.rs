//! CLI contract tests: subcommands, JSON output, and exit codes.

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const CODER: &str = r#"
agent_id = "coder"
fallback_agents = ["generalist"]

[capabilities]
allowed_tools = ["Read", "Shell", "send_email"]
denied_tools = ["Shell(rm *)"]
"#;

const GENERALIST: &str = r#"
agent_id = "generalist"

[capabilities]
allowed_tools = ["Read", "Write"]
"#;

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().expect("should create temp dir");
        let agents = tmp.path().join("agents");
        std::fs::create_dir_all(&agents).expect("should create agents dir");
        std::fs::write(agents.join("coder.toml"), CODER).expect("should write");
        std::fs::write(agents.join("generalist.toml"), GENERALIST).expect("should write");
        Self { tmp }
    }

    fn path(&self) -> &Path {
        self.tmp.path()
    }

    fn write(&self, name: &str, contents: &str) -> String {
        let path = self.path().join(name);
        std::fs::write(&path, contents).expect("should write");
        path.display().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("turnstile").expect("binary should build");
        cmd.env("HOME", self.path())
            .env("TURNSTILE_CONFIG_PATH", self.path().join("config.toml"))
            .env_remove("RUST_LOG")
            .env_remove("TURNSTILE_CATALOG_DIR")
            .arg("--catalog")
            .arg(self.path().join("agents"));
        cmd
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn resolve_prints_order_and_succeeds() {
    let ws = Workspace::new();
    let tasks = ws.write(
        "tasks.json",
        r#"[
            {"id": "A", "task_type": "research", "priority": "high"},
            {"id": "B", "task_type": "writing", "dependencies": [{"task_id": "A"}]},
            {"id": "C", "task_type": "review", "priority": "critical",
             "dependencies": [{"task_id": "A"}]}
        ]"#,
    );
    let output = ws
        .cmd()
        .args(["resolve", &tasks])
        .output()
        .expect("should run");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["is_valid"], true);
    assert_eq!(json["execution_order"], serde_json::json!(["A", "C", "B"]));
}

#[test]
fn resolve_exits_one_on_cycle() {
    let ws = Workspace::new();
    let tasks = ws.write(
        "tasks.toml",
        r#"
[[tasks]]
id = "a"
task_type = "research"
dependencies = [{ task_id = "b" }]

[[tasks]]
id = "b"
task_type = "writing"
dependencies = [{ task_id = "a" }]
"#,
    );
    let output = ws
        .cmd()
        .args(["resolve", &tasks])
        .output()
        .expect("should run");
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["is_valid"], false);
    assert_eq!(json["cycles"].as_array().map(Vec::len), Some(1));
}

#[test]
fn route_reports_fallback_for_denied_command() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .args(["route", "--agent", "coder", "--tool", "Shell(rm -rf build)"])
        .output()
        .expect("should run");
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["status"], "REQUIRES_FALLBACK");
    assert_eq!(json["fallback_agent"], "generalist");
}

#[test]
fn route_allows_declared_tool_and_writes_decision_log() {
    let ws = Workspace::new();
    ws.cmd()
        .args([
            "route",
            "--agent",
            "coder",
            "--tool",
            "Read",
            "--args",
            r#"{"path": "README.md"}"#,
        ])
        .assert()
        .success();

    let log = ws
        .path()
        .join(".turnstile")
        .join("logs")
        .join("decisions.jsonl");
    let text = std::fs::read_to_string(&log).expect("decision log should exist");
    assert!(text.contains("\"ALLOWED\""));
}

#[test]
fn check_redacts_email_arguments() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .args([
            "check",
            "--agent",
            "coder",
            "--tool",
            "send_email",
            "--args",
            r#"{"to": "alice@example.com"}"#,
        ])
        .output()
        .expect("should run");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["pii_detected"], true);
    assert_eq!(json["modified_args"]["to"], "[REDACTED_EMAIL]");
}

#[test]
fn plan_uses_fallback_and_default_agent() {
    let ws = Workspace::new();
    let tasks = ws.write(
        "tasks.json",
        r#"{"tasks": [
            {"id": "fetch", "task_type": "research", "agent": "coder",
             "required_tools": ["Write"]},
            {"id": "read", "task_type": "review", "required_tools": ["Read"],
             "dependencies": [{"task_id": "fetch"}]}
        ]}"#,
    );
    let output = ws
        .cmd()
        .args(["plan", &tasks, "--default-agent", "coder"])
        .output()
        .expect("should run");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["assignments"]["fetch"], "generalist");
    assert_eq!(json["assignments"]["read"], "coder");
    assert_eq!(json["admissions"]["fetch"]["fallback_used"], true);
}

#[test]
fn catalog_lists_agents() {
    let ws = Workspace::new();
    let output = ws.cmd().arg("catalog").output().expect("should run");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["agents"], serde_json::json!(["coder", "generalist"]));
}

#[test]
fn invalid_args_json_exits_two() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["check", "--agent", "coder", "--tool", "Read", "--args", "{not json"])
        .assert()
        .code(2);
}
