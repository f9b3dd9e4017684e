//! Tests for `src/catalog/mod.rs`: descriptor loading and reloads.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use turnstile::catalog::{AgentDescriptor, Catalog, RuleAction};

const RESEARCHER: &str = r#"
agent_id = "researcher"
fallback_agents = ["generalist"]

[capabilities]
allowed_tools = ["web_search", "Read", "Shell(git *)"]
denied_tools = ["Shell(rm *)"]

[capabilities.tool_dependencies.web_search]
preconditions = ["network_available"]
cost = 2.0
latency_ms = 1500.0
success_rate = 0.95
best_for = ["research"]

[dependencies]
before_execution = ["planner"]

[dependencies.task_dependencies]
writing = ["research"]

[[action_rules]]
condition = "tool == 'web_search'"
action = "allow"
rate_limit = 10

[safety_constraints]
max_calls_per_session = 50
redact_pii = false
"#;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("should write descriptor");
}

#[test]
fn load_dir_compiles_toml_and_json_descriptors() {
    let tmp = TempDir::new().expect("should create temp dir");
    write(tmp.path(), "researcher.toml", RESEARCHER);
    write(
        tmp.path(),
        "writer.json",
        r#"{"agent_id": "writer", "capabilities": {"allowed_tools": ["Write"]}}"#,
    );
    write(tmp.path(), "notes.txt", "not a descriptor");

    let catalog = Catalog::load_dir(tmp.path()).expect("catalog should load");
    assert_eq!(catalog.agent_ids(), vec!["researcher", "writer"]);
    assert!(catalog.load_errors().is_empty());

    let researcher = catalog.get("researcher").expect("researcher should exist");
    assert_eq!(researcher.fallback_agents, vec!["generalist"]);
    assert_eq!(researcher.dependencies.before_execution, vec!["planner"]);
    assert_eq!(researcher.policy.rules.len(), 1);
    assert_eq!(researcher.policy.rules[0].action, RuleAction::Allow);
    assert_eq!(researcher.policy.rules[0].rate_limit, Some(10));
    assert_eq!(researcher.policy.safety.max_calls_per_session, 50);
    assert!(!researcher.policy.safety.redact_pii);

    let search = researcher
        .capabilities
        .tool("web_search")
        .expect("web_search metadata");
    assert_eq!(search.preconditions, vec!["network_available"]);
    assert!(search.is_best_for("research"));
}

#[test]
fn invalid_descriptor_is_skipped_and_reported() {
    let tmp = TempDir::new().expect("should create temp dir");
    write(tmp.path(), "researcher.toml", RESEARCHER);
    write(
        tmp.path(),
        "broken.toml",
        r#"
agent_id = "broken"
[[action_rules]]
condition = "tool == "
"#,
    );

    let catalog = Catalog::load_dir(tmp.path()).expect("catalog should load");
    assert!(catalog.contains("researcher"));
    assert!(!catalog.contains("broken"));
    let errors = catalog.load_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.keys().any(|p| p.ends_with("broken.toml")));
}

#[test]
fn out_of_range_metadata_is_rejected() {
    let mut descriptor = AgentDescriptor::new("bad");
    descriptor.capabilities.tool_dependencies.insert(
        "web_search".to_owned(),
        toml::from_str("success_rate = 1.5").expect("metadata should parse"),
    );
    assert!(Catalog::from_descriptors([descriptor]).is_err());
}

#[test]
fn missing_directory_yields_empty_catalog() {
    let tmp = TempDir::new().expect("should create temp dir");
    let catalog = Catalog::load_dir(tmp.path().join("absent")).expect("catalog should load");
    assert_eq!(catalog.count(), 0);
}

#[test]
fn reload_agent_picks_up_edits_and_deletions() {
    let tmp = TempDir::new().expect("should create temp dir");
    write(tmp.path(), "researcher.toml", RESEARCHER);
    let catalog = Catalog::load_dir(tmp.path()).expect("catalog should load");
    let before = catalog.get("researcher").expect("researcher should exist");

    write(
        tmp.path(),
        "researcher.toml",
        "agent_id = \"researcher\"\nfallback_agents = [\"backup\"]\n",
    );
    catalog
        .reload_agent("researcher")
        .expect("reload should succeed");
    let after = catalog.get("researcher").expect("researcher should exist");
    assert_eq!(after.fallback_agents, vec!["backup"]);
    // Profiles handed out earlier are unaffected.
    assert_eq!(before.fallback_agents, vec!["generalist"]);

    std::fs::remove_file(tmp.path().join("researcher.toml")).expect("should remove");
    catalog
        .reload_agent("researcher")
        .expect("reload should succeed");
    assert!(!catalog.contains("researcher"));
}

#[test]
fn reloading_a_file_with_a_new_agent_id_drops_the_old_agent() {
    let tmp = TempDir::new().expect("should create temp dir");
    write(tmp.path(), "researcher.toml", RESEARCHER);
    write(tmp.path(), "writer.toml", "agent_id = \"writer\"\n");
    let catalog = Catalog::load_dir(tmp.path()).expect("catalog should load");

    write(tmp.path(), "researcher.toml", "agent_id = \"scout\"\n");
    catalog
        .reload_agent("researcher")
        .expect("reload should succeed");

    assert_eq!(catalog.agent_ids(), vec!["scout", "writer"]);
}

#[test]
fn reload_all_makes_directory_the_source_of_truth() {
    let tmp = TempDir::new().expect("should create temp dir");
    write(tmp.path(), "researcher.toml", RESEARCHER);
    let catalog = Catalog::load_dir(tmp.path()).expect("catalog should load");
    catalog.insert(
        turnstile::catalog::AgentProfile::from_descriptor(AgentDescriptor::new("adhoc"))
            .expect("profile should compile"),
    );
    assert!(catalog.contains("adhoc"));

    catalog.reload_all().expect("reload should succeed");
    assert!(!catalog.contains("adhoc"));
    assert!(catalog.contains("researcher"));
}

#[test]
fn watched_catalog_sees_new_files() {
    let tmp = TempDir::new().expect("should create temp dir");
    let catalog = Catalog::watch(tmp.path()).expect("watcher should start");
    assert_eq!(catalog.count(), 0);

    write(tmp.path(), "researcher.toml", RESEARCHER);

    let mut seen = false;
    for _ in 0..50 {
        if catalog.contains("researcher") {
            seen = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(seen, "watcher should load the new descriptor");
}
