//! Coverage for config parsing and path resolution.

use std::path::{Path, PathBuf};

use turnstile::config::{config_dir, Config};
use turnstile::router::UnknownPreconditionPolicy;

#[test]
fn config_dir_resolves() {
    let dir = config_dir().expect("config dir should resolve");
    assert!(dir.ends_with(".turnstile"));
}

#[test]
fn parse_full_config() {
    let config = Config::from_toml(
        r#"
[paths]
catalog_dir = "/srv/agents"

[router]
default_fallback_agent = "generalist"
flush_every = 10
unknown_preconditions = "allow"

[policy]
rate_window_secs = 60
summary_length = 80

[resolver]
default_duration = 7

[resolver.durations]
research = 45
triage = 3

[logging]
level = "debug"
"#,
    )
    .expect("full config should parse");

    assert_eq!(config.paths.catalog_dir, Some(PathBuf::from("/srv/agents")));
    assert_eq!(config.router.default_fallback_agent.as_deref(), Some("generalist"));
    assert_eq!(config.router.flush_every, 10);
    assert_eq!(
        config.router.unknown_preconditions,
        UnknownPreconditionPolicy::Allow
    );
    assert_eq!(config.policy.rate_window_secs, 60);
    assert_eq!(config.policy.summary_length, 80);
    assert_eq!(config.resolver.default_duration, 7);
    assert_eq!(config.resolver.durations["triage"], 3);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn unknown_precondition_policy_is_validated() {
    let result = Config::from_toml("[router]\nunknown_preconditions = \"maybe\"\n");
    assert!(result.is_err());
}

#[test]
fn runtime_paths_fill_unset_entries_under_root() {
    let config = Config::from_toml("[paths]\ncompliance_dir = \"/var/audit\"\n")
        .expect("config should parse");
    let paths = config.runtime_paths_in(Path::new("/home/u/.turnstile"));

    assert_eq!(paths.catalog_dir, PathBuf::from("/home/u/.turnstile/agents"));
    assert_eq!(
        paths.decision_log,
        PathBuf::from("/home/u/.turnstile/logs/decisions.jsonl")
    );
    assert_eq!(paths.compliance_dir, PathBuf::from("/var/audit"));
    assert_eq!(paths.logs_dir, PathBuf::from("/home/u/.turnstile/logs"));
}

#[test]
fn load_from_missing_file_yields_defaults() {
    let tmp = tempfile::TempDir::new().expect("should create temp dir");
    let config = Config::load_from(&tmp.path().join("absent.toml")).expect("should load");
    assert_eq!(config.router.flush_every, 100);
}

#[test]
fn load_from_rejects_malformed_file() {
    let tmp = tempfile::TempDir::new().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[router\nflush_every = ").expect("should write");
    assert!(Config::load_from(&path).is_err());
}

#[test]
fn env_overrides_apply_over_file() {
    let mut config = Config::from_toml("[logging]\nlevel = \"warn\"\n").expect("should parse");
    config.apply_overrides(|key| match key {
        "TURNSTILE_LOG_LEVEL" => Some("trace".to_owned()),
        "TURNSTILE_DEFAULT_FALLBACK_AGENT" => Some("backup".to_owned()),
        "TURNSTILE_FLUSH_EVERY" => Some("25".to_owned()),
        _ => None,
    });
    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.router.default_fallback_agent.as_deref(), Some("backup"));
    assert_eq!(config.router.flush_every, 25);
}
