//! Tests for `src/router/preconditions.rs`: built-in checks and caching.

use turnstile::router::{CallContext, PreconditionRegistry, UnknownPreconditionPolicy};

#[test]
fn unknown_preconditions_follow_policy() {
    let ctx = CallContext::new();
    let strict = PreconditionRegistry::new(UnknownPreconditionPolicy::Deny);
    let lenient = PreconditionRegistry::new(UnknownPreconditionPolicy::Allow);
    assert!(!strict.evaluate("search", "index built", &ctx));
    assert!(lenient.evaluate("search", "index built", &ctx));
}

#[test]
fn path_and_git_checks_use_working_dir() {
    let tmp = tempfile::TempDir::new().expect("should create temp dir");
    std::fs::write(tmp.path().join("Cargo.toml"), "").expect("should write");
    let ctx = CallContext::new().with_working_dir(tmp.path());
    let registry = PreconditionRegistry::default();

    assert!(registry.evaluate("build", "path:Cargo.toml", &ctx));
    assert!(!registry.evaluate("build", "path:missing.txt", &ctx));
    assert!(registry.evaluate("build", "directory_exists", &ctx));

    std::fs::create_dir(tmp.path().join(".git")).expect("should create .git");
    let fresh = PreconditionRegistry::default();
    assert!(fresh.evaluate("commit", "git_repository", &ctx));
}

#[test]
fn env_checks_see_context_env() {
    let registry = PreconditionRegistry::default();
    let ctx = CallContext::new().with_env("TURNSTILE_TEST_TOKEN_API_KEY", "abc");
    assert!(registry.evaluate("fetch", "env:TURNSTILE_TEST_TOKEN_API_KEY", &ctx));
    assert!(registry.evaluate("fetch", "api_key_present:TURNSTILE_TEST_TOKEN_API_KEY", &ctx));
    assert!(!registry.evaluate("fetch", "env:TURNSTILE_TEST_SURELY_UNSET", &ctx));
}

#[test]
fn results_are_cached_per_tool_until_cleared() {
    let mut registry = PreconditionRegistry::default();
    registry.register("index_built", |_, ctx| ctx.resolve(".index").exists());
    let tmp = tempfile::TempDir::new().expect("should create temp dir");
    let ctx = CallContext::new().with_working_dir(tmp.path());

    assert!(!registry.evaluate("search", "index_built", &ctx));
    std::fs::write(tmp.path().join(".index"), "").expect("should write");
    assert!(!registry.evaluate("search", "index_built", &ctx), "cached result");
    assert_eq!(registry.cached(), 1);

    registry.clear_cache();
    assert!(registry.evaluate("search", "index_built", &ctx));
}

#[test]
fn facts_override_checks() {
    let registry = PreconditionRegistry::default();
    let ctx = CallContext::new().with_fact("network_available", false);
    assert!(!registry.evaluate("web_search", "network_available", &ctx));
    assert_eq!(
        registry.failed(
            "web_search",
            &["network_available".to_owned(), "directory_exists".to_owned()],
            &ctx
        ),
        vec!["network_available"]
    );
}
