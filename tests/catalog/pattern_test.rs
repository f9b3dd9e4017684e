//! Tests for `src/catalog/pattern.rs`: allow/deny pattern matching.

use turnstile::catalog::{PatternError, ToolPattern};

fn pattern(text: &str) -> ToolPattern {
    ToolPattern::parse(text).expect("pattern should parse")
}

#[test]
fn wildcard_argument_covers_any_parameterized_call() {
    let shell_any = pattern("Shell(*)");
    assert!(shell_any.matches("Shell(rm)", None));
    assert!(shell_any.matches("Shell", Some("ls -la")));
    assert!(shell_any.matches("Shell", None));
    assert!(!shell_any.matches("Read", None));
}

#[test]
fn argument_glob_restricts_commands() {
    let git_only = pattern("Shell(git *)");
    assert!(git_only.matches("Shell(git status)", None));
    assert!(git_only.matches("Shell", Some("git log --oneline")));
    assert!(!git_only.matches("Shell(rm -rf /)", None));
    assert!(!git_only.matches("Shell", None));
}

#[test]
fn exact_pattern_covers_parameterized_calls_of_same_tool() {
    let read = pattern("Read");
    assert!(read.matches("Read", None));
    assert!(read.matches("Read(/etc/hosts)", None));
    assert!(!read.matches("ReadFile", None));
}

#[test]
fn wildcard_name_is_anchored() {
    let mcp = pattern("mcp__*");
    assert!(mcp.matches("mcp__notes", None));
    assert!(!mcp.matches("x_mcp__notes", None));
}

#[test]
fn malformed_patterns_are_rejected() {
    assert_eq!(ToolPattern::parse("  "), Err(PatternError::Empty));
    assert!(matches!(
        ToolPattern::parse("Shell(ls"),
        Err(PatternError::Malformed(_))
    ));
    assert!(matches!(
        ToolPattern::parse("Shell)"),
        Err(PatternError::Malformed(_))
    ));
}

#[test]
fn display_round_trips_descriptor_text() {
    assert_eq!(pattern("Shell(git *)").to_string(), "Shell(git *)");
    assert_eq!(pattern("web_*").to_string(), "web_*");
}
