//! Input validation, safety vetoes, and default parameters per tool family.

use regex::Regex;
use serde_json::{json, Map, Value};

use super::preconditions::CallContext;
use crate::catalog::ToolCall;

/// Shell command substrings that are always vetoed.
const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "sudo ",
    "mkfs",
    "dd if=",
    ":(){",
    "chmod -R 777 /",
    "> /dev/sda",
    "shutdown",
    "reboot",
    "halt",
    "init 0",
    "init 6",
];

/// Search/glob patterns that match everything.
const DEGENERATE_PATTERNS: &[&str] = &[".*", "*", ".+", "^.*$", "**", "**/*"];

/// Broad tool families with shared argument shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFamily {
    /// Creates or overwrites a file.
    Write,
    /// Reads a file.
    Read,
    /// Edits a file in place.
    Edit,
    /// Regex content search.
    Search,
    /// File name glob.
    Glob,
    /// Shell command.
    Shell,
    /// HTTP fetch.
    Fetch,
    /// Anything else; not validated.
    Other,
}

impl ToolFamily {
    /// Classify a tool by its base name, case-insensitively.
    pub fn classify(tool: &str) -> Self {
        let name = ToolCall::split(tool, None).name.to_ascii_lowercase();
        match name.as_str() {
            "write" | "write_file" | "file_write" | "create_file" => Self::Write,
            "read" | "read_file" | "file_read" | "view" => Self::Read,
            "edit" | "edit_file" | "multiedit" | "str_replace" => Self::Edit,
            "grep" | "search" | "search_files" | "ripgrep" => Self::Search,
            "glob" | "find_files" => Self::Glob,
            "bash" | "shell" | "execute_command" | "run_command" | "terminal" => Self::Shell,
            "fetch" | "web_fetch" | "webfetch" | "http_get" | "web_request" => Self::Fetch,
            _ => Self::Other,
        }
    }
}

fn string_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

fn path_arg(args: &Value) -> Option<&str> {
    string_arg(args, &["path", "file_path"])
}

fn pattern_arg(args: &Value) -> Option<&str> {
    string_arg(args, &["pattern", "query"])
}

/// Command text of a shell call: the parameterized argument or `args.command`.
pub fn shell_command<'a>(tool: &'a str, args: &'a Value) -> Option<&'a str> {
    ToolCall::split(tool, string_arg(args, &["command", "cmd"])).argument
}

/// Check the call's arguments have the shape its family needs.
///
/// # Errors
///
/// Returns a human-readable reason when a required field is missing or
/// malformed.
pub fn validate_input(tool: &str, args: &Value) -> Result<(), String> {
    match ToolFamily::classify(tool) {
        ToolFamily::Write => {
            if path_arg(args).is_none() {
                return Err(format!("{tool} requires a non-empty 'path'"));
            }
            if !args.get("content").is_some_and(Value::is_string) {
                return Err(format!("{tool} requires string 'content'"));
            }
            Ok(())
        }
        ToolFamily::Read | ToolFamily::Edit => match path_arg(args) {
            Some(_) => Ok(()),
            None => Err(format!("{tool} requires a non-empty 'path'")),
        },
        ToolFamily::Search => {
            let pattern =
                pattern_arg(args).ok_or_else(|| format!("{tool} requires a non-empty 'pattern'"))?;
            Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("{tool} pattern is not a valid regex: {e}"))
        }
        ToolFamily::Glob => match pattern_arg(args) {
            Some(_) => Ok(()),
            None => Err(format!("{tool} requires a non-empty 'pattern'")),
        },
        ToolFamily::Shell => match shell_command(tool, args) {
            Some(cmd) if !cmd.trim().is_empty() => Ok(()),
            _ => Err(format!("{tool} requires a non-empty 'command'")),
        },
        ToolFamily::Fetch => match string_arg(args, &["url"]) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
            Some(url) => Err(format!("{tool} url must be http(s): {url}")),
            None => Err(format!("{tool} requires a 'url'")),
        },
        ToolFamily::Other => Ok(()),
    }
}

/// Heuristic vetoes that block a call regardless of permissions.
pub fn safety_veto(tool: &str, args: &Value, ctx: &CallContext) -> Option<String> {
    let family = ToolFamily::classify(tool);
    match family {
        ToolFamily::Shell => {
            let command = shell_command(tool, args)?.to_ascii_lowercase();
            DANGEROUS_COMMANDS
                .iter()
                .find(|d| command.contains(&d.to_ascii_lowercase()))
                .map(|d| format!("destructive shell command ('{d}')"))
        }
        ToolFamily::Read => {
            let previous = ctx.previous_step.as_ref()?;
            let same_tool = ToolFamily::classify(&previous.tool) == ToolFamily::Read
                && ToolCall::split(&previous.tool, None).name == ToolCall::split(tool, None).name;
            (same_tool && previous.args == *args)
                .then(|| "repeats the immediately preceding read".to_owned())
        }
        ToolFamily::Search | ToolFamily::Glob => {
            let pattern = pattern_arg(args)?.trim();
            DEGENERATE_PATTERNS
                .contains(&pattern)
                .then(|| format!("degenerate pattern '{pattern}' matches everything"))
        }
        _ => None,
    }
}

/// Default parameters for a tool family.
pub fn default_params(tool: &str) -> Map<String, Value> {
    let defaults = match ToolFamily::classify(tool) {
        ToolFamily::Read => json!({"offset": 0, "limit": 2000}),
        ToolFamily::Search => json!({"case_insensitive": false, "max_results": 100}),
        ToolFamily::Glob => json!({"max_results": 1000}),
        ToolFamily::Shell => json!({"timeout_secs": 120}),
        ToolFamily::Fetch => json!({"timeout_secs": 30, "follow_redirects": true}),
        _ => json!({}),
    };
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Merge defaults under the caller's arguments; the caller wins.
/// Non-object arguments are returned unchanged.
pub fn expand_params(tool: &str, args: &Value) -> Value {
    let mut merged = default_params(tool);
    match args {
        Value::Object(map) => {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        Value::Null => Value::Object(merged),
        other => other.clone(),
    }
}
