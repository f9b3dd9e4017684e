//! Named precondition checks evaluated against a call context.
//!
//! Names resolve in this order:
//! 1. a fact asserted by the caller in [`CallContext::facts`];
//! 2. a registered check, either plain (`git_repository`) or parameterized
//!    (`env:OPENAI_API_KEY`, `command:git`, `path:Cargo.toml`);
//! 3. the configured [`UnknownPreconditionPolicy`].
//!
//! Registered-check results are cached per (tool, precondition) until
//! [`PreconditionRegistry::clear_cache`]. Facts and unknown names are never
//! cached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// How a precondition with no fact and no registered check is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPreconditionPolicy {
    /// Unknown names fail.
    #[default]
    Deny,
    /// Unknown names pass.
    Allow,
}

/// A tool call already made in the current workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool as called.
    pub tool: String,
    /// Arguments it was called with.
    #[serde(default)]
    pub args: Value,
}

/// What preconditions and safety vetoes can see about a call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Directory the tool will run in; the process directory when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment visible to checks, consulted before the process env.
    pub env: HashMap<String, String>,
    /// Facts asserted by the caller, keyed by precondition name.
    pub facts: HashMap<String, bool>,
    /// Immediately preceding tool call, if any.
    pub previous_step: Option<ToolInvocation>,
}

impl CallContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Assert a fact.
    pub fn with_fact(mut self, name: impl Into<String>, value: bool) -> Self {
        self.facts.insert(name.into(), value);
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Record the preceding tool call.
    pub fn with_previous_step(mut self, tool: impl Into<String>, args: Value) -> Self {
        self.previous_step = Some(ToolInvocation {
            tool: tool.into(),
            args,
        });
        self
    }

    /// Environment lookup: context first, then the process env. Empty values
    /// count as unset.
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.working_dir().join(path)
    }

    fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// A check: receives the parameter after `:` (empty for plain names).
pub type PreconditionCheck = Box<dyn Fn(&str, &CallContext) -> bool + Send + Sync>;

/// Registry of precondition checks plus the per-router result cache.
pub struct PreconditionRegistry {
    checks: HashMap<String, PreconditionCheck>,
    unknown: UnknownPreconditionPolicy,
    cache: Mutex<HashMap<(String, String), bool>>,
}

impl std::fmt::Debug for PreconditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.checks.keys().collect();
        names.sort();
        f.debug_struct("PreconditionRegistry")
            .field("checks", &names)
            .field("unknown", &self.unknown)
            .finish()
    }
}

impl Default for PreconditionRegistry {
    fn default() -> Self {
        Self::new(UnknownPreconditionPolicy::Deny)
    }
}

impl PreconditionRegistry {
    /// Registry with the built-in checks.
    pub fn new(unknown: UnknownPreconditionPolicy) -> Self {
        let mut registry = Self {
            checks: HashMap::new(),
            unknown,
            cache: Mutex::new(HashMap::new()),
        };
        registry.register_builtins();
        registry
    }

    /// Add or replace a check. `name` is matched against the text before `:`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        check: impl Fn(&str, &CallContext) -> bool + Send + Sync + 'static,
    ) {
        self.checks.insert(name.into(), Box::new(check));
    }

    /// Whether a check is registered for `name`.
    pub fn is_known(&self, name: &str) -> bool {
        self.checks.contains_key(split_name(name).0)
    }

    /// Policy for unknown names.
    pub fn unknown_policy(&self) -> UnknownPreconditionPolicy {
        self.unknown
    }

    /// Evaluate one precondition for `tool`.
    pub fn evaluate(&self, tool: &str, precondition: &str, ctx: &CallContext) -> bool {
        if let Some(value) = ctx.facts.get(precondition) {
            return *value;
        }

        let (name, param) = split_name(precondition);
        let Some(check) = self.checks.get(name) else {
            let pass = self.unknown == UnknownPreconditionPolicy::Allow;
            warn!(tool, precondition, pass, "unknown precondition");
            return pass;
        };

        let key = (tool.to_owned(), precondition.to_owned());
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return *hit;
            }
        }

        let result = check(param, ctx);
        debug!(tool, precondition, result, "precondition evaluated");
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result);
        }
        result
    }

    /// Names among `preconditions` that fail, in declaration order.
    pub fn failed(&self, tool: &str, preconditions: &[String], ctx: &CallContext) -> Vec<String> {
        preconditions
            .iter()
            .filter(|p| !self.evaluate(tool, p, ctx))
            .cloned()
            .collect()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of cached results.
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn register_builtins(&mut self) {
        self.register("directory_exists", |_, ctx| ctx.working_dir().is_dir());
        self.register("git_repository", |_, ctx| {
            ctx.working_dir()
                .ancestors()
                .any(|dir| dir.join(".git").exists())
        });
        self.register("api_key_present", |param, ctx| {
            if !param.is_empty() {
                return ctx.env_var(param).is_some();
            }
            ctx.env.iter().any(|(k, v)| k.ends_with("_API_KEY") && !v.is_empty())
                || std::env::vars().any(|(k, v)| k.ends_with("_API_KEY") && !v.is_empty())
        });
        self.register("network_available", |_, ctx| {
            ctx.env_var("TURNSTILE_OFFLINE").is_none()
        });
        self.register("env", |param, ctx| ctx.env_var(param).is_some());
        self.register("path", |param, ctx| ctx.resolve(param).exists());
        self.register("command", |param, ctx| command_on_path(param, ctx));
    }
}

/// Split `name:param`.
fn split_name(precondition: &str) -> (&str, &str) {
    match precondition.split_once(':') {
        Some((name, param)) => (name.trim(), param.trim()),
        None => (precondition.trim(), ""),
    }
}

fn command_on_path(command: &str, ctx: &CallContext) -> bool {
    if command.is_empty() {
        return false;
    }
    if command.contains(std::path::MAIN_SEPARATOR) {
        return ctx.resolve(command).is_file();
    }
    let Some(path) = ctx.env_var("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(command).is_file())
}
