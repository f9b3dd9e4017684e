//! Configuration loading.
//!
//! Loads `config.toml` from `$TURNSTILE_CONFIG_PATH` or `~/.turnstile/`.
//! Every section is optional. Precedence: env vars > config file > defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::router::preconditions::UnknownPreconditionPolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Capability router settings.
    pub router: RouterConfig,
    /// Policy enforcer settings.
    pub policy: PolicyConfig,
    /// Dependency resolver settings.
    pub resolver: ResolverConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load with precedence env > file > defaults.
    ///
    /// A missing config file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the home directory cannot be determined.
    pub fn load() -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = config_path_with(env)?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, without env overrides. A missing file
    /// yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for the schema.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TURNSTILE_CATALOG_DIR") {
            self.paths.catalog_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TURNSTILE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("TURNSTILE_DEFAULT_FALLBACK_AGENT") {
            self.router.default_fallback_agent = Some(v);
        }
        if let Some(v) = env("TURNSTILE_FLUSH_EVERY") {
            match v.parse() {
                Ok(n) => self.router.flush_every = n,
                Err(_) => tracing::warn!(
                    var = "TURNSTILE_FLUSH_EVERY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Resolve every path, filling unset ones under `root`.
    pub fn runtime_paths_in(&self, root: &Path) -> RuntimePaths {
        let paths = &self.paths;
        RuntimePaths {
            catalog_dir: paths
                .catalog_dir
                .clone()
                .unwrap_or_else(|| root.join("agents")),
            decision_log: paths
                .decision_log
                .clone()
                .unwrap_or_else(|| root.join("logs").join("decisions.jsonl")),
            compliance_dir: paths
                .compliance_dir
                .clone()
                .unwrap_or_else(|| root.join("compliance")),
            logs_dir: paths.logs_dir.clone().unwrap_or_else(|| root.join("logs")),
        }
    }

    /// Resolve every path, filling unset ones under `~/.turnstile/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn runtime_paths(&self) -> anyhow::Result<RuntimePaths> {
        Ok(self.runtime_paths_in(&config_dir()?))
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[paths]`. Unset entries resolve under the config directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of agent descriptors.
    pub catalog_dir: Option<PathBuf>,
    /// Routing decision log (JSON lines).
    pub decision_log: Option<PathBuf>,
    /// Directory of daily compliance logs.
    pub compliance_dir: Option<PathBuf>,
    /// Directory of application logs.
    pub logs_dir: Option<PathBuf>,
}

/// Fully resolved filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Directory of agent descriptors.
    pub catalog_dir: PathBuf,
    /// Routing decision log.
    pub decision_log: PathBuf,
    /// Directory of daily compliance logs.
    pub compliance_dir: PathBuf,
    /// Directory of application logs.
    pub logs_dir: PathBuf,
}

/// `[router]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Agent suggested when a refusing agent lists no fallbacks.
    pub default_fallback_agent: Option<String>,
    /// Decisions buffered before the log is flushed.
    pub flush_every: usize,
    /// How preconditions with no registered check are treated.
    pub unknown_preconditions: UnknownPreconditionPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_fallback_agent: None,
            flush_every: default_flush_every(),
            unknown_preconditions: UnknownPreconditionPolicy::default(),
        }
    }
}

/// `[policy]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Rate-limit window length in seconds.
    pub rate_window_secs: u64,
    /// Maximum characters of argument summary in compliance records.
    pub summary_length: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: default_rate_window_secs(),
            summary_length: default_summary_length(),
        }
    }
}

/// `[resolver]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Estimated duration for task types with no entry.
    pub default_duration: u64,
    /// Per-task-type estimated durations, merged over the built-in table.
    pub durations: HashMap<String, u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_duration: default_duration(),
            durations: HashMap::new(),
        }
    }
}

/// `[logging]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_flush_every() -> usize {
    100
}
fn default_rate_window_secs() -> u64 {
    3600
}
fn default_summary_length() -> usize {
    200
}
fn default_duration() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_owned()
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Resolve the default config directory (`~/.turnstile/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".turnstile"))
}

/// Resolve the config file path using a custom env resolver.
///
/// Checks `$TURNSTILE_CONFIG_PATH` first, then `~/.turnstile/config.toml`.
///
/// # Errors
///
/// Returns an error if the env var is unset and the home directory cannot be
/// determined.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env("TURNSTILE_CONFIG_PATH") {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
