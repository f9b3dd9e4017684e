//! Turnstile CLI entry point.
//!
//! One-shot subcommands for resolving a workflow, routing or policy-checking a
//! single tool call, and building an admission plan. `catalog --watch` runs
//! until interrupted and logs descriptor reloads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use turnstile::audit::AuditSink;
use turnstile::bridge::{AdmissionBridge, HintRouter};
use turnstile::catalog::Catalog;
use turnstile::config::Config;
use turnstile::policy::PolicyEnforcer;
use turnstile::resolver::DependencyResolver;
use turnstile::router::{CallContext, CapabilityRouter};
use turnstile::types::Task;

/// Turnstile: admission control for multi-agent workflows.
#[derive(Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Config file (defaults to `$TURNSTILE_CONFIG_PATH` or `~/.turnstile/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of agent descriptors (overrides config).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Order a workflow's tasks and report cycles and the critical path.
    Resolve {
        /// Tasks file (JSON or TOML).
        tasks: PathBuf,
    },
    /// Route one tool call through capability checks.
    Route {
        /// Calling agent.
        #[arg(long)]
        agent: String,
        /// Tool to call.
        #[arg(long)]
        tool: String,
        /// Task type of the surrounding task.
        #[arg(long, default_value = "general")]
        task_type: String,
        /// Call arguments as JSON.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Working directory for precondition checks.
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Precondition outcome override, `name=true|false`. Repeatable.
        #[arg(long = "fact")]
        facts: Vec<String>,
    },
    /// Check one tool call against the agent's policy card.
    Check {
        /// Calling agent.
        #[arg(long)]
        agent: String,
        /// Tool to call.
        #[arg(long)]
        tool: String,
        /// Call arguments as JSON.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Resolve, assign, and validate a workflow.
    Plan {
        /// Tasks file (JSON or TOML).
        tasks: PathBuf,
        /// Agent for tasks without an agent hint.
        #[arg(long)]
        default_agent: Option<String>,
        /// Working directory for precondition checks.
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Precondition outcome override, `name=true|false`. Repeatable.
        #[arg(long = "fact")]
        facts: Vec<String>,
    },
    /// List loaded agents and descriptor errors.
    Catalog {
        /// Keep running and reload descriptors as they change.
        #[arg(long)]
        watch: bool,
    },
}

fn main() -> ExitCode {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Run the selected subcommand. `Ok(false)` means the verdict was negative.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    let paths = config.runtime_paths()?;

    if let Command::Catalog { watch: true } = cli.command {
        let _guard = turnstile::logging::init_production(&paths.logs_dir, &config.logging.level)?;
        return watch_catalog(&paths.catalog_dir);
    }
    turnstile::logging::init_cli(&config.logging.level);

    match cli.command {
        Command::Resolve { tasks } => {
            let tasks = load_tasks(&tasks)?;
            let catalog = Catalog::load_dir(&paths.catalog_dir)?;
            let resolver = DependencyResolver::from_config(Some(catalog), &config.resolver);
            let result = resolver.resolve(&tasks);
            print_json(&result)?;
            Ok(result.is_valid)
        }
        Command::Route {
            agent,
            tool,
            task_type,
            args,
            working_dir,
            facts,
        } => {
            let args = parse_args(&args)?;
            let ctx = build_context(working_dir, &facts)?;
            let catalog = Catalog::load_dir(&paths.catalog_dir)?;
            let router = CapabilityRouter::from_config(
                catalog,
                &config.router,
                open_sink(AuditSink::append_file(&paths.decision_log)),
            );
            let decision = router.route_tool_call(&agent, &task_type, &tool, &args, &ctx);
            print_json(&decision)?;
            Ok(decision.is_allowed())
        }
        Command::Check { agent, tool, args } => {
            let args = parse_args(&args)?;
            let catalog = Catalog::load_dir(&paths.catalog_dir)?;
            let mut enforcer = PolicyEnforcer::from_config(catalog, &config.policy);
            if let Some(sink) = open_sink(AuditSink::daily(&paths.compliance_dir, "compliance")) {
                enforcer = enforcer.with_compliance_log(sink);
            }
            let result = enforcer.check_tool_call(&agent, &tool, &args);
            print_json(&result)?;
            Ok(result.allowed)
        }
        Command::Plan {
            tasks,
            default_agent,
            working_dir,
            facts,
        } => {
            let tasks = load_tasks(&tasks)?;
            let ctx = build_context(working_dir, &facts)?;
            let catalog = Catalog::load_dir(&paths.catalog_dir)?;
            let base = match default_agent {
                Some(agent) => HintRouter::with_default_agent(agent),
                None => HintRouter::new(),
            };
            let bridge = AdmissionBridge::new(
                Arc::clone(&catalog),
                DependencyResolver::from_config(Some(Arc::clone(&catalog)), &config.resolver),
                Arc::new(CapabilityRouter::from_config(
                    Arc::clone(&catalog),
                    &config.router,
                    open_sink(AuditSink::append_file(&paths.decision_log)),
                )),
                Arc::new(PolicyEnforcer::from_config(Arc::clone(&catalog), &config.policy)),
                Arc::new(base),
            );
            let plan = bridge.route_dag_with_policy(&tasks, &ctx)?;
            print_json(&plan)?;
            Ok(!plan.degraded && plan.validation_failures.is_empty())
        }
        Command::Catalog { watch: _ } => {
            let catalog = Catalog::load_dir(&paths.catalog_dir)?;
            let listing = CatalogListing {
                dir: paths.catalog_dir.clone(),
                agents: catalog.agent_ids(),
                errors: catalog
                    .load_errors()
                    .into_iter()
                    .map(|(path, error)| (path.display().to_string(), error))
                    .collect(),
            };
            print_json(&listing)?;
            Ok(listing.errors.is_empty())
        }
    }
}

/// JSON body of `turnstile catalog`.
#[derive(Serialize)]
struct CatalogListing {
    dir: PathBuf,
    agents: Vec<String>,
    errors: Vec<(String, String)>,
}

/// Tasks file: a bare array or a `tasks` table.
#[derive(Deserialize)]
#[serde(untagged)]
enum TasksFile {
    List(Vec<Task>),
    Table { tasks: Vec<Task> },
}

impl TasksFile {
    fn into_tasks(self) -> Vec<Task> {
        match self {
            Self::List(tasks) | Self::Table { tasks } => tasks,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    if let Some(dir) = &cli.catalog {
        config.paths.catalog_dir = Some(dir.clone());
    }
    Ok(config)
}

fn load_tasks(path: &Path) -> anyhow::Result<Vec<Task>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let file: TasksFile = if is_toml {
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?
    };
    Ok(file.into_tasks())
}

fn parse_args(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).context("--args must be valid JSON")
}

fn build_context(working_dir: Option<PathBuf>, facts: &[String]) -> anyhow::Result<CallContext> {
    let mut ctx = CallContext::new();
    if let Some(dir) = working_dir {
        ctx = ctx.with_working_dir(dir);
    }
    for fact in facts {
        let (name, value) = fact
            .split_once('=')
            .with_context(|| format!("--fact '{fact}' must look like name=true"))?;
        let value: bool = value
            .trim()
            .parse()
            .with_context(|| format!("--fact '{fact}' must be true or false"))?;
        ctx = ctx.with_fact(name.trim(), value);
    }
    Ok(ctx)
}

/// Log sinks are best-effort for one-shot commands.
fn open_sink(sink: anyhow::Result<AuditSink>) -> Option<AuditSink> {
    match sink {
        Ok(sink) => Some(sink),
        Err(e) => {
            warn!(error = %e, "log sink unavailable, continuing without it");
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialise output")?;
    println!("{text}");
    Ok(())
}

fn watch_catalog(dir: &Path) -> anyhow::Result<bool> {
    let catalog = Catalog::watch(dir)?;
    info!(dir = %dir.display(), agents = catalog.count(), "watching agent catalog");
    let mut last_agents = catalog.agent_ids();
    let mut last_errors = BTreeMap::new();
    loop {
        let errors = catalog.load_errors();
        if errors != last_errors {
            for (path, error) in &errors {
                warn!(path = %path.display(), error = %error, "descriptor failed to load");
            }
            last_errors = errors;
        }
        std::thread::sleep(Duration::from_secs(2));
        let agents = catalog.agent_ids();
        if agents != last_agents {
            info!(agents = ?agents, "catalog changed");
            last_agents = agents;
        }
    }
}
