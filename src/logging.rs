//! Tracing setup for the `turnstile` binary.
//!
//! One-shot subcommands (`resolve`, `route`, `check`, `plan`, `catalog`)
//! print their JSON verdict on stdout, so diagnostics go to stderr only
//! ([`init_cli`]). `catalog --watch` stays up and also keeps a JSON trail of
//! descriptor reloads under the logs directory ([`init_production`]).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the watch-mode log; the appender adds the date.
pub const LOG_FILE_PREFIX: &str = "turnstile.log";

/// Keeps the watch-mode log writer running. Dropping it flushes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// `RUST_LOG` if set, else the configured `[logging] level`, else `info`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logging for `catalog --watch`: JSON lines in
/// `{logs_dir}/turnstile.log.YYYY-MM-DD` plus readable stderr.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

    tracing::debug!(dir = %logs_dir.display(), "watch log opened");
    Ok(LoggingGuard { _guard: guard })
}

/// Stderr-only logging for one-shot subcommands, keeping stdout clean for
/// the JSON result. A second call is a no-op.
pub fn init_cli(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .try_init();
}
