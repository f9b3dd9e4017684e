//! Append-only JSON-lines sinks for the decision log and the compliance log.
//!
//! File-backed sinks hand lines to a `tracing-appender` non-blocking worker,
//! so callers never wait on disk I/O. The worker queue holds
//! [`QUEUE_LINES`] lines and is not lossy: a caller only blocks once that many
//! records are waiting on a stalled disk, and no audit record is dropped. The
//! worker guard lives inside the sink; dropping the sink flushes whatever is
//! still queued.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Lines the background writer queues before callers feel back-pressure.
pub const QUEUE_LINES: usize = 128_000;

/// JSON-lines writer shared by the audit trails.
pub struct AuditSink {
    writer: Mutex<Box<dyn Write + Send>>,
    _guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("background", &self._guard.is_some())
            .finish()
    }
}

impl AuditSink {
    /// Append to a single file that is never rotated.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the file
    /// cannot be opened.
    pub fn append_file(path: &Path) -> anyhow::Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("invalid audit file path {}", path.display()))?;
        Self::rolling(dir, Rotation::NEVER, file_name)
    }

    /// Append to `{dir}/{prefix}.YYYY-MM-DD`, rotating daily.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn daily(dir: &Path, prefix: &str) -> anyhow::Result<Self> {
        Self::rolling(dir, Rotation::DAILY, prefix)
    }

    fn rolling(dir: &Path, rotation: Rotation, prefix: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            anyhow::anyhow!("failed to create audit directory {}: {e}", dir.display())
        })?;
        let appender = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(prefix)
            .build(dir)?;
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .buffered_lines_limit(QUEUE_LINES)
            .finish(appender);
        Ok(Self {
            writer: Mutex::new(Box::new(writer)),
            _guard: Some(guard),
        })
    }

    /// Write synchronously to an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            _guard: None,
        }
    }

    /// Append one record as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub fn write_record<T: Serialize>(&self, record: &T) -> anyhow::Result<()> {
        self.write_records(std::slice::from_ref(record))
    }

    /// Append several records under one lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails. Records before
    /// the failing one have already been written.
    pub fn write_records<T: Serialize>(&self, records: &[T]) -> anyhow::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }
}
