//! Buffered routing-decision log.
//!
//! Decisions accumulate in memory and are handed to an [`AuditSink`] every
//! `flush_every` entries, and once more on drop. The sink writes on its own
//! background worker, so recording never blocks on disk.

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use super::RoutingDecision;
use crate::audit::AuditSink;

/// One logged decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Agent the decision is for.
    pub agent: String,
    /// Tool as requested.
    pub tool: String,
    /// Task type of the surrounding task.
    pub task_type: String,
    /// The decision itself.
    pub decision: RoutingDecision,
}

impl DecisionRecord {
    /// Stamp a decision with the current time.
    pub fn new(agent: &str, tool: &str, task_type: &str, decision: RoutingDecision) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            agent: agent.to_owned(),
            tool: tool.to_owned(),
            task_type: task_type.to_owned(),
            decision,
        }
    }
}

/// In-memory decision buffer with periodic flushing.
#[derive(Debug)]
pub struct DecisionLog {
    buffer: Mutex<Vec<DecisionRecord>>,
    flush_every: usize,
    sink: Option<AuditSink>,
}

impl DecisionLog {
    /// Buffer without persistence; entries are discarded at each flush.
    pub fn in_memory(flush_every: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            flush_every: flush_every.max(1),
            sink: None,
        }
    }

    /// Buffer that flushes to `sink`.
    pub fn with_sink(sink: AuditSink, flush_every: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            flush_every: flush_every.max(1),
            sink: Some(sink),
        }
    }

    /// Append a record, flushing when the buffer is full.
    pub fn record(&self, record: DecisionRecord) {
        let batch = match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.push(record);
                if buffer.len() >= self.flush_every {
                    std::mem::take(&mut *buffer)
                } else {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "decision log lock poisoned");
                return;
            }
        };
        self.write(&batch);
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> Vec<DecisionRecord> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Write out everything buffered.
    pub fn flush(&self) {
        let batch = match self.buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => return,
        };
        if !batch.is_empty() {
            self.write(&batch);
        }
    }

    fn write(&self, batch: &[DecisionRecord]) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.write_records(batch) {
            warn!(error = %e, count = batch.len(), "failed to flush decision log");
        }
    }
}

impl Drop for DecisionLog {
    fn drop(&mut self) {
        self.flush();
    }
}
