//! Sliding-window rate limiting keyed by (agent, tool).
//!
//! Every window lives behind one mutex so check-and-record is atomic. Entries
//! at least `window` old are pruned lazily on each access and never count.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use super::PolicyError;

/// Default window length (one hour).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Quota state after a permitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Calls in the window, including the one just recorded.
    pub used: u32,
    /// Configured limit.
    pub limit: u32,
    /// Calls left before the limit is hit.
    pub remaining: u32,
}

/// Per-(agent, tool) sliding windows of call timestamps.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter with the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check the quota and, if a slot is free, record the call at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::RateLimited`] when `limit` calls already fall
    /// inside the window. Denied calls are not recorded.
    pub fn check_and_record(
        &self,
        agent: &str,
        tool: &str,
        limit: u32,
        now: Instant,
    ) -> Result<QuotaStatus, PolicyError> {
        let mut windows = self.windows.lock().map_err(|e| {
            warn!(error = %e, "rate limiter lock poisoned");
            PolicyError::RateLimited {
                tool: tool.to_owned(),
                limit,
                used: limit,
                retry_after_secs: self.window.as_secs(),
            }
        })?;

        let entries = windows
            .entry((agent.to_owned(), tool.to_owned()))
            .or_default();
        prune(entries, now, self.window);

        let used = count(entries);
        if used >= limit {
            let retry_after_secs = entries
                .front()
                .map(|oldest| {
                    let age = now.saturating_duration_since(*oldest);
                    self.window.saturating_sub(age).as_secs().max(1)
                })
                .unwrap_or(1);
            return Err(PolicyError::RateLimited {
                tool: tool.to_owned(),
                limit,
                used,
                retry_after_secs,
            });
        }

        entries.push_back(now);
        let used = used.saturating_add(1);
        Ok(QuotaStatus {
            used,
            limit,
            remaining: limit.saturating_sub(used),
        })
    }

    /// Calls currently counted for (agent, tool) as of `now`.
    pub fn usage(&self, agent: &str, tool: &str, now: Instant) -> u32 {
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        match windows.get_mut(&(agent.to_owned(), tool.to_owned())) {
            Some(entries) => {
                prune(entries, now, self.window);
                count(entries)
            }
            None => 0,
        }
    }

    /// Calls left under `limit` for (agent, tool) as of `now`.
    pub fn remaining(&self, agent: &str, tool: &str, limit: u32, now: Instant) -> u32 {
        limit.saturating_sub(self.usage(agent, tool, now))
    }

    /// Forget every window.
    pub fn reset(&self) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.clear();
        }
    }
}

fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while entries
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        entries.pop_front();
    }
}

fn count(entries: &VecDeque<Instant>) -> u32 {
    u32::try_from(entries.len()).unwrap_or(u32::MAX)
}
