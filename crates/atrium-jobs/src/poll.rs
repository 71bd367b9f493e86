//! Bounded polling of long-running knowledge base operations.
//!
//! Each attempt waits one interval on the tokio timer and then checks the
//! operation, so waiting runs hold no worker thread. `Succeeded` ends the
//! wait, `Failed` is [`Error::OperationFailed`], and running out of attempts
//! is [`Error::Timeout`]. Transient errors from the status call use up an
//! attempt and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use atrium_core::{defaults, Error, KnowledgeBase, OperationHandle, OperationState, Result};

/// Interval and attempt ceiling for operation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(defaults::KB_POLL_INTERVAL_MS),
            max_attempts: defaults::KB_POLL_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `KB_POLL_INTERVAL_MS` | `3000` |
    /// | `KB_POLL_MAX_ATTEMPTS` | `20` |
    pub fn from_env() -> Self {
        let interval_ms = std::env::var("KB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::KB_POLL_INTERVAL_MS);
        let max_attempts = std::env::var("KB_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::KB_POLL_MAX_ATTEMPTS)
            .max(1);
        Self {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Longest time a wait can take.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Waits for knowledge base operations to reach a terminal state.
#[derive(Clone)]
pub struct OperationPoller {
    kb: Arc<dyn KnowledgeBase>,
    policy: PollPolicy,
}

impl OperationPoller {
    pub fn new(kb: Arc<dyn KnowledgeBase>, policy: PollPolicy) -> Self {
        Self { kb, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub async fn wait(&self, operation_id: &str) -> Result<OperationHandle> {
        for attempt in 1..=self.policy.max_attempts {
            sleep(self.policy.interval).await;

            let handle = match self.kb.operation_status(operation_id).await {
                Ok(handle) => handle,
                Err(e) if e.is_transient() => {
                    warn!(
                        subsystem = "jobs",
                        component = "poller",
                        operation_id,
                        attempt,
                        error = %e,
                        "Operation status check failed, will retry"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!(
                subsystem = "jobs",
                component = "poller",
                operation_id,
                attempt,
                state = ?handle.state,
                "Operation status"
            );

            match handle.state {
                OperationState::Succeeded => {
                    info!(
                        subsystem = "jobs",
                        component = "poller",
                        operation_id,
                        attempt,
                        "Operation succeeded"
                    );
                    return Ok(handle);
                }
                OperationState::Failed => {
                    let message = handle
                        .error
                        .unwrap_or_else(|| "no error detail".to_string());
                    tracing::error!(
                        subsystem = "jobs",
                        component = "poller",
                        operation_id,
                        error = %message,
                        "Operation failed"
                    );
                    return Err(Error::OperationFailed {
                        operation_id: operation_id.to_string(),
                        message,
                    });
                }
                OperationState::Running => {}
            }
        }

        Err(Error::Timeout(format!(
            "operation {} not terminal after {} checks",
            operation_id, self.policy.max_attempts
        )))
    }
}
