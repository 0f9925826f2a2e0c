// Retry Manager - per-invocation backoff scheduling for failed actions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::actions::RetryPolicy;

/// Bookkeeping for one retry saga: one failing action on one target.
/// Entries live from the first scheduled retry until success or exhaustion.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub action: &'static str,
    pub target_id: Option<Uuid>,
    /// Attempts already made (the initial run counts as attempt zero).
    pub attempt_number: u32,
    pub scheduled_at: DateTime<Utc>,
    pub policy: RetryPolicy,
    pub last_error: String,
}

/// Handle to one scheduled re-attempt. `wait()` resolves when the backoff
/// delay elapses; dropping it abandons the timer.
pub struct ScheduledRetry {
    pub id: Uuid,
    pub delay: Duration,
    fired: oneshot::Receiver<()>,
}

impl ScheduledRetry {
    pub async fn wait(self) {
        let _ = self.fired.await;
    }
}

/// Owns backoff scheduling for failed action invocations. Entries are
/// independent; the map is keyed by retry id and needs no cross-entry
/// coordination.
#[derive(Default)]
pub struct RetryManager {
    attempts: Arc<RwLock<HashMap<Uuid, RetryAttempt>>>,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the first retry of a failed action. `attempt_number` is the
    /// number of attempts already made (0 right after the initial failure).
    ///
    /// Returns `None` when the policy allows no further attempts; the caller
    /// must treat the failure as terminal.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_retry(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        action: &'static str,
        error: &str,
        policy: RetryPolicy,
        attempt_number: u32,
        target_id: Option<Uuid>,
    ) -> Option<ScheduledRetry> {
        if policy.max_retries == 0 || attempt_number >= policy.max_retries {
            return None;
        }

        let retry_id = Uuid::new_v4();
        let delay = policy.delay_for_attempt(attempt_number);
        let attempt = RetryAttempt {
            execution_id,
            workflow_id,
            action,
            target_id,
            attempt_number,
            scheduled_at: Utc::now(),
            policy,
            last_error: error.to_string(),
        };
        self.attempts.write().await.insert(retry_id, attempt);

        Some(self.arm(retry_id, delay))
    }

    /// The re-attempt succeeded; clear bookkeeping.
    pub async fn mark_retry_success(&self, retry_id: Uuid) {
        if self.attempts.write().await.remove(&retry_id).is_some() {
            debug!(%retry_id, "retry resolved successfully");
        }
    }

    /// The re-attempt failed. Reschedules with the next backoff step while
    /// attempts remain; returns `None` once the policy is exhausted (the
    /// entry is cleared and the failure is terminal).
    pub async fn mark_retry_failure(&self, retry_id: Uuid, error: &str) -> Option<ScheduledRetry> {
        let delay = {
            let mut attempts = self.attempts.write().await;
            let entry = attempts.get_mut(&retry_id)?;
            entry.attempt_number += 1;
            entry.last_error = error.to_string();

            if entry.attempt_number >= entry.policy.max_retries {
                let spent = entry.attempt_number;
                attempts.remove(&retry_id);
                warn!(%retry_id, attempts = spent, "retries exhausted");
                return None;
            }

            entry.scheduled_at = Utc::now();
            entry.policy.delay_for_attempt(entry.attempt_number)
        };

        Some(self.arm(retry_id, delay))
    }

    /// Abandon a pending retry, e.g. when the owning execution is cancelled.
    pub async fn cancel(&self, retry_id: Uuid) -> bool {
        self.attempts.write().await.remove(&retry_id).is_some()
    }

    pub async fn get(&self, retry_id: Uuid) -> Option<RetryAttempt> {
        self.attempts.read().await.get(&retry_id).cloned()
    }

    pub async fn pending(&self) -> usize {
        self.attempts.read().await.len()
    }

    fn arm(&self, retry_id: Uuid, delay: Duration) -> ScheduledRetry {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(());
        });
        debug!(%retry_id, delay_ms = delay.as_millis() as u64, "retry scheduled");

        ScheduledRetry {
            id: retry_id,
            delay,
            fired: rx,
        }
    }
}
