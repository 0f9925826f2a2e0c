// Workflow Actions - the per-target side-effect pipeline steps

use std::time::Duration;

use leadpilot_shared::{LeadStatus, MessageChannel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One executable action. Serialized as `{"type": ..., "config": {...}}` at
/// the storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum Action {
    SendMessage {
        channel: MessageChannel,
        /// Supports `{name}`, `{loanType}`, `{loanAmount}`, `{phone}` and
        /// `{email}` placeholders resolved from the target lead.
        template: String,
    },
    UpdateLeadStatus {
        status: LeadStatus,
    },
    AssignLead {
        assignee_id: Uuid,
    },
    CreateTask {
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        due_in_hours: Option<i64>,
    },
    UpdateTags {
        tags: Vec<String>,
    },
    Wait {
        duration_ms: u64,
    },
}

impl Action {
    /// Stable name used in logs and error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::UpdateLeadStatus { .. } => "update_lead_status",
            Self::AssignLead { .. } => "assign_lead",
            Self::CreateTask { .. } => "create_task",
            Self::UpdateTags { .. } => "update_tags",
            Self::Wait { .. } => "wait",
        }
    }
}

/// An action plus its optional retry policy, in declared pipeline order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl ActionStep {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            retry_policy: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Exponential backoff policy for a failing action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before re-running after `attempt_number` completed attempts:
    /// `initial_delay_ms * backoff_multiplier^attempt_number`.
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt_number as i32);
        Duration::from_millis(millis.round() as u64)
    }
}
