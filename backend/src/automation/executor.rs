// Action Executor - dispatches a single action against a single lead

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadpilot_shared::{Lead, LeadTask, MessageChannel, MessageDirection, MessageRecord};
use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use super::actions::Action;
use crate::services::{MessageSender, MessagingError};
use crate::store::{AutomationStore, StoreError};

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("lead {0} has no contact channel")]
    MissingChannel(Uuid),
    #[error("message send failed: {0}")]
    Send(#[from] MessagingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("action timed out after {0:?}")]
    Timeout(Duration),
}

/// Context shared by every action of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_payload: Value,
}

pub struct ActionExecutor {
    store: Arc<dyn AutomationStore>,
    sender: Arc<dyn MessageSender>,
    action_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        sender: Arc<dyn MessageSender>,
        action_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sender,
            action_timeout,
        }
    }

    /// Execute one action with a bounded duration. A hung collaborator call
    /// becomes a normal action failure subject to the retry policy.
    pub async fn execute(
        &self,
        action: &Action,
        lead: &Lead,
        ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        match tokio::time::timeout(self.action_timeout, self.dispatch(action, lead, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(self.action_timeout)),
        }
    }

    async fn dispatch(
        &self,
        action: &Action,
        lead: &Lead,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        match action {
            Action::SendMessage { channel, template } => {
                self.send_message(*channel, template, lead).await
            }
            Action::UpdateLeadStatus { status } => {
                self.store.update_lead_status(lead.id, *status).await?;
                Ok(json!({"lead_id": lead.id, "status": status}))
            }
            Action::AssignLead { assignee_id } => {
                self.store.assign_lead(lead.id, *assignee_id).await?;
                Ok(json!({"lead_id": lead.id, "assigned_to": assignee_id}))
            }
            Action::CreateTask {
                title,
                description,
                due_in_hours,
            } => {
                let task = LeadTask {
                    id: Uuid::new_v4(),
                    lead_id: lead.id,
                    title: render_template(title, lead),
                    description: description.clone(),
                    due_at: due_in_hours.map(|h| Utc::now() + chrono::Duration::hours(h)),
                    completed: false,
                    created_at: Utc::now(),
                };
                self.store.create_task(&task).await?;
                Ok(json!({"task_id": task.id, "lead_id": lead.id}))
            }
            Action::UpdateTags { tags } => {
                self.store.add_lead_tags(lead.id, tags).await?;
                Ok(json!({"lead_id": lead.id, "added_tags": tags}))
            }
            // Wait never reaches the executor; the pipeline owns the delay
            // so cancellation can interrupt it.
            Action::Wait { .. } => Ok(Value::Null),
        }
    }

    async fn send_message(
        &self,
        channel: MessageChannel,
        template: &str,
        lead: &Lead,
    ) -> Result<Value, ActionError> {
        let phone = lead
            .phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ActionError::MissingChannel(lead.id))?;

        let content = render_template(template, lead);
        let receipt = self.sender.send(channel, phone, &content).await?;

        let record = MessageRecord {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            channel,
            direction: MessageDirection::Outbound,
            content,
            provider_message_id: Some(receipt.provider_message_id.clone()),
            created_at: Utc::now(),
        };
        self.store.record_message(&record).await?;

        Ok(json!({
            "message_id": record.id,
            "provider_message_id": receipt.provider_message_id
        }))
    }
}

/// Replace `{name}`, `{loanType}`, `{loanAmount}`, `{phone}` and `{email}`
/// with the target lead's fields. Unknown placeholders are left untouched.
pub fn render_template(template: &str, lead: &Lead) -> String {
    let re = Regex::new(r"\{([a-zA-Z]+)\}").expect("static placeholder pattern");
    re.replace_all(template, |caps: &regex::Captures| match &caps[1] {
        "name" => lead.name.clone(),
        "loanType" => lead.loan_type.clone().unwrap_or_default(),
        "loanAmount" => lead
            .loan_amount
            .map(|a| a.to_string())
            .unwrap_or_default(),
        "phone" => lead.phone.clone().unwrap_or_default(),
        "email" => lead.email.clone().unwrap_or_default(),
        _ => caps[0].to_string(),
    })
    .into_owned()
}
