// Event Emitter - typed wrappers translating domain occurrences into the
// generic event shape the Trigger Manager consumes

use std::sync::Arc;

use leadpilot_shared::{Lead, LeadStatus, MessageChannel};
use serde_json::{Value, json};
use uuid::Uuid;

use super::trigger_manager::TriggerManager;
use super::triggers::{DomainEvent, EventType};

/// Entry point for the CRUD/webhook layer: one method per domain
/// occurrence. Each returns the constructed event, which is handy for
/// logging and tests.
#[derive(Clone)]
pub struct EventEmitter {
    triggers: Arc<TriggerManager>,
}

impl EventEmitter {
    pub fn new(triggers: Arc<TriggerManager>) -> Self {
        Self { triggers }
    }

    pub async fn lead_created(&self, lead: &Lead) -> DomainEvent {
        self.emit(
            EventType::LeadCreated,
            json!({
                "lead_id": lead.id,
                "name": lead.name,
                "status": lead.status,
                "source": lead.source,
                "loan_type": lead.loan_type,
            }),
        )
        .await
    }

    pub async fn lead_status_changed(
        &self,
        lead_id: Uuid,
        old_status: LeadStatus,
        new_status: LeadStatus,
    ) -> DomainEvent {
        self.emit(
            EventType::LeadStatusChanged,
            json!({
                "lead_id": lead_id,
                "old_status": old_status,
                "status": new_status,
            }),
        )
        .await
    }

    pub async fn lead_assigned(&self, lead_id: Uuid, assignee_id: Uuid) -> DomainEvent {
        self.emit(
            EventType::LeadAssigned,
            json!({
                "lead_id": lead_id,
                "assignee_id": assignee_id,
            }),
        )
        .await
    }

    pub async fn message_received(
        &self,
        lead_id: Uuid,
        channel: MessageChannel,
        content: &str,
    ) -> DomainEvent {
        self.emit(
            EventType::MessageReceived,
            json!({
                "lead_id": lead_id,
                "channel": channel,
                "content": content,
            }),
        )
        .await
    }

    pub async fn message_sent(
        &self,
        lead_id: Uuid,
        channel: MessageChannel,
        provider_message_id: Option<&str>,
    ) -> DomainEvent {
        self.emit(
            EventType::MessageSent,
            json!({
                "lead_id": lead_id,
                "channel": channel,
                "provider_message_id": provider_message_id,
            }),
        )
        .await
    }

    pub async fn task_completed(&self, task_id: Uuid, lead_id: Uuid) -> DomainEvent {
        self.emit(
            EventType::TaskCompleted,
            json!({
                "task_id": task_id,
                "lead_id": lead_id,
            }),
        )
        .await
    }

    async fn emit(&self, event_type: EventType, payload: Value) -> DomainEvent {
        let event = DomainEvent::new(event_type, payload);
        self.triggers.emit(&event).await;
        event
    }
}
