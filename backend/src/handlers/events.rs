use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
};
use leadpilot_shared::{LeadStatus, MessageChannel};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiResult, AppError};

/// Event ingestion for the CRUD/webhook layer: each endpoint forwards one
/// domain occurrence to the Trigger Manager via the typed emitter.
pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/lead-created", post(lead_created))
        .route("/lead-status-changed", post(lead_status_changed))
        .route("/lead-assigned", post(lead_assigned))
        .route("/message-received", post(message_received))
}

#[derive(Debug, Deserialize)]
pub struct LeadCreatedEvent {
    pub lead_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LeadStatusChangedEvent {
    pub lead_id: Uuid,
    pub old_status: LeadStatus,
    pub new_status: LeadStatus,
}

#[derive(Debug, Deserialize)]
pub struct LeadAssignedEvent {
    pub lead_id: Uuid,
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MessageReceivedEvent {
    pub lead_id: Uuid,
    pub channel: MessageChannel,
    pub content: String,
}

async fn lead_created(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LeadCreatedEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let leads = state.store.list_leads().await?;
    let lead = leads
        .iter()
        .find(|l| l.id == payload.lead_id)
        .ok_or_else(|| AppError::NotFound("Lead".to_string()))?;

    let event = state.events.lead_created(lead).await;
    Ok((StatusCode::ACCEPTED, Json(json!({"event_type": event.event_type}))))
}

async fn lead_status_changed(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LeadStatusChangedEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let event = state
        .events
        .lead_status_changed(payload.lead_id, payload.old_status, payload.new_status)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({"event_type": event.event_type}))))
}

async fn lead_assigned(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LeadAssignedEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let event = state
        .events
        .lead_assigned(payload.lead_id, payload.assignee_id)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({"event_type": event.event_type}))))
}

async fn message_received(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MessageReceivedEvent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let event = state
        .events
        .message_received(payload.lead_id, payload.channel, &payload.content)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({"event_type": event.event_type}))))
}
