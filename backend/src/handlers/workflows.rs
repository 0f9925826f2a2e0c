use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::automation::{ActionStep, Condition, Trigger, WorkflowDefinition};
use crate::error::{ApiResult, AppError};

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route(
            "/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/:id/toggle", patch(toggle_workflow))
        .route("/:id/execute", post(execute_workflow))
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkflowCreate {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionStep>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkflowUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionStep>,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
}

async fn list_workflows(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    let workflows = state.store.list_workflows().await?;
    Ok(Json(workflows))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let workflow = state
        .store
        .get_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;
    Ok(Json(workflow))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WorkflowCreate>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    payload.validate()?;
    // Fail fast on a malformed schedule before anything is written.
    payload.trigger.validate()?;

    let workflow = WorkflowDefinition {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        active: payload.active,
        trigger: payload.trigger,
        conditions: payload.conditions,
        actions: payload.actions,
        total_runs: 0,
        successful_runs: 0,
        last_run: None,
        next_run: None,
        created_at: Utc::now(),
        updated_at: None,
    };

    state.store.insert_workflow(&workflow).await?;
    if workflow.active {
        state.triggers.register(workflow.id, &workflow.trigger).await?;
    }

    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowUpdate>,
) -> ApiResult<Json<WorkflowDefinition>> {
    payload.validate()?;
    payload.trigger.validate()?;

    let existing = state
        .store
        .get_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;

    let workflow = WorkflowDefinition {
        id,
        name: payload.name,
        description: payload.description,
        active: payload.active,
        trigger: payload.trigger,
        conditions: payload.conditions,
        actions: payload.actions,
        updated_at: Some(Utc::now()),
        ..existing
    };

    state.store.update_workflow(&workflow).await?;
    // Re-derive scheduling from the new definition: full teardown, then
    // re-register only while the workflow stays active.
    state
        .triggers
        .toggle(id, workflow.active, &workflow.trigger)
        .await?;

    Ok(Json(workflow))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = state.store.delete_workflow(id).await?;
    if !deleted {
        return Err(AppError::NotFound("Workflow".to_string()));
    }

    state.triggers.unregister(id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ToggleRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = state
        .store
        .get_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;

    state.store.set_workflow_active(id, payload.active).await?;
    state
        .triggers
        .toggle(id, payload.active, &workflow.trigger)
        .await?;

    Ok(Json(json!({"id": id, "active": payload.active})))
}

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    let execution_id = state.engine.execute(id, None).await?;
    Ok((StatusCode::ACCEPTED, Json(ExecuteResponse { execution_id })))
}
