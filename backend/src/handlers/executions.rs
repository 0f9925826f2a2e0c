use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::automation::Execution;
use crate::error::{ApiResult, AppError};

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_running_executions))
        .route("/:id", get(get_execution))
        .route("/:id/cancel", post(cancel_execution))
}

async fn list_running_executions(State(state): State<Arc<AppState>>) -> Json<Vec<Execution>> {
    Json(state.engine.list_running().await)
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    let execution = state
        .engine
        .get_execution(id)
        .await
        .ok_or_else(|| AppError::NotFound("Execution".to_string()))?;
    Ok(Json(execution))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if state.engine.get_execution(id).await.is_none() {
        return Err(AppError::NotFound("Execution".to_string()));
    }

    let cancelled = state.engine.cancel(id).await;
    Ok(Json(json!({"id": id, "cancelled": cancelled})))
}
