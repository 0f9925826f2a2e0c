use axum::response::Json;
use serde_json::{Value, json};

pub mod events;
pub mod executions;
pub mod workflows;

pub use events::event_routes;
pub use executions::execution_routes;
pub use workflows::workflow_routes;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "leadpilot-backend",
    }))
}
