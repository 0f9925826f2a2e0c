use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod automation;
mod config;
mod database;
mod error;
mod handlers;
mod services;
mod store;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use automation::{ActionExecutor, EventEmitter, ExecutionEngine, RetryManager, TriggerManager};
use services::HttpMessagingService;
use store::{AutomationStore, PgStore};

pub struct AppState {
    pub store: Arc<dyn AutomationStore>,
    pub engine: Arc<ExecutionEngine>,
    pub triggers: Arc<TriggerManager>,
    pub events: EventEmitter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn AutomationStore> = Arc::new(PgStore::new(db_pool));
    let sender = Arc::new(HttpMessagingService::new(&config.messaging)?);
    let retries = Arc::new(RetryManager::new());

    let (triggers, mut fires) = TriggerManager::new().await?;
    let triggers = Arc::new(triggers);

    let executor = ActionExecutor::new(
        store.clone(),
        sender,
        Duration::from_secs(config.engine.action_timeout_secs),
    );
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        executor,
        retries,
        config.engine.target_concurrency,
    ));

    // Re-register triggers for workflows that were active before restart.
    // One bad definition must not keep the rest from scheduling.
    for workflow in store.list_active_workflows().await? {
        if let Err(e) = triggers.register(workflow.id, &workflow.trigger).await {
            warn!(workflow_id = %workflow.id, "skipping trigger registration: {e}");
        }
    }

    // Trigger-fire dispatcher: one broken workflow never stops the loop.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some(fire) = fires.recv().await {
                match engine.execute(fire.workflow_id, Some(fire.payload)).await {
                    Ok(execution_id) => {
                        info!(workflow_id = %fire.workflow_id, %execution_id, "trigger fire accepted")
                    }
                    Err(e) => error!(workflow_id = %fire.workflow_id, "trigger fire dropped: {e}"),
                }
            }
        });
    }

    let events = EventEmitter::new(triggers.clone());
    let app_state = Arc::new(AppState {
        store,
        engine,
        triggers,
        events,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "LeadPilot CRM API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/executions", handlers::execution_routes())
        .nest("/api/v1/events", handlers::event_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
