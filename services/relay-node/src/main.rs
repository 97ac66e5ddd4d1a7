use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod config;
mod handlers;
mod state;

use config::NodeConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env()?;
    lifeline_core::logging::init_with(config.log_json);

    let state = Arc::new(AppState::new(&config)?);
    let _sweeper = state.engine.spawn_sweeper();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/triggers/request-created", post(handlers::request_created))
        .route("/triggers/request-updated", post(handlers::request_updated))
        .route("/requests/:id/seen", post(handlers::record_seen))
        .route("/notices", get(handlers::recent_notices))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Lifeline relay node listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "lifeline-relay-node",
        "timestamp": Utc::now().to_rfc3339()
    })))
}
