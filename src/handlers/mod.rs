pub mod admin;
pub mod payments;
pub mod webhook;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::AppState;
use crate::store::{IntentStore, LedgerStore};

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub intent_store: String,
    pub ledger_store: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let intent_store = match state.engine.intents().ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    let ledger_store = match state.engine.ledger().ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    let healthy = intent_store == "connected" && ledger_store == "connected";
    let body = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        intent_store: intent_store.to_string(),
        ledger_store: ledger_store.to_string(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(body))
}
