pub mod config;
pub mod domain;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::services::reconciliation::ReconciliationEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
}

pub fn create_app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/payments/:session_id/force-succeed",
            post(handlers::admin::force_succeed),
        )
        .route(
            "/admin/payments/:session_id/reset",
            post(handlers::admin::reset_from_error),
        )
        .route_layer(axum_middleware::from_fn(middleware::auth::admin_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_intent))
        .route(
            "/payments/:session_id/submit",
            post(handlers::payments::submit_payment_details),
        )
        .route("/payments/:session_id", get(handlers::payments::get_status))
        .route("/webhooks/:gateway", post(handlers::webhook::receive))
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
