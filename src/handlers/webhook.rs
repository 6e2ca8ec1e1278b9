use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde_json::json;

use crate::AppState;
use crate::error::AppError;
use crate::gateways::GatewayKind;
use crate::services::reconciliation::ApplyOutcome;

/// One endpoint per provider; the adapter owns authentication and payload
/// mapping. Signatures verify over the exact wire bytes, so the body stays
/// raw here.
pub async fn receive(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let kind = gateway
        .parse::<GatewayKind>()
        .map_err(AppError::Validation)?;

    let outcome = state.engine.handle_webhook(kind, &headers, &body).await?;

    // both outcomes are a 200: the provider must not redeliver either way
    let body = match outcome {
        ApplyOutcome::Applied(intent) => json!({
            "received": true,
            "status": intent.status.as_str(),
        }),
        ApplyOutcome::Ignored(reason) => json!({
            "received": true,
            "ignored": reason,
        }),
    };
    Ok(Json(body))
}
