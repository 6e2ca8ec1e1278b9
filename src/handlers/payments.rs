use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::domain::money::Money;
use crate::error::AppError;
use crate::gateways::GatewayKind;
use crate::services::reconciliation::NewIntent;

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub user_id: Uuid,
    /// Decimal string; never a float.
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub session_id: String,
    pub status: String,
}

pub async fn create_intent(
    State(state): State<AppState>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let amount = Money::parse(&request.amount, &request.currency)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mut metadata = match request.metadata {
        Some(value) if value.is_object() => value,
        _ => json!({}),
    };
    if let Some(payment_type) = request.payment_type {
        metadata["payment_type"] = json!(payment_type);
    }

    let intent = state
        .engine
        .create_intent(NewIntent {
            user_id: request.user_id,
            amount,
            metadata,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateIntentResponse {
            session_id: intent.session_id,
            status: intent.status.as_str().to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub gateway: String,
}

pub async fn submit_payment_details(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind = request
        .gateway
        .parse::<GatewayKind>()
        .map_err(AppError::Validation)?;

    let checkout = state
        .engine
        .submit_payment_details(&session_id, kind)
        .await?;
    Ok(Json(json!({ "checkout_target": checkout })))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state.engine.get_status(&session_id).await?;
    Ok(Json(intent))
}
