use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ForceSucceedRequest {
    /// Mandatory audit note; requests without one are rejected.
    pub note: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "admin".to_string()
}

pub async fn force_succeed(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ForceSucceedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state
        .engine
        .force_succeed(&session_id, &request.actor, &request.note)
        .await?;
    Ok(Json(json!({
        "session_id": intent.session_id,
        "status": intent.status.as_str(),
    })))
}

pub async fn reset_from_error(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state.engine.reset_from_error(&session_id).await?;
    Ok(Json(json!({
        "session_id": intent.session_id,
        "status": intent.status.as_str(),
    })))
}
