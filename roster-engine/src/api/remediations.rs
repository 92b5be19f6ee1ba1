//! Remediation obligation endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use crate::remediation::{RemediationObligation, RemediationStatus, StatusChange};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: RemediationStatus,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub makeup_session_id: Option<Uuid>,
}

/// POST /api/remediations/:obligation_id/transition
pub async fn transition_remediation(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<RemediationObligation>, ApiError> {
    let obligation = state
        .engine
        .transition_remediation(
            obligation_id,
            body.status,
            &body.actor,
            body.reason.as_deref(),
            body.makeup_session_id,
        )
        .await?;
    Ok(Json(obligation))
}

/// GET /api/remediations/:obligation_id/history
pub async fn remediation_history(
    State(state): State<AppState>,
    Path(obligation_id): Path<Uuid>,
) -> Result<Json<Vec<StatusChange>>, ApiError> {
    Ok(Json(state.engine.remediation_history(obligation_id).await?))
}
