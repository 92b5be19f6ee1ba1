//! Student balance and remediation listing endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use crate::balance::{BalanceChange, StudentBalance};
use crate::remediation::{RemediationObligation, RemediationStatus};
use crate::AppState;

/// GET /api/students/:student_id/balance
pub async fn student_balance(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<StudentBalance>, ApiError> {
    Ok(Json(state.engine.student_balance(student_id).await?))
}

/// POST /api/students/:student_id/recalculate
pub async fn recalculate_balance(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<BalanceChange>, ApiError> {
    Ok(Json(state.engine.recalculate_student_balance(student_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RemediationQuery {
    pub status: Option<RemediationStatus>,
}

/// GET /api/students/:student_id/remediations?status=
pub async fn student_remediations(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Query(query): Query<RemediationQuery>,
) -> Result<Json<Vec<RemediationObligation>>, ApiError> {
    let obligations = state
        .engine
        .remediations_for_student(student_id, query.status)
        .await?;
    Ok(Json(obligations))
}
