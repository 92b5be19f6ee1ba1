//! Attendance endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiError;
use crate::attendance::{AttendanceSheet, MarkEntry, SaveAttendanceRequest, SaveReport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveAttendanceBody {
    pub date: NaiveDate,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub marks: Vec<MarkEntry>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// POST /api/classes/:class_id/attendance
pub async fn save_attendance(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<SaveAttendanceBody>,
) -> Result<Json<SaveReport>, ApiError> {
    let report = state
        .engine
        .save_attendance(SaveAttendanceRequest {
            class_id,
            date: body.date,
            session_id: body.session_id,
            marks: body.marks,
            created_by: body.created_by,
        })
        .await?;
    Ok(Json(report))
}

/// GET /api/classes/:class_id/attendance/:date
pub async fn get_attendance(
    State(state): State<AppState>,
    Path((class_id, date)): Path<(Uuid, NaiveDate)>,
) -> Result<Json<AttendanceSheet>, ApiError> {
    let sheet = state.engine.get_attendance(class_id, date).await?;
    Ok(Json(sheet))
}

#[derive(Debug, Serialize)]
pub struct DeleteAttendanceResponse {
    pub summary_id: Uuid,
    pub released_sessions: u64,
}

/// DELETE /api/attendance/:summary_id
pub async fn delete_attendance(
    State(state): State<AppState>,
    Path(summary_id): Path<Uuid>,
) -> Result<Json<DeleteAttendanceResponse>, ApiError> {
    let released_sessions = state.engine.delete_attendance(summary_id).await?;
    Ok(Json(DeleteAttendanceResponse {
        summary_id,
        released_sessions,
    }))
}
