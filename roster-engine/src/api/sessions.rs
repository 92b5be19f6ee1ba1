//! Session endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use roster_common::db::HolidayRecord;
use roster_common::time::parse_date;
use roster_common::Error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiError;
use crate::schedule::TimeWindow;
use crate::sessions::{DateRange, Session, SessionStatus};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExpandRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// POST /api/classes/:class_id/sessions/expand
pub async fn expand_sessions(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<ExpandRequest>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = state
        .engine
        .expand_sessions(class_id, body.from, body.to)
        .await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<SessionStatus>,
}

/// GET /api/classes/:class_id/sessions?from=&to=&status=
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let range = match (query.from, query.to) {
        (Some(from), Some(to)) => Some(DateRange::new(from, to)?),
        (None, None) => None,
        _ => {
            let message = "'from' and 'to' must be given together".to_string();
            return Err(Error::Validation(message).into());
        }
    };

    let sessions = state.engine.list_sessions(class_id, range, query.status).await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub struct MakeupRequest {
    pub date: NaiveDate,
    /// `HH:MM-HH:MM`
    pub time: Option<String>,
    pub note: Option<String>,
}

/// POST /api/classes/:class_id/sessions/makeup
pub async fn append_makeup_session(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<MakeupRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let time = match body.time.as_deref() {
        Some(text) => Some(TimeWindow::parse(text).ok_or_else(|| {
            Error::Validation(format!("Invalid time window '{}', expected HH:MM-HH:MM", text))
        })?),
        None => None,
    };

    let session = state
        .engine
        .append_makeup_session(class_id, body.date, time, body.note.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /api/sessions/:session_id/cancel
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .engine
        .cancel_session(session_id, body.reason.as_deref())
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Serialize)]
pub struct HolidayResponse {
    pub date: NaiveDate,
    pub holiday: Option<HolidayRecord>,
}

/// GET /api/holidays/:date
pub async fn holiday_covering(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<HolidayResponse>, ApiError> {
    let date = parse_date(&date)?;
    let holiday = state.engine.holiday_covering(date).await?;
    Ok(Json(HolidayResponse { date, holiday }))
}
