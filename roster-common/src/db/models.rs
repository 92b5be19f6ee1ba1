//! Database models for registry tables owned outside the engine

use serde::{Deserialize, Serialize};

/// Class registry row
///
/// The engine reads classes but never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    /// Free-text weekly schedule, e.g. "Thứ 2, 4, 6 (18h-19h30)"
    pub schedule_text: String,
    pub room: Option<String>,
    pub teacher: Option<String>,
    /// Total-session cap for the class (None = use configured default)
    pub total_sessions: Option<i64>,
}

/// Holiday registry row (inclusive date range, `YYYY-MM-DD`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HolidayRecord {
    pub id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
}
