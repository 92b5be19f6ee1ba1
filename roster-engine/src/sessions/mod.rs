//! Session model and persistence

pub mod store;

use chrono::NaiveDate;
use roster_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::TimeWindow;

pub use store::SessionStore;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Makeup,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Makeup => "makeup",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "completed" => Ok(SessionStatus::Completed),
            "makeup" => Ok(SessionStatus::Makeup),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(Error::Validation(format!("Unknown session status '{}'", other))),
        }
    }
}

/// Whether a session belongs to the regular weekly numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    Regular,
    Makeup,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Regular => "regular",
            SessionKind::Makeup => "makeup",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "regular" => Ok(SessionKind::Regular),
            "makeup" => Ok(SessionKind::Makeup),
            other => Err(Error::Internal(format!("Unknown session kind '{}'", other))),
        }
    }
}

/// One concrete meeting of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub class_id: Uuid,
    pub seq_no: i64,
    pub date: NaiveDate,
    pub weekday_label: String,
    pub time: Option<TimeWindow>,
    pub room: Option<String>,
    pub teacher: Option<String>,
    pub note: Option<String>,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Attendance summary that completed this session
    pub attendance_summary_id: Option<Uuid>,
}

/// Inclusive date range filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(Error::Validation(format!(
                "Date range start {} is after end {}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::Completed,
            SessionStatus::Makeup,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::parse("done").is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let a = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches!(DateRange::new(a, b), Err(Error::Validation(_))));
        assert!(DateRange::new(b, a).is_ok());
    }
}
