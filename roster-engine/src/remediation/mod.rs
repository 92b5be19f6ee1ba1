//! Make-up obligations raised by absences

pub mod generator;

use chrono::{DateTime, NaiveDate, Utc};
use roster_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use generator::RemediationGenerator;

/// Actor recorded for automatically created obligations
pub const SYSTEM_ACTOR: &str = "system";

/// Why a student needs remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationKind {
    Absence,
    Struggling,
}

impl RemediationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationKind::Absence => "absence",
            RemediationKind::Struggling => "struggling",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "absence" => Ok(RemediationKind::Absence),
            "struggling" => Ok(RemediationKind::Struggling),
            other => Err(Error::Validation(format!("Unknown remediation kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationStatus {
    Pending,
    Scheduled,
    Done,
}

impl RemediationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationStatus::Pending => "pending",
            RemediationStatus::Scheduled => "scheduled",
            RemediationStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RemediationStatus::Pending),
            "scheduled" => Ok(RemediationStatus::Scheduled),
            "done" => Ok(RemediationStatus::Done),
            other => Err(Error::Validation(format!("Unknown remediation status '{}'", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemediationStatus::Done)
    }
}

/// One entry of an obligation's append-only history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: RemediationStatus,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationObligation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub absence_date: NaiveDate,
    pub kind: RemediationKind,
    pub status: RemediationStatus,
    /// Attendance detail that raised the obligation
    pub attendance_detail_id: Option<Uuid>,
    /// Make-up session the obligation was scheduled into
    pub makeup_session_id: Option<Uuid>,
    pub history: Vec<StatusChange>,
}
