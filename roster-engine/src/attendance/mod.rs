//! Attendance model
//!
//! A summary row per (class, date) with per-student detail rows. Saving
//! attendance is a saga: the summary and details commit atomically, then
//! session completion, remediation and balance reconciliation run as
//! independently idempotent follow-ups.

pub mod recorder;

use chrono::{DateTime, NaiveDate, Utc};
use roster_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::balance::BalanceChange;

pub use recorder::AttendanceRecorder;

/// Finalized attendance mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceMark {
    OnTime,
    Late,
    Absent,
    Reserved,
    MadeUp,
}

impl AttendanceMark {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMark::OnTime => "on-time",
            AttendanceMark::Late => "late",
            AttendanceMark::Absent => "absent",
            AttendanceMark::Reserved => "reserved",
            AttendanceMark::MadeUp => "made-up",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "on-time" => Ok(AttendanceMark::OnTime),
            "late" => Ok(AttendanceMark::Late),
            "absent" => Ok(AttendanceMark::Absent),
            "reserved" => Ok(AttendanceMark::Reserved),
            "made-up" => Ok(AttendanceMark::MadeUp),
            other => Err(Error::Validation(format!("Unknown attendance mark '{}'", other))),
        }
    }

    /// Counts as an attended session
    pub fn is_present(&self) -> bool {
        matches!(self, AttendanceMark::OnTime | AttendanceMark::Late)
    }
}

/// One student's entry on an attendance sheet; `mark = None` means unset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkEntry {
    pub student_id: Uuid,
    #[serde(default)]
    pub mark: Option<AttendanceMark>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub homework_percent: Option<i64>,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub bonus_points: Option<i64>,
    #[serde(default)]
    pub punctual: Option<bool>,
}

impl MarkEntry {
    pub fn new(student_id: Uuid, mark: AttendanceMark) -> Self {
        Self {
            student_id,
            mark: Some(mark),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryStatus {
    Taken,
    NotTaken,
    Holiday,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Taken => "taken",
            SummaryStatus::NotTaken => "not-taken",
            SummaryStatus::Holiday => "holiday",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "taken" => Ok(SummaryStatus::Taken),
            "not-taken" => Ok(SummaryStatus::NotTaken),
            "holiday" => Ok(SummaryStatus::Holiday),
            other => Err(Error::Validation(format!("Unknown summary status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttendanceCounts {
    pub present: i64,
    pub absent: i64,
    pub reserved: i64,
    pub made_up: i64,
}

impl AttendanceCounts {
    pub fn tally<'a>(marks: impl IntoIterator<Item = &'a AttendanceMark>) -> Self {
        let mut counts = Self::default();
        for mark in marks {
            match mark {
                AttendanceMark::OnTime | AttendanceMark::Late => counts.present += 1,
                AttendanceMark::Absent => counts.absent += 1,
                AttendanceMark::Reserved => counts.reserved += 1,
                AttendanceMark::MadeUp => counts.made_up += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub id: Uuid,
    pub class_id: Uuid,
    pub date: NaiveDate,
    pub session_id: Option<Uuid>,
    pub session_number: Option<i64>,
    pub counts: AttendanceCounts,
    pub status: SummaryStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceDetail {
    pub id: Uuid,
    pub summary_id: Uuid,
    pub student_id: Uuid,
    pub mark: AttendanceMark,
    pub note: String,
    pub homework_percent: Option<i64>,
    pub test_name: Option<String>,
    pub score: Option<f64>,
    pub bonus_points: Option<i64>,
    pub punctual: bool,
}

/// A summary with its details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSheet {
    pub summary: AttendanceSummary,
    pub details: Vec<AttendanceDetail>,
}

/// Input of a save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAttendanceRequest {
    pub class_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub marks: Vec<MarkEntry>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Remediation touched by a save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub obligation_id: Uuid,
    pub student_id: Uuid,
    /// False when the obligation already existed from an earlier save
    pub created: bool,
}

/// Per-student reconciliation result; one failure never aborts the others
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub student_id: Uuid,
    pub change: Option<BalanceChange>,
    pub error: Option<String>,
}

/// What a save did
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub summary_id: Uuid,
    pub class_id: Uuid,
    pub date: NaiveDate,
    pub status: SummaryStatus,
    pub counts: AttendanceCounts,
    pub detail_count: usize,
    /// Session newly moved to `completed` by this save
    pub completed_session_id: Option<Uuid>,
    pub remediations: Vec<RemediationOutcome>,
    pub reconciliations: Vec<ReconcileOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_late_as_present() {
        let marks = [
            AttendanceMark::OnTime,
            AttendanceMark::Late,
            AttendanceMark::Absent,
            AttendanceMark::Reserved,
            AttendanceMark::MadeUp,
            AttendanceMark::Absent,
        ];
        let counts = AttendanceCounts::tally(marks.iter());
        assert_eq!(
            counts,
            AttendanceCounts {
                present: 2,
                absent: 2,
                reserved: 1,
                made_up: 1
            }
        );
    }

    #[test]
    fn test_mark_entry_json_defaults() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"student_id":"{}","mark":"made-up"}}"#, id);
        let entry: MarkEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry.mark, Some(AttendanceMark::MadeUp));
        assert!(entry.score.is_none());

        let json = format!(r#"{{"student_id":"{}"}}"#, id);
        let unset: MarkEntry = serde_json::from_str(&json).unwrap();
        assert!(unset.mark.is_none());
    }

    #[test]
    fn test_only_on_time_and_late_are_present() {
        assert!(AttendanceMark::OnTime.is_present());
        assert!(AttendanceMark::Late.is_present());
        assert!(!AttendanceMark::MadeUp.is_present());
        assert!(!AttendanceMark::Reserved.is_present());
    }
}
