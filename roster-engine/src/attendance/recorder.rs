//! Attendance recorder
//!
//! Re-saving the same (class, date) updates the existing summary and fully
//! replaces its details. Two concurrent saves resolve on the unique
//! (class, date) key: the last write wins.

use chrono::{DateTime, NaiveDate, Utc};
use roster_common::time::{format_date, DATE_FORMAT};
use roster_common::uuid_utils::parse_stored;
use roster_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AttendanceCounts, AttendanceDetail, AttendanceMark, AttendanceSheet, AttendanceSummary,
    MarkEntry, ReconcileOutcome, RemediationOutcome, SaveAttendanceRequest, SaveReport,
    SummaryStatus,
};
use crate::balance::BalanceReconciler;
use crate::remediation::{RemediationGenerator, RemediationKind};
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AttendanceRecorder {
    db: SqlitePool,
    sessions: SessionStore,
    remediation: RemediationGenerator,
    reconciler: BalanceReconciler,
}

impl AttendanceRecorder {
    pub fn new(
        db: SqlitePool,
        sessions: SessionStore,
        remediation: RemediationGenerator,
        reconciler: BalanceReconciler,
    ) -> Self {
        Self {
            db,
            sessions,
            remediation,
            reconciler,
        }
    }

    /// Save attendance for a (class, date)
    pub async fn save(&self, request: SaveAttendanceRequest) -> Result<SaveReport> {
        let SaveAttendanceRequest {
            class_id,
            date,
            session_id,
            marks,
            created_by,
        } = request;

        if marks.is_empty() {
            return Err(Error::Validation("Attendance marks are required".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &marks {
            if !seen.insert(entry.student_id) {
                return Err(Error::Validation(format!(
                    "Student {} is marked more than once",
                    entry.student_id
                )));
            }
            if let Some(percent) = entry.homework_percent {
                if !(0..=100).contains(&percent) {
                    return Err(Error::Validation(format!(
                        "Homework percentage {} for student {} is outside 0-100",
                        percent, entry.student_id
                    )));
                }
            }
        }

        let class_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM classes WHERE id = ?)")
                .bind(class_id.to_string())
                .fetch_one(&self.db)
                .await?;
        if !class_exists {
            return Err(Error::NotFound(format!("Class {}", class_id)));
        }

        let session_number = match session_id {
            Some(session_id) => {
                let session = self.sessions.get(session_id).await?;
                if session.class_id != class_id {
                    return Err(Error::Validation(format!(
                        "Session {} does not belong to class {}",
                        session_id, class_id
                    )));
                }
                if session.date != date {
                    return Err(Error::Validation(format!(
                        "Session {} is on {}, not {}",
                        session_id, session.date, date
                    )));
                }
                Some(session.seq_no)
            }
            None => None,
        };

        let supplied = marks.len();
        let finalized: Vec<(MarkEntry, AttendanceMark)> = marks
            .into_iter()
            .filter_map(|entry| entry.mark.map(|mark| (entry, mark)))
            .collect();
        if finalized.is_empty() {
            return Err(Error::Validation("No finalized attendance marks".to_string()));
        }
        let all_finalized = finalized.len() == supplied;

        let counts = AttendanceCounts::tally(finalized.iter().map(|(_, mark)| mark));
        let status = if all_finalized {
            SummaryStatus::Taken
        } else {
            SummaryStatus::NotTaken
        };

        let summary_id = self
            .write_sheet(
                class_id,
                date,
                session_id,
                session_number,
                &counts,
                status,
                created_by.as_deref(),
                &finalized,
            )
            .await?;

        info!(
            summary_id = %summary_id,
            class_id = %class_id,
            date = %format_date(date),
            present = counts.present,
            absent = counts.absent,
            status = status.as_str(),
            "Attendance saved"
        );

        // Follow-ups: each idempotent, none undoes the committed sheet

        let mut completed_session_id = None;
        if let (true, Some(session_id)) = (all_finalized, session_id) {
            match self.sessions.mark_completed(session_id, summary_id).await {
                Ok(true) => completed_session_id = Some(session_id),
                Ok(false) => {
                    debug!(session_id = %session_id, "Session already completed by this summary")
                }
                Err(e) => warn!(
                    session_id = %session_id,
                    summary_id = %summary_id,
                    error = %e,
                    "Failed to mark session completed"
                ),
            }
        }

        let mut remediations = Vec::new();
        for (entry, _) in finalized.iter().filter(|(_, mark)| *mark == AttendanceMark::Absent) {
            match self
                .remediation
                .create_from_absence(entry.student_id, class_id, date, RemediationKind::Absence)
                .await
            {
                Ok((obligation, created)) => remediations.push(RemediationOutcome {
                    obligation_id: obligation.id,
                    student_id: entry.student_id,
                    created,
                }),
                Err(e) => warn!(
                    student_id = %entry.student_id,
                    class_id = %class_id,
                    error = %e,
                    "Failed to create remediation obligation"
                ),
            }
        }

        let mut reconciliations = Vec::new();
        for (entry, _) in finalized.iter().filter(|(_, mark)| mark.is_present()) {
            let outcome = match self
                .reconciler
                .reconcile(entry.student_id, class_id, summary_id)
                .await
            {
                Ok(change) => ReconcileOutcome {
                    student_id: entry.student_id,
                    change: Some(change),
                    error: None,
                },
                Err(e) => {
                    warn!(
                        student_id = %entry.student_id,
                        summary_id = %summary_id,
                        error = %e,
                        "Balance reconciliation failed"
                    );
                    ReconcileOutcome {
                        student_id: entry.student_id,
                        change: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reconciliations.push(outcome);
        }

        Ok(SaveReport {
            summary_id,
            class_id,
            date,
            status,
            counts,
            detail_count: finalized.len(),
            completed_session_id,
            remediations,
            reconciliations,
        })
    }

    /// Upsert the summary and replace its details in one transaction
    #[allow(clippy::too_many_arguments)]
    async fn write_sheet(
        &self,
        class_id: Uuid,
        date: NaiveDate,
        session_id: Option<Uuid>,
        session_number: Option<i64>,
        counts: &AttendanceCounts,
        status: SummaryStatus,
        created_by: Option<&str>,
        finalized: &[(MarkEntry, AttendanceMark)],
    ) -> Result<Uuid> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        let stored_id: String = sqlx::query_scalar(
            r#"
            INSERT INTO attendance_summaries (
                id, class_id, attendance_date, session_id, session_number,
                present_count, absent_count, reserved_count, made_up_count,
                status, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (class_id, attendance_date) DO UPDATE SET
                session_id = COALESCE(excluded.session_id, attendance_summaries.session_id),
                session_number = COALESCE(excluded.session_number, attendance_summaries.session_number),
                present_count = excluded.present_count,
                absent_count = excluded.absent_count,
                reserved_count = excluded.reserved_count,
                made_up_count = excluded.made_up_count,
                status = excluded.status,
                created_by = COALESCE(attendance_summaries.created_by, excluded.created_by),
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(class_id.to_string())
        .bind(format_date(date))
        .bind(session_id.map(|id| id.to_string()))
        .bind(session_number)
        .bind(counts.present)
        .bind(counts.absent)
        .bind(counts.reserved)
        .bind(counts.made_up)
        .bind(status.as_str())
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
        let summary_id = parse_stored("attendance summary id", &stored_id)?;

        sqlx::query("DELETE FROM attendance_details WHERE summary_id = ?")
            .bind(&stored_id)
            .execute(&mut *tx)
            .await?;

        for (entry, mark) in finalized {
            sqlx::query(
                r#"
                INSERT INTO attendance_details (
                    id, summary_id, student_id, mark, note,
                    homework_percent, test_name, score, bonus_points, punctual
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&stored_id)
            .bind(entry.student_id.to_string())
            .bind(mark.as_str())
            .bind(entry.note.as_deref().unwrap_or(""))
            .bind(entry.homework_percent)
            .bind(entry.test_name.as_deref())
            .bind(entry.score)
            .bind(entry.bonus_points)
            .bind(entry.punctual.unwrap_or(true))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(summary_id)
    }

    /// Summary and details for a (class, date)
    pub async fn get(&self, class_id: Uuid, date: NaiveDate) -> Result<AttendanceSheet> {
        let row = sqlx::query(
            r#"
            SELECT id, class_id, attendance_date, session_id, session_number,
                   present_count, absent_count, reserved_count, made_up_count,
                   status, created_by, created_at, updated_at
            FROM attendance_summaries
            WHERE class_id = ? AND attendance_date = ?
            "#,
        )
        .bind(class_id.to_string())
        .bind(format_date(date))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("Attendance for class {} on {}", class_id, format_date(date)))
        })?;
        let summary = summary_from_row(&row)?;

        let rows = sqlx::query(
            r#"
            SELECT id, summary_id, student_id, mark, note,
                   homework_percent, test_name, score, bonus_points, punctual
            FROM attendance_details
            WHERE summary_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(summary.id.to_string())
        .fetch_all(&self.db)
        .await?;
        let details = rows.iter().map(detail_from_row).collect::<Result<Vec<_>>>()?;

        Ok(AttendanceSheet { summary, details })
    }

    /// Delete a summary and its details
    ///
    /// Sessions completed by it go back to `scheduled` (or `makeup`).
    /// Balances are not rolled back. Returns the number of released sessions.
    pub async fn delete(&self, summary_id: Uuid) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE remediations
            SET attendance_detail_id = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE attendance_detail_id IN (SELECT id FROM attendance_details WHERE summary_id = ?)
            "#,
        )
        .bind(summary_id.to_string())
        .execute(&mut *tx)
        .await?;

        let released = SessionStore::release_summary(&mut *tx, summary_id).await?;

        let deleted = sqlx::query("DELETE FROM attendance_summaries WHERE id = ?")
            .bind(summary_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(Error::NotFound(format!("Attendance summary {}", summary_id)));
        }

        tx.commit().await?;

        info!(summary_id = %summary_id, released_sessions = released, "Attendance deleted");
        Ok(released)
    }
}

fn parse_timestamp(column: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid {} '{}': {}", column, s, e)))
}

fn summary_from_row(row: &SqliteRow) -> Result<AttendanceSummary> {
    let date: String = row.get("attendance_date");
    let session_id: Option<String> = row.get("session_id");
    let status: String = row.get("status");

    Ok(AttendanceSummary {
        id: parse_stored("attendance summary id", row.get("id"))?,
        class_id: parse_stored("class id", row.get("class_id"))?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| Error::Internal(format!("Invalid attendance date '{}': {}", date, e)))?,
        session_id: session_id
            .as_deref()
            .map(|s| parse_stored("session id", s))
            .transpose()?,
        session_number: row.get("session_number"),
        counts: AttendanceCounts {
            present: row.get("present_count"),
            absent: row.get("absent_count"),
            reserved: row.get("reserved_count"),
            made_up: row.get("made_up_count"),
        },
        status: SummaryStatus::parse(&status).map_err(|e| Error::Internal(e.to_string()))?,
        created_by: row.get("created_by"),
        created_at: parse_timestamp("created_at", row.get("created_at"))?,
        updated_at: parse_timestamp("updated_at", row.get("updated_at"))?,
    })
}

fn detail_from_row(row: &SqliteRow) -> Result<AttendanceDetail> {
    let mark: String = row.get("mark");

    Ok(AttendanceDetail {
        id: parse_stored("attendance detail id", row.get("id"))?,
        summary_id: parse_stored("attendance summary id", row.get("summary_id"))?,
        student_id: parse_stored("student id", row.get("student_id"))?,
        mark: AttendanceMark::parse(&mark).map_err(|e| Error::Internal(e.to_string()))?,
        note: row.get("note"),
        homework_percent: row.get("homework_percent"),
        test_name: row.get("test_name"),
        score: row.get("score"),
        bonus_points: row.get("bonus_points"),
        punctual: row.get("punctual"),
    })
}
