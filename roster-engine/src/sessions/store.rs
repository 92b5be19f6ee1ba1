//! Session persistence
//!
//! Invariants kept here:
//! - at most one regular session per class per date (also a partial unique index)
//! - regular sessions are numbered `1..N` by date after every regeneration
//! - a make-up session takes `max(seq_no) + 1` and never renumbers others
//! - regeneration numbers make-ups `N+1..` after the regular sessions
//! - regular sessions with `seq_no <= 0` are legacy garbage, hidden from every view

use chrono::NaiveDate;
use roster_common::time::{format_date, weekday_index, DATE_FORMAT};
use roster_common::uuid_utils::parse_stored;
use roster_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DateRange, Session, SessionKind, SessionStatus};
use crate::schedule::{weekday_label, SessionDraft, TimeWindow};

const SESSION_COLUMNS: &str = "id, class_id, seq_no, session_date, weekday_label, start_time, \
     end_time, room, teacher, note, kind, status, attendance_summary_id";

/// Hides legacy regular sessions with non-positive numbers
const VALID_SEQUENCE: &str = "NOT (kind = 'regular' AND seq_no <= 0)";

/// Session store backed by the `sessions` table
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
}

impl SessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Sessions of a class, date ascending, optionally filtered
    pub async fn list_by_class(
        &self,
        class_id: Uuid,
        range: Option<DateRange>,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let select = format!("SELECT {} FROM sessions WHERE class_id = ", SESSION_COLUMNS);
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(select);
        query.push_bind(class_id.to_string());
        query.push(format!(" AND {}", VALID_SEQUENCE));

        if let Some(range) = range {
            query.push(" AND session_date >= ");
            query.push_bind(format_date(range.from));
            query.push(" AND session_date <= ");
            query.push_bind(format_date(range.to));
        }

        if let Some(status) = status {
            query.push(" AND status = ");
            query.push_bind(status.as_str());
        }

        query.push(" ORDER BY session_date ASC, seq_no ASC");

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(session_from_row).collect()
    }

    /// The session of a class on a date: the regular one if present,
    /// otherwise the lowest-numbered make-up
    pub async fn find_by_class_and_date(
        &self,
        class_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE class_id = ? AND session_date = ? AND {}
            ORDER BY CASE kind WHEN 'regular' THEN 0 ELSE 1 END, seq_no ASC
            LIMIT 1
            "#,
            SESSION_COLUMNS, VALID_SEQUENCE
        ))
        .bind(class_id.to_string())
        .bind(format_date(date))
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Get a session by id
    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(session_id.to_string())
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;

        session_from_row(&row)
    }

    /// Mark a session completed by an attendance summary
    ///
    /// Returns `false` when the session already carries this exact completion.
    pub async fn mark_completed(&self, session_id: Uuid, summary_id: Uuid) -> Result<bool> {
        let session = self.get(session_id).await?;

        match session.status {
            SessionStatus::Cancelled => {
                return Err(Error::Conflict(format!(
                    "Session {} is cancelled and cannot be completed",
                    session_id
                )));
            }
            SessionStatus::Completed if session.attendance_summary_id == Some(summary_id) => {
                return Ok(false);
            }
            SessionStatus::Completed => {
                warn!(
                    session_id = %session_id,
                    previous_summary = ?session.attendance_summary_id,
                    summary_id = %summary_id,
                    "Relinking completed session to a different attendance summary"
                );
            }
            SessionStatus::Scheduled | SessionStatus::Makeup => {}
        }

        sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'completed', attendance_summary_id = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(summary_id.to_string())
        .bind(session_id.to_string())
        .execute(&self.db)
        .await?;

        debug!(session_id = %session_id, summary_id = %summary_id, "Session completed");
        Ok(true)
    }

    /// Append a one-off make-up session numbered after every existing session
    ///
    /// Fails with `Conflict` when a regular session already occupies the date.
    pub async fn append_makeup(
        &self,
        class_id: Uuid,
        date: NaiveDate,
        time: Option<TimeWindow>,
        note: Option<&str>,
    ) -> Result<Session> {
        let class_row = sqlx::query("SELECT room, teacher FROM classes WHERE id = ?")
            .bind(class_id.to_string())
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Class {}", class_id)))?;
        let room: Option<String> = class_row.get("room");
        let teacher: Option<String> = class_row.get("teacher");

        let session_id = Uuid::new_v4();
        let date_str = format_date(date);

        // Numbering and the collision check happen in one statement
        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (
                id, class_id, seq_no, session_date, weekday_label,
                start_time, end_time, room, teacher, note, kind, status
            )
            SELECT ?, ?, numbering.seq_no, ?, ?, ?, ?, ?, ?, ?, 'makeup', 'makeup'
            FROM (
                SELECT COALESCE(MAX(seq_no), 0) + 1 AS seq_no
                FROM sessions WHERE class_id = ?
            ) AS numbering
            WHERE NOT EXISTS (
                SELECT 1 FROM sessions
                WHERE class_id = ? AND session_date = ? AND kind = 'regular'
            )
            "#,
        )
        .bind(session_id.to_string())
        .bind(class_id.to_string())
        .bind(&date_str)
        .bind(weekday_label(weekday_index(date)))
        .bind(time.map(|t| t.start_label()))
        .bind(time.map(|t| t.end_label()))
        .bind(room)
        .bind(teacher)
        .bind(note)
        .bind(class_id.to_string())
        .bind(class_id.to_string())
        .bind(&date_str)
        .execute(&self.db)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "Class {} already has a regular session on {}",
                class_id, date_str
            )));
        }

        let session = self.get(session_id).await?;
        info!(
            class_id = %class_id,
            date = %date_str,
            seq_no = session.seq_no,
            "Appended make-up session"
        );
        Ok(session)
    }

    /// Bulk class-schedule regeneration
    ///
    /// Drops every still-`scheduled` regular session of the class, keeps
    /// sessions that carry history (completed, cancelled), fills the remaining
    /// dates from `drafts` and renumbers all regular sessions `1..N` by date.
    /// Make-up sessions follow as `N+1..` in date order so numbers stay
    /// unique. Summaries pointing at a renumbered session get the new number.
    pub async fn regenerate(
        &self,
        class_id: Uuid,
        drafts: &[SessionDraft],
        room: Option<&str>,
        teacher: Option<&str>,
    ) -> Result<Vec<Session>> {
        enum Slot<'a> {
            Existing(String),
            Draft(&'a SessionDraft),
        }

        let mut tx = self.db.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM sessions WHERE class_id = ? AND kind = 'regular' AND status = 'scheduled'",
        )
        .bind(class_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let kept: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, session_date FROM sessions WHERE class_id = ? AND kind = 'regular'",
        )
        .bind(class_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let mut slots: BTreeMap<NaiveDate, Slot> = BTreeMap::new();
        for (id, date) in kept {
            slots.insert(parse_stored_date(&date)?, Slot::Existing(id));
        }
        for draft in drafts {
            slots.entry(draft.date).or_insert(Slot::Draft(draft));
        }

        let mut inserted = 0usize;
        for (idx, (date, slot)) in slots.iter().enumerate() {
            let seq_no = idx as i64 + 1;
            match slot {
                Slot::Existing(id) => Self::renumber(&mut *tx, id, seq_no).await?,
                Slot::Draft(draft) => {
                    sqlx::query(
                        r#"
                        INSERT INTO sessions (
                            id, class_id, seq_no, session_date, weekday_label,
                            start_time, end_time, room, teacher, kind, status
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'regular', 'scheduled')
                        "#,
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(class_id.to_string())
                    .bind(seq_no)
                    .bind(format_date(*date))
                    .bind(&draft.weekday_label)
                    .bind(draft.time.map(|t| t.start_label()))
                    .bind(draft.time.map(|t| t.end_label()))
                    .bind(room)
                    .bind(teacher)
                    .execute(&mut *tx)
                    .await?;
                    inserted += 1;
                }
            }
        }

        let makeups: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM sessions
            WHERE class_id = ? AND kind = 'makeup'
            ORDER BY session_date, seq_no
            "#,
        )
        .bind(class_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let regular_count = slots.len() as i64;
        for (idx, (id,)) in makeups.iter().enumerate() {
            Self::renumber(&mut *tx, id, regular_count + idx as i64 + 1).await?;
        }

        tx.commit().await?;

        info!(
            class_id = %class_id,
            removed,
            inserted,
            total_regular = slots.len(),
            makeups = makeups.len(),
            "Regenerated class sessions"
        );

        self.list_by_class(class_id, None, None).await
    }

    /// Cancel a scheduled or make-up session
    pub async fn cancel(&self, session_id: Uuid, reason: Option<&str>) -> Result<Session> {
        let session = self.get(session_id).await?;

        match session.status {
            SessionStatus::Completed => {
                return Err(Error::Conflict(format!(
                    "Session {} is already completed",
                    session_id
                )));
            }
            SessionStatus::Cancelled => return Ok(session),
            SessionStatus::Scheduled | SessionStatus::Makeup => {}
        }

        sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'cancelled', note = COALESCE(?, note), updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(session_id.to_string())
        .execute(&self.db)
        .await?;

        info!(session_id = %session_id, "Session cancelled");
        self.get(session_id).await
    }

    /// Move a session to a new number, carrying its summary along
    async fn renumber(conn: &mut SqliteConnection, id: &str, seq_no: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET seq_no = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(seq_no)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        sqlx::query("UPDATE attendance_summaries SET session_number = ? WHERE session_id = ?")
            .bind(seq_no)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Return sessions completed by a deleted summary to their open status
    pub(crate) async fn release_summary(
        conn: &mut SqliteConnection,
        summary_id: Uuid,
    ) -> Result<u64> {
        let released = sqlx::query(
            r#"
            UPDATE sessions
            SET status = CASE kind WHEN 'makeup' THEN 'makeup' ELSE 'scheduled' END,
                attendance_summary_id = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE attendance_summary_id = ?
            "#,
        )
        .bind(summary_id.to_string())
        .execute(conn)
        .await?
        .rows_affected();

        Ok(released)
    }
}

fn parse_stored_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| Error::Internal(format!("Invalid stored date '{}': {}", s, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let start: Option<String> = row.get("start_time");
    let end: Option<String> = row.get("end_time");
    let time = match (start, end) {
        (Some(start), Some(end)) => TimeWindow::parse(&format!("{}-{}", start, end)),
        _ => None,
    };

    let summary: Option<String> = row.get("attendance_summary_id");

    Ok(Session {
        id: parse_stored("session id", row.get("id"))?,
        class_id: parse_stored("class id", row.get("class_id"))?,
        seq_no: row.get("seq_no"),
        date: parse_stored_date(row.get("session_date"))?,
        weekday_label: row.get("weekday_label"),
        time,
        room: row.get("room"),
        teacher: row.get("teacher"),
        note: row.get("note"),
        kind: SessionKind::parse(row.get("kind"))?,
        status: SessionStatus::parse(row.get("status"))
            .map_err(|e| Error::Internal(e.to_string()))?,
        attendance_summary_id: summary
            .as_deref()
            .map(|s| parse_stored("attendance summary id", s))
            .transpose()?,
    })
}
