//! Remediation generator
//!
//! One obligation per (student, class, absence date, kind). Re-saving
//! attendance for the same day finds the existing obligation and only
//! refreshes its link to the newly inserted detail.

use chrono::{DateTime, NaiveDate, Utc};
use roster_common::time::{format_date, DATE_FORMAT};
use roster_common::uuid_utils::parse_stored;
use roster_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{RemediationKind, RemediationObligation, RemediationStatus, StatusChange, SYSTEM_ACTOR};

const AUTO_CREATED_REASON: &str = "auto-created from attendance";

const OBLIGATION_COLUMNS: &str = "id, student_id, class_id, absence_date, kind, status, \
     attendance_detail_id, makeup_session_id";

#[derive(Clone)]
pub struct RemediationGenerator {
    db: SqlitePool,
}

impl RemediationGenerator {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create (or find) the obligation for an absence
    ///
    /// Returns the obligation and whether it was newly created.
    pub async fn create_from_absence(
        &self,
        student_id: Uuid,
        class_id: Uuid,
        absence_date: NaiveDate,
        kind: RemediationKind,
    ) -> Result<(RemediationObligation, bool)> {
        let detail_id = self.find_detail(student_id, class_id, absence_date).await?;
        let date_str = format_date(absence_date);

        let mut tx = self.db.begin().await?;

        let obligation_id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO remediations (id, student_id, class_id, absence_date, kind, status, attendance_detail_id)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            ON CONFLICT (student_id, class_id, absence_date, kind) DO NOTHING
            "#,
        )
        .bind(obligation_id.to_string())
        .bind(student_id.to_string())
        .bind(class_id.to_string())
        .bind(&date_str)
        .bind(kind.as_str())
        .bind(detail_id.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(
                r#"
                INSERT INTO remediation_history (remediation_id, status, changed_at, changed_by, reason)
                VALUES (?, 'pending', ?, ?, ?)
                "#,
            )
            .bind(obligation_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(SYSTEM_ACTOR)
            .bind(AUTO_CREATED_REASON)
            .execute(&mut *tx)
            .await?;
        } else if let Some(detail_id) = detail_id {
            sqlx::query(
                r#"
                UPDATE remediations
                SET attendance_detail_id = ?, updated_at = CURRENT_TIMESTAMP
                WHERE student_id = ? AND class_id = ? AND absence_date = ? AND kind = ?
                "#,
            )
            .bind(detail_id.to_string())
            .bind(student_id.to_string())
            .bind(class_id.to_string())
            .bind(&date_str)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM remediations
            WHERE student_id = ? AND class_id = ? AND absence_date = ? AND kind = ?
            "#,
            OBLIGATION_COLUMNS
        ))
        .bind(student_id.to_string())
        .bind(class_id.to_string())
        .bind(&date_str)
        .bind(kind.as_str())
        .fetch_one(&self.db)
        .await?;
        let obligation = self.hydrate(&row).await?;

        if inserted {
            info!(
                obligation_id = %obligation.id,
                student_id = %student_id,
                class_id = %class_id,
                date = %date_str,
                kind = kind.as_str(),
                "Remediation obligation created"
            );
        } else {
            debug!(obligation_id = %obligation.id, "Remediation obligation already exists");
        }

        Ok((obligation, inserted))
    }

    /// Get an obligation with its history
    pub async fn get(&self, obligation_id: Uuid) -> Result<RemediationObligation> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM remediations WHERE id = ?",
            OBLIGATION_COLUMNS
        ))
        .bind(obligation_id.to_string())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Remediation {}", obligation_id)))?;

        self.hydrate(&row).await
    }

    /// Move an obligation to a new status, appending to its history
    ///
    /// `done` is terminal. A same-status transition is rejected.
    pub async fn transition(
        &self,
        obligation_id: Uuid,
        status: RemediationStatus,
        actor: &str,
        reason: Option<&str>,
        makeup_session_id: Option<Uuid>,
    ) -> Result<RemediationObligation> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(Error::Validation("Transition actor is required".to_string()));
        }

        let current = self.get(obligation_id).await?;
        if current.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Remediation {} is already done",
                obligation_id
            )));
        }
        if current.status == status {
            return Err(Error::Validation(format!(
                "Remediation {} is already {}",
                obligation_id,
                status.as_str()
            )));
        }

        if let Some(session_id) = makeup_session_id {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?)")
                    .bind(session_id.to_string())
                    .fetch_one(&self.db)
                    .await?;
            if !exists {
                return Err(Error::NotFound(format!("Session {}", session_id)));
            }
        }

        let mut tx = self.db.begin().await?;

        // Status guard catches a concurrent transition between read and write
        let updated = sqlx::query(
            r#"
            UPDATE remediations
            SET status = ?,
                makeup_session_id = COALESCE(?, makeup_session_id),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(makeup_session_id.map(|id| id.to_string()))
        .bind(obligation_id.to_string())
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::Conflict(format!(
                "Remediation {} changed concurrently",
                obligation_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO remediation_history (remediation_id, status, changed_at, changed_by, reason)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(obligation_id.to_string())
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(actor)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            obligation_id = %obligation_id,
            from = current.status.as_str(),
            to = status.as_str(),
            actor,
            "Remediation transitioned"
        );

        self.get(obligation_id).await
    }

    /// Obligations of a student, oldest absence first
    pub async fn list_for_student(
        &self,
        student_id: Uuid,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationObligation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM remediations
            WHERE student_id = ? AND (? IS NULL OR status = ?)
            ORDER BY absence_date ASC, kind ASC
            "#,
            OBLIGATION_COLUMNS
        ))
        .bind(student_id.to_string())
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.db)
        .await?;

        let mut obligations = Vec::with_capacity(rows.len());
        for row in &rows {
            obligations.push(self.hydrate(row).await?);
        }
        Ok(obligations)
    }

    /// Status history of an obligation, oldest first
    pub async fn history(&self, obligation_id: Uuid) -> Result<Vec<StatusChange>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM remediations WHERE id = ?)")
                .bind(obligation_id.to_string())
                .fetch_one(&self.db)
                .await?;
        if !exists {
            return Err(Error::NotFound(format!("Remediation {}", obligation_id)));
        }

        self.load_history(obligation_id).await
    }

    async fn load_history(&self, obligation_id: Uuid) -> Result<Vec<StatusChange>> {
        let rows = sqlx::query(
            r#"
            SELECT status, changed_at, changed_by, reason
            FROM remediation_history
            WHERE remediation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(obligation_id.to_string())
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let changed_at: String = row.get("changed_at");
                Ok(StatusChange {
                    status: RemediationStatus::parse(&status)
                        .map_err(|e| Error::Internal(e.to_string()))?,
                    changed_at: DateTime::parse_from_rfc3339(&changed_at)
                        .map_err(|e| Error::Internal(format!("Invalid history timestamp: {}", e)))?
                        .with_timezone(&Utc),
                    changed_by: row.get("changed_by"),
                    reason: row.get("reason"),
                })
            })
            .collect()
    }

    /// Detail row of the student's mark on that date, if one exists
    async fn find_detail(
        &self,
        student_id: Uuid,
        class_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT d.id
            FROM attendance_details d
            JOIN attendance_summaries s ON s.id = d.summary_id
            WHERE d.student_id = ? AND s.class_id = ? AND s.attendance_date = ?
            "#,
        )
        .bind(student_id.to_string())
        .bind(class_id.to_string())
        .bind(format_date(date))
        .fetch_optional(&self.db)
        .await?;

        id.as_deref().map(|s| parse_stored("attendance detail id", s)).transpose()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<RemediationObligation> {
        let id = parse_stored("remediation id", row.get("id"))?;
        let absence_date: String = row.get("absence_date");
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let detail: Option<String> = row.get("attendance_detail_id");
        let makeup: Option<String> = row.get("makeup_session_id");

        Ok(RemediationObligation {
            id,
            student_id: parse_stored("student id", row.get("student_id"))?,
            class_id: parse_stored("class id", row.get("class_id"))?,
            absence_date: NaiveDate::parse_from_str(&absence_date, DATE_FORMAT)
                .map_err(|e| Error::Internal(format!("Invalid absence date: {}", e)))?,
            kind: RemediationKind::parse(&kind).map_err(|e| Error::Internal(e.to_string()))?,
            status: RemediationStatus::parse(&status).map_err(|e| Error::Internal(e.to_string()))?,
            attendance_detail_id: detail
                .as_deref()
                .map(|s| parse_stored("attendance detail id", s))
                .transpose()?,
            makeup_session_id: makeup
                .as_deref()
                .map(|s| parse_stored("makeup session id", s))
                .transpose()?,
            history: self.load_history(id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, seed_attendance, seed_class, seed_student, test_pool};

    async fn setup() -> (RemediationGenerator, SqlitePool, Uuid, Uuid) {
        let pool = test_pool().await;
        let class_id = seed_class(&pool, "Thứ 2, 4, 6", None).await;
        let student_id = seed_student(&pool, class_id, 20, 0, "active").await;
        (RemediationGenerator::new(pool.clone()), pool, class_id, student_id)
    }

    #[tokio::test]
    async fn test_create_links_detail_and_history() {
        let (generator, pool, class_id, student_id) = setup().await;
        seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "absent")]).await;

        let (obligation, created) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        assert!(created);
        assert_eq!(obligation.status, RemediationStatus::Pending);
        assert!(obligation.attendance_detail_id.is_some());
        assert_eq!(obligation.history.len(), 1);
        assert_eq!(obligation.history[0].changed_by, SYSTEM_ACTOR);
        assert_eq!(obligation.history[0].reason.as_deref(), Some(AUTO_CREATED_REASON));
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_refreshes_link() {
        let (generator, pool, class_id, student_id) = setup().await;
        seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "absent")]).await;
        let (first, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        // Re-save replaces the detail row
        sqlx::query("UPDATE attendance_details SET id = ? WHERE student_id = ?")
            .bind(Uuid::new_v4().to_string())
            .bind(student_id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let (second, created) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_ne!(second.attendance_detail_id, first.attendance_detail_id);
        assert_eq!(second.history.len(), 1);
        assert_eq!(generator.list_for_student(student_id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_without_detail() {
        let (generator, _pool, class_id, student_id) = setup().await;
        let (obligation, created) = generator
            .create_from_absence(
                student_id,
                class_id,
                date(2024, 3, 6),
                RemediationKind::Struggling,
            )
            .await
            .unwrap();
        assert!(created);
        assert!(obligation.attendance_detail_id.is_none());
    }

    #[tokio::test]
    async fn test_transition_appends_history() {
        let (generator, pool, class_id, student_id) = setup().await;
        let (obligation, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        let session_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO sessions (id, class_id, seq_no, session_date, weekday_label, kind, status) \
             VALUES (?, ?, 7, '2024-03-09', 'Thứ 7', 'makeup', 'makeup')",
        )
        .bind(session_id.to_string())
        .bind(class_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

        let scheduled = generator
            .transition(
                obligation.id,
                RemediationStatus::Scheduled,
                "cô Lan",
                None,
                Some(session_id),
            )
            .await
            .unwrap();
        assert_eq!(scheduled.status, RemediationStatus::Scheduled);
        assert_eq!(scheduled.makeup_session_id, Some(session_id));

        let done = generator
            .transition(
                obligation.id,
                RemediationStatus::Done,
                "cô Lan",
                Some("đã học bù"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(done.makeup_session_id, Some(session_id));

        let history = generator.history(obligation.id).await.unwrap();
        let statuses: Vec<RemediationStatus> = history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![RemediationStatus::Pending, RemediationStatus::Scheduled, RemediationStatus::Done]
        );
        assert_eq!(history[2].reason.as_deref(), Some("đã học bù"));
    }

    #[tokio::test]
    async fn test_done_is_terminal() {
        let (generator, _pool, class_id, student_id) = setup().await;
        let (obligation, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();
        generator
            .transition(obligation.id, RemediationStatus::Done, "admin", None, None)
            .await
            .unwrap();

        let err = generator
            .transition(obligation.id, RemediationStatus::Pending, "admin", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_same_status_and_blank_actor_rejected() {
        let (generator, _pool, class_id, student_id) = setup().await;
        let (obligation, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        let err = generator
            .transition(obligation.id, RemediationStatus::Pending, "admin", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = generator
            .transition(obligation.id, RemediationStatus::Done, "  ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_transition_unknown_session() {
        let (generator, _pool, class_id, student_id) = setup().await;
        let (obligation, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();

        let err = generator
            .transition(
                obligation.id,
                RemediationStatus::Scheduled,
                "admin",
                None,
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (generator, _pool, class_id, student_id) = setup().await;
        let (first, _) = generator
            .create_from_absence(student_id, class_id, date(2024, 3, 4), RemediationKind::Absence)
            .await
            .unwrap();
        generator
            .create_from_absence(student_id, class_id, date(2024, 3, 6), RemediationKind::Absence)
            .await
            .unwrap();
        generator
            .transition(first.id, RemediationStatus::Done, "admin", None, None)
            .await
            .unwrap();

        let pending = generator
            .list_for_student(student_id, Some(RemediationStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].absence_date, date(2024, 3, 6));
        assert_eq!(generator.list_for_student(student_id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_unknown_obligation() {
        let (generator, _pool, _class_id, _student_id) = setup().await;
        let err = generator.history(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
