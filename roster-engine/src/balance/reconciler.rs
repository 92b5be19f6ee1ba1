//! Balance reconciler
//!
//! Every write is a compare-and-set on `students.balance_version`. A lost
//! race reloads and recomputes; after `retry_limit` lost races the caller
//! gets `Conflict`.

use roster_common::uuid_utils::parse_stored;
use roster_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{BillingStatus, ProcessedLedger, StudentBalance};

/// Which source determined `sessions_attended`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountSource {
    /// Live count of present marks caught up with or passed the stored counter
    Live,
    /// Stored counter incremented for a summary not yet in the ledger
    Ledger,
    /// Summary already folded in, nothing to do
    AlreadyCounted,
    /// Manual recalculation
    Recalculated,
}

/// Result of one reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct BalanceChange {
    pub balance: StudentBalance,
    pub changed: bool,
    pub source: CountSource,
}

#[derive(Clone)]
pub struct BalanceReconciler {
    db: SqlitePool,
    ledger_capacity: usize,
    retry_limit: u32,
}

impl BalanceReconciler {
    pub fn new(db: SqlitePool, ledger_capacity: usize, retry_limit: u32) -> Self {
        Self {
            db,
            ledger_capacity,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Load a student's balance
    pub async fn load(&self, student_id: Uuid) -> Result<StudentBalance> {
        let row = sqlx::query(
            r#"
            SELECT id, full_name, class_id, sessions_registered, sessions_attended,
                   sessions_remaining, status, debt_sessions, processed_ledger, balance_version
            FROM students
            WHERE id = ?
            "#,
        )
        .bind(student_id.to_string())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Student {}", student_id)))?;

        let class_id: Option<String> = row.get("class_id");
        let status: String = row.get("status");

        Ok(StudentBalance {
            student_id: parse_stored("student id", row.get("id"))?,
            full_name: row.get("full_name"),
            class_id: class_id
                .as_deref()
                .map(|s| parse_stored("class id", s))
                .transpose()?,
            sessions_registered: row.get("sessions_registered"),
            sessions_attended: row.get("sessions_attended"),
            sessions_remaining: row.get("sessions_remaining"),
            status: BillingStatus::parse(&status).map_err(|e| Error::Internal(e.to_string()))?,
            debt_sessions: row.get("debt_sessions"),
            ledger: ProcessedLedger::from_json(row.get("processed_ledger"), self.ledger_capacity)?,
            version: row.get("balance_version"),
        })
    }

    /// Present marks (on-time or late) of a student in a class
    pub async fn live_count(&self, student_id: Uuid, class_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM attendance_details d
            JOIN attendance_summaries s ON s.id = d.summary_id
            WHERE d.student_id = ? AND s.class_id = ? AND d.mark IN ('on-time', 'late')
            "#,
        )
        .bind(student_id.to_string())
        .bind(class_id.to_string())
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    /// Fold one attendance summary into a student's balance
    ///
    /// Safe to re-run with the same `summary_id`.
    pub async fn reconcile(
        &self,
        student_id: Uuid,
        class_id: Uuid,
        summary_id: Uuid,
    ) -> Result<BalanceChange> {
        for attempt in 1..=self.retry_limit {
            let current = self.load(student_id).await?;
            let live = self.live_count(student_id, class_id).await?;

            let mut next = current.clone();
            let source = if live >= current.sessions_attended {
                next.sessions_attended = live;
                next.ledger.record(summary_id);
                CountSource::Live
            } else if current.ledger.contains(summary_id) {
                CountSource::AlreadyCounted
            } else {
                next.sessions_attended += 1;
                next.ledger.record(summary_id);
                CountSource::Ledger
            };
            next.rederive();

            if next == current {
                debug!(
                    student_id = %student_id,
                    summary_id = %summary_id,
                    ?source,
                    "Balance unchanged"
                );
                return Ok(BalanceChange {
                    balance: current,
                    changed: false,
                    source,
                });
            }

            if self.compare_and_set(&current, &mut next).await? {
                info!(
                    student_id = %student_id,
                    summary_id = %summary_id,
                    attended = next.sessions_attended,
                    remaining = next.sessions_remaining,
                    status = next.status.as_str(),
                    ?source,
                    "Balance reconciled"
                );
                return Ok(BalanceChange {
                    balance: next,
                    changed: true,
                    source,
                });
            }

            debug!(student_id = %student_id, attempt, "Balance version moved, retrying");
        }

        Err(Error::Conflict(format!(
            "Balance of student {} kept changing during reconciliation",
            student_id
        )))
    }

    /// Manual recalculation: `attended = max(stored, live)` over the enrolled class
    ///
    /// The ledger is left as is.
    pub async fn recalculate(&self, student_id: Uuid) -> Result<BalanceChange> {
        for attempt in 1..=self.retry_limit {
            let current = self.load(student_id).await?;
            let live = match current.class_id {
                Some(class_id) => self.live_count(student_id, class_id).await?,
                None => 0,
            };

            let mut next = current.clone();
            next.sessions_attended = current.sessions_attended.max(live);
            next.rederive();

            if next == current {
                return Ok(BalanceChange {
                    balance: current,
                    changed: false,
                    source: CountSource::Recalculated,
                });
            }

            if self.compare_and_set(&current, &mut next).await? {
                info!(
                    student_id = %student_id,
                    attended = next.sessions_attended,
                    remaining = next.sessions_remaining,
                    status = next.status.as_str(),
                    "Balance recalculated"
                );
                return Ok(BalanceChange {
                    balance: next,
                    changed: true,
                    source: CountSource::Recalculated,
                });
            }

            debug!(student_id = %student_id, attempt, "Balance version moved, retrying");
        }

        Err(Error::Conflict(format!(
            "Balance of student {} kept changing during recalculation",
            student_id
        )))
    }

    /// Write `next` only if the row still carries `current.version`
    async fn compare_and_set(
        &self,
        current: &StudentBalance,
        next: &mut StudentBalance,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE students
            SET sessions_attended = ?,
                sessions_remaining = ?,
                status = ?,
                debt_sessions = ?,
                processed_ledger = ?,
                balance_version = balance_version + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND balance_version = ?
            "#,
        )
        .bind(next.sessions_attended)
        .bind(next.sessions_remaining)
        .bind(next.status.as_str())
        .bind(next.debt_sessions)
        .bind(next.ledger.to_json()?)
        .bind(current.student_id.to_string())
        .bind(current.version)
        .execute(&self.db)
        .await?
        .rows_affected();

        if updated == 1 {
            next.version = current.version + 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, seed_attendance, seed_class, seed_student, test_pool};

    async fn setup(
        registered: i64,
        attended: i64,
        status: &str,
    ) -> (BalanceReconciler, SqlitePool, Uuid, Uuid) {
        let pool = test_pool().await;
        let class_id = seed_class(&pool, "Thứ 2, 4, 6", None).await;
        let student_id = seed_student(&pool, class_id, registered, attended, status).await;
        (BalanceReconciler::new(pool.clone(), 100, 5), pool, class_id, student_id)
    }

    #[tokio::test]
    async fn test_live_count_wins_when_ahead() {
        let (reconciler, pool, class_id, student_id) = setup(10, 0, "active").await;
        seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;
        let summary =
            seed_attendance(&pool, class_id, date(2024, 3, 6), &[(student_id, "late")]).await;

        let change = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert!(change.changed);
        assert_eq!(change.source, CountSource::Live);
        assert_eq!(change.balance.sessions_attended, 2);
        assert_eq!(change.balance.sessions_remaining, 8);
        assert!(change.balance.ledger.contains(summary));
        assert_eq!(change.balance.version, 1);
    }

    #[tokio::test]
    async fn test_legacy_counter_counts_each_summary_once() {
        // Stored counter ahead of live marks (imported history)
        let (reconciler, pool, class_id, student_id) = setup(20, 15, "active").await;
        let summary =
            seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;

        let first = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert_eq!(first.source, CountSource::Ledger);
        assert_eq!(first.balance.sessions_attended, 16);

        let second = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert_eq!(second.source, CountSource::AlreadyCounted);
        assert!(!second.changed);
        assert_eq!(second.balance.sessions_attended, 16);
    }

    #[tokio::test]
    async fn test_reaching_zero_consumes_package() {
        let (reconciler, pool, class_id, student_id) = setup(1, 0, "active").await;
        let summary =
            seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;

        let change = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert_eq!(change.balance.sessions_remaining, 0);
        assert_eq!(change.balance.status, BillingStatus::FullyConsumed);
    }

    #[tokio::test]
    async fn test_overdraw_becomes_debt() {
        let (reconciler, pool, class_id, student_id) = setup(1, 1, "fully-consumed").await;
        seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;
        let summary =
            seed_attendance(&pool, class_id, date(2024, 3, 6), &[(student_id, "on-time")]).await;

        let change = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert_eq!(change.balance.sessions_remaining, -1);
        assert_eq!(change.balance.status, BillingStatus::Debt);
        assert_eq!(change.balance.debt_sessions, 1);
    }

    #[tokio::test]
    async fn test_reserved_status_untouched() {
        let (reconciler, pool, class_id, student_id) = setup(1, 0, "reserved").await;
        let summary =
            seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;

        let change = reconciler.reconcile(student_id, class_id, summary).await.unwrap();
        assert_eq!(change.balance.sessions_remaining, 0);
        assert_eq!(change.balance.status, BillingStatus::Reserved);
    }

    #[tokio::test]
    async fn test_recalculate_reaches_steady_state() {
        let (reconciler, pool, class_id, student_id) = setup(10, 0, "active").await;
        seed_attendance(&pool, class_id, date(2024, 3, 4), &[(student_id, "on-time")]).await;
        seed_attendance(&pool, class_id, date(2024, 3, 6), &[(student_id, "absent")]).await;

        let first = reconciler.recalculate(student_id).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.balance.sessions_attended, 1);
        assert!(first.balance.ledger.is_empty());

        let second = reconciler.recalculate(student_id).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.balance, first.balance);
    }

    #[tokio::test]
    async fn test_recalculate_never_lowers_stored_count() {
        let (reconciler, _pool, _class_id, student_id) = setup(20, 12, "active").await;
        let change = reconciler.recalculate(student_id).await.unwrap();
        assert_eq!(change.balance.sessions_attended, 12);
        assert_eq!(change.balance.sessions_remaining, 8);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (reconciler, _pool, _class_id, student_id) = setup(10, 0, "active").await;
        let current = reconciler.load(student_id).await.unwrap();
        let mut next = current.clone();
        next.sessions_attended = 1;
        next.rederive();
        assert!(reconciler.compare_and_set(&current, &mut next).await.unwrap());

        // Same stale snapshot again
        let mut again = current.clone();
        again.sessions_attended = 2;
        assert!(!reconciler.compare_and_set(&current, &mut again).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_student() {
        let (reconciler, _pool, class_id, _) = setup(1, 0, "active").await;
        let err = reconciler
            .reconcile(Uuid::new_v4(), class_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
