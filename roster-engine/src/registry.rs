//! Read-only access to the class and holiday registries

use chrono::NaiveDate;
use roster_common::db::{ClassRecord, HolidayRecord};
use roster_common::time::format_date;
use roster_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct Registry {
    db: SqlitePool,
}

impl Registry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Look up a class
    pub async fn class(&self, class_id: Uuid) -> Result<ClassRecord> {
        sqlx::query_as::<_, ClassRecord>(
            "SELECT id, name, schedule_text, room, teacher, total_sessions FROM classes WHERE id = ?",
        )
        .bind(class_id.to_string())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Class {}", class_id)))
    }

    /// The holiday whose inclusive range covers `date`, if any
    pub async fn holiday_covering(&self, date: NaiveDate) -> Result<Option<HolidayRecord>> {
        // ISO dates compare correctly as text
        let holiday = sqlx::query_as::<_, HolidayRecord>(
            r#"
            SELECT id, name, start_date, end_date
            FROM holidays
            WHERE start_date <= ? AND end_date >= ?
            ORDER BY start_date ASC
            LIMIT 1
            "#,
        )
        .bind(format_date(date))
        .bind(format_date(date))
        .fetch_optional(&self.db)
        .await?;

        Ok(holiday)
    }
}
