//! roster-engine library
//!
//! Recurring-session attendance and balance reconciliation for tutoring
//! classes: schedule parsing, session expansion, attendance recording,
//! balance reconciliation and make-up obligations, plus the HTTP surface.

use axum::Router;
use std::sync::Arc;

pub mod api;
pub mod attendance;
pub mod balance;
pub mod engine;
pub mod registry;
pub mod remediation;
pub mod schedule;
pub mod sessions;

pub use engine::Engine;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{delete, get, post};

    let api = Router::new()
        .route("/api/classes/:class_id/sessions", get(api::list_sessions))
        .route("/api/classes/:class_id/sessions/expand", post(api::expand_sessions))
        .route("/api/classes/:class_id/sessions/makeup", post(api::append_makeup_session))
        .route("/api/sessions/:session_id/cancel", post(api::cancel_session))
        .route("/api/classes/:class_id/attendance", post(api::save_attendance))
        .route("/api/classes/:class_id/attendance/:date", get(api::get_attendance))
        .route("/api/attendance/:summary_id", delete(api::delete_attendance))
        .route("/api/students/:student_id/balance", get(api::student_balance))
        .route("/api/students/:student_id/recalculate", post(api::recalculate_balance))
        .route("/api/students/:student_id/remediations", get(api::student_remediations))
        .route("/api/remediations/:obligation_id/transition", post(api::transition_remediation))
        .route("/api/remediations/:obligation_id/history", get(api::remediation_history))
        .route("/api/holidays/:date", get(api::holiday_covering));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use roster_common::db::init_memory_database;
    use roster_common::time::format_date;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    pub async fn test_pool() -> SqlitePool {
        init_memory_database().await.unwrap()
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub async fn seed_class(
        pool: &SqlitePool,
        schedule: &str,
        total_sessions: Option<i64>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO classes (id, name, schedule_text, room, teacher, total_sessions) \
             VALUES (?, 'IELTS Foundation', ?, 'P203', 'cô Lan', ?)",
        )
        .bind(id.to_string())
        .bind(schedule)
        .bind(total_sessions)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    pub async fn seed_student(
        pool: &SqlitePool,
        class_id: Uuid,
        registered: i64,
        attended: i64,
        status: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO students (id, full_name, class_id, sessions_registered, sessions_attended, \
             sessions_remaining, status) VALUES (?, 'Nguyễn Văn An', ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(class_id.to_string())
        .bind(registered)
        .bind(attended)
        .bind(registered - attended)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    pub async fn seed_holiday(pool: &SqlitePool, name: &str, from: NaiveDate, to: NaiveDate) {
        sqlx::query("INSERT INTO holidays (id, name, start_date, end_date) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(format_date(from))
            .bind(format_date(to))
            .execute(pool)
            .await
            .unwrap();
    }

    /// Insert a summary with one detail per `(student, mark)`
    pub async fn seed_attendance(
        pool: &SqlitePool,
        class_id: Uuid,
        date: NaiveDate,
        marks: &[(Uuid, &str)],
    ) -> Uuid {
        let summary_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO attendance_summaries (id, class_id, attendance_date, created_at, updated_at) \
             VALUES (?, ?, ?, '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
        )
        .bind(summary_id.to_string())
        .bind(class_id.to_string())
        .bind(format_date(date))
        .execute(pool)
        .await
        .unwrap();

        for (student_id, mark) in marks {
            sqlx::query(
                "INSERT INTO attendance_details (id, summary_id, student_id, mark) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(summary_id.to_string())
            .bind(student_id.to_string())
            .bind(*mark)
            .execute(pool)
            .await
            .unwrap();
        }

        summary_id
    }
}
