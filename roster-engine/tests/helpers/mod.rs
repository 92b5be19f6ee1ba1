//! Shared fixtures for roster-engine integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use roster_common::db::init_memory_database;
use roster_common::time::format_date;
use roster_common::EngineConfig;
use roster_engine::Engine;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const SCHEDULE: &str = "Thứ 2, 4, 6 (18h-19h30)";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Engine over a fresh in-memory database
pub async fn setup_engine() -> (Engine, SqlitePool) {
    let pool = init_memory_database().await.expect("Should create in-memory database");
    let engine = Engine::new(pool.clone(), EngineConfig::default());
    (engine, pool)
}

pub async fn create_class(pool: &SqlitePool, schedule: &str, total_sessions: Option<i64>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO classes (id, name, schedule_text, room, teacher, total_sessions) \
         VALUES (?, 'Toán 9A', ?, 'P105', 'thầy Minh', ?)",
    )
    .bind(id.to_string())
    .bind(schedule)
    .bind(total_sessions)
    .execute(pool)
    .await
    .expect("Should insert class");
    id
}

pub async fn create_student(
    pool: &SqlitePool,
    class_id: Uuid,
    registered: i64,
    attended: i64,
    status: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO students (id, full_name, class_id, sessions_registered, sessions_attended, \
         sessions_remaining, status) VALUES (?, 'Trần Thị Bình', ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(class_id.to_string())
    .bind(registered)
    .bind(attended)
    .bind(registered - attended)
    .bind(status)
    .execute(pool)
    .await
    .expect("Should insert student");
    id
}

pub async fn create_holiday(pool: &SqlitePool, name: &str, from: NaiveDate, to: NaiveDate) {
    sqlx::query("INSERT INTO holidays (id, name, start_date, end_date) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(format_date(from))
        .bind(format_date(to))
        .execute(pool)
        .await
        .expect("Should insert holiday");
}
