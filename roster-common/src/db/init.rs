//! Database initialization
//!
//! Three phases, each idempotent:
//! 1. CREATE TABLE IF NOT EXISTS for every table
//! 2. Versioned migrations for databases created by older releases
//! 3. Indexes (some depend on columns added by migrations)

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the on-disk database and bring its schema up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL gives readers a stable snapshot while attendance details are replaced
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    configure_connection(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Single connection: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    configure_connection(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create all tables, run migrations, then create indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;

    // Registries owned by the surrounding application
    create_classes_table(pool).await?;
    create_students_table(pool).await?;
    create_holidays_table(pool).await?;

    // Engine tables
    create_sessions_table(pool).await?;
    create_attendance_summaries_table(pool).await?;
    create_attendance_details_table(pool).await?;
    create_remediations_table(pool).await?;
    create_remediation_history_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    create_indexes(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_classes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            schedule_text TEXT NOT NULL DEFAULT '',
            room TEXT,
            teacher TEXT,
            total_sessions INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the students table
///
/// `processed_ledger` is a JSON array of attendance summary ids already
/// folded into `sessions_attended`.
async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            class_id TEXT REFERENCES classes(id),
            sessions_registered INTEGER NOT NULL DEFAULT 0,
            sessions_attended INTEGER NOT NULL DEFAULT 0,
            sessions_remaining INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            debt_sessions INTEGER NOT NULL DEFAULT 0,
            processed_ledger TEXT NOT NULL DEFAULT '[]',
            balance_version INTEGER NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_holidays_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS holidays (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id),
            seq_no INTEGER NOT NULL,
            session_date TEXT NOT NULL,
            weekday_label TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            room TEXT,
            teacher TEXT,
            note TEXT,
            kind TEXT NOT NULL DEFAULT 'regular',
            status TEXT NOT NULL DEFAULT 'scheduled',
            attendance_summary_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_summaries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_summaries (
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id),
            attendance_date TEXT NOT NULL,
            session_id TEXT,
            session_number INTEGER,
            present_count INTEGER NOT NULL DEFAULT 0,
            absent_count INTEGER NOT NULL DEFAULT 0,
            reserved_count INTEGER NOT NULL DEFAULT 0,
            made_up_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'taken',
            created_by TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (class_id, attendance_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_details_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_details (
            id TEXT PRIMARY KEY,
            summary_id TEXT NOT NULL REFERENCES attendance_summaries(id) ON DELETE CASCADE,
            student_id TEXT NOT NULL,
            mark TEXT NOT NULL,
            note TEXT NOT NULL DEFAULT '',
            homework_percent INTEGER,
            test_name TEXT,
            score REAL,
            bonus_points INTEGER,
            punctual INTEGER NOT NULL DEFAULT 1,
            UNIQUE (summary_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_remediations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS remediations (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            absence_date TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attendance_detail_id TEXT,
            makeup_session_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (student_id, class_id, absence_date, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only status log for remediation obligations
async fn create_remediation_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS remediation_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remediation_id TEXT NOT NULL REFERENCES remediations(id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let statements = [
        // At most one regular session per class per date
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_regular_date \
         ON sessions(class_id, session_date) WHERE kind = 'regular'",
        "CREATE INDEX IF NOT EXISTS idx_sessions_class_date ON sessions(class_id, session_date)",
        "CREATE INDEX IF NOT EXISTS idx_details_student ON attendance_details(student_id)",
        "CREATE INDEX IF NOT EXISTS idx_remediations_student ON remediations(student_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_remediation_history_parent \
         ON remediation_history(remediation_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
