//! Database schema migrations
//!
//! Versioned, idempotent upgrades for databases created by older releases.
//! Fresh databases already carry every column from `CREATE TABLE`; each
//! migration checks for its column before altering anything.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**
//! 2. **Always add new migrations** and bump `CURRENT_SCHEMA_VERSION`
//! 3. **Use ALTER TABLE** to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database (0 when never migrated)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1"
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?"
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: add `balance_version` to students
///
/// Student rows imported from the manual-entry era predate compare-and-set
/// balance writes.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    if has_column(pool, "students", "balance_version").await? {
        return Ok(());
    }

    sqlx::query("ALTER TABLE students ADD COLUMN balance_version INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await?;

    info!("  ✓ Added balance_version column to students table");
    Ok(())
}

/// Migration v2: add `kind` to sessions and backfill it from `status`
///
/// Older releases only knew a session was a make-up while its status was
/// still `makeup`; a completed make-up became indistinguishable.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !has_column(pool, "sessions", "kind").await? {
        sqlx::query("ALTER TABLE sessions ADD COLUMN kind TEXT NOT NULL DEFAULT 'regular'")
            .execute(pool)
            .await?;
        info!("  ✓ Added kind column to sessions table");
    }

    let backfilled = sqlx::query("UPDATE sessions SET kind = 'makeup' WHERE status = 'makeup'")
        .execute(pool)
        .await?
        .rows_affected();

    if backfilled > 0 {
        info!("  ✓ Marked {} existing make-up sessions", backfilled);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn legacy_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TIMESTAMP)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("CREATE TABLE students (id TEXT PRIMARY KEY, full_name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE sessions (id TEXT PRIMARY KEY, class_id TEXT, seq_no INTEGER, \
             session_date TEXT, weekday_label TEXT, status TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO sessions VALUES ('m1', 'c1', 9, '2024-03-09', 'Thứ 7', 'makeup')",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_migrations_upgrade_legacy_schema() {
        let pool = legacy_pool().await;

        run_migrations(&pool).await.unwrap();

        assert!(has_column(&pool, "students", "balance_version").await.unwrap());
        let kind: String = sqlx::query_scalar("SELECT kind FROM sessions WHERE id = 'm1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(kind, "makeup");
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = legacy_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
