//! Schema for the `tasks`/`jobs` tables and the `jobs_claim` index the
//! claim query relies on. WAL mode is enabled once at connect time.

use sqlx::sqlite::SqlitePool;
use sqlx::Executor;

const STATEMENTS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA foreign_keys = ON",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        source_type TEXT NOT NULL,
        merkle_root TEXT,
        status TEXT NOT NULL,
        total_jobs INTEGER NOT NULL DEFAULT 0,
        completed_jobs INTEGER NOT NULL DEFAULT 0,
        failed_jobs INTEGER NOT NULL DEFAULT 0,
        concurrency_min INTEGER NOT NULL,
        concurrency_max INTEGER NOT NULL,
        concurrency_initial INTEGER NOT NULL,
        retry_max_attempts INTEGER NOT NULL,
        retry_base_delay_ms INTEGER NOT NULL,
        retry_max_delay_ms INTEGER NOT NULL,
        aimd_additive_step INTEGER NOT NULL DEFAULT 1,
        aimd_multiplicative_factor REAL NOT NULL DEFAULT 0.5,
        aimd_success_threshold INTEGER NOT NULL DEFAULT 10,
        timeout_ms INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        input TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        output TEXT,
        last_error TEXT,
        scheduled_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (task_id, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_claim ON jobs (task_id, status, scheduled_at, seq)",
];

pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in STATEMENTS {
        pool.execute(*stmt).await?;
    }
    Ok(())
}
