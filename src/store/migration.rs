// src/store/migration.rs
//! Schema bootstrap for SQLite. Run at startup; every statement is idempotent.

use anyhow::Result;
use sqlx::{Executor, SqlitePool};

const CREATE_TASKS: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'cancelled')),
    priority TEXT NOT NULL DEFAULT 'medium'
        CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
    category TEXT,
    tags TEXT,
    due_date DATETIME,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
);
"#;

const CREATE_TASKS_OWNER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id, created_at DESC);
"#;

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    telegram_id TEXT UNIQUE,
    email TEXT UNIQUE,
    display_name TEXT,
    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    active INTEGER NOT NULL DEFAULT 1,
    created_at DATETIME NOT NULL
);
"#;

/// Ensure all tables exist on the given pool.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    pool.execute(CREATE_TASKS).await?;
    pool.execute(CREATE_TASKS_OWNER_INDEX).await?;
    pool.execute(CREATE_USERS).await?;
    Ok(())
}
