// src/store/tasks.rs
//! SQLite-backed task store. Source of truth for all task data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{NewTask, Task, TaskFilter, TaskPatch, TaskPriority, TaskStatsRow, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid task data: {0}")]
    InvalidData(String),
}

/// The store contract consumed by the executor and the CLI.
/// Single-row operations only; bulk paths loop over these.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;
    /// Newest-first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
    /// None if the id does not exist.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError>;
    /// True iff a row was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
    /// Substring match across title, description, category and tags.
    async fn search(&self, term: &str, owner_id: Option<&str>) -> Result<Vec<Task>, StoreError>;
    async fn stats(&self, owner_id: Option<&str>) -> Result<Vec<TaskStatsRow>, StoreError>;
    async fn delete_by_owner_and_status(
        &self,
        owner_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<u64, StoreError>;
}

// ============================================================================
// SQL
// ============================================================================

const INSERT_TASK: &str = r#"
    INSERT INTO tasks (
        id, owner_id, title, description, status, priority,
        category, tags, due_date, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_TASK: &str = "SELECT * FROM tasks WHERE id = ?";

const LIST_TASKS: &str = r#"
    SELECT * FROM tasks
    WHERE (?1 IS NULL OR owner_id = ?1)
      AND (?2 IS NULL OR status = ?2)
      AND (?3 IS NULL OR priority = ?3)
      AND (?4 IS NULL OR category = ?4)
      AND (?5 IS NULL OR due_date <= ?5)
    ORDER BY created_at DESC
    LIMIT ?6
"#;

const UPDATE_TASK: &str = r#"
    UPDATE tasks SET
        title = ?, description = ?, status = ?, priority = ?,
        category = ?, tags = ?, due_date = ?, updated_at = ?
    WHERE id = ?
"#;

const DELETE_TASK: &str = "DELETE FROM tasks WHERE id = ?";

const SEARCH_TASKS: &str = r#"
    SELECT * FROM tasks
    WHERE (?1 IS NULL OR owner_id = ?1)
      AND (title LIKE ?2 OR description LIKE ?2 OR category LIKE ?2 OR tags LIKE ?2)
    ORDER BY created_at DESC
"#;

const STATS_TASKS: &str = r#"
    SELECT
        status,
        priority,
        COUNT(*) AS count,
        SUM(CASE WHEN date(due_date) = date('now') THEN 1 ELSE 0 END) AS due_today,
        SUM(CASE WHEN date(due_date) >= date('now')
                  AND date(due_date) < date('now', '+7 days') THEN 1 ELSE 0 END) AS due_this_week,
        SUM(CASE WHEN date(due_date) >= date('now')
                  AND date(due_date) < date('now', '+1 month') THEN 1 ELSE 0 END) AS due_this_month
    FROM tasks
    WHERE (?1 IS NULL OR owner_id = ?1)
    GROUP BY status, priority
    ORDER BY status, priority
"#;

const DELETE_BY_OWNER_AND_STATUS: &str = r#"
    DELETE FROM tasks
    WHERE (?1 IS NULL OR owner_id = ?1)
      AND (?2 IS NULL OR status = ?2)
"#;

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let tags_json: Option<String> = row.get("tags");
    let tags = tags_json
        .as_deref()
        .and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_default();

    Ok(Task {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: TaskStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown status '{status}'")))?,
        priority: TaskPriority::parse(&priority)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown priority '{priority}'")))?,
        category: row.get("category"),
        tags,
        due_date: row.get::<Option<DateTime<Utc>>, _>("due_date"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn tags_to_json(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        serde_json::to_string(tags).ok()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let task = input.into_task();
        sqlx::query(INSERT_TASK)
            .bind(&task.id)
            .bind(&task.owner_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(task.priority.as_str())
            .bind(&task.category)
            .bind(tags_to_json(&task.tags))
            .bind(task.due_date)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(SELECT_TASK)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(LIST_TASKS)
            .bind(&filter.owner_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.priority.map(|p| p.as_str()))
            .bind(&filter.category)
            .bind(filter.due_before)
            .bind(filter.limit.unwrap_or(100))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        // Read-modify-write keeps patch semantics obvious; single-row traffic
        // makes the extra round trip irrelevant.
        let Some(mut task) = self.get(id).await? else {
            return Ok(None);
        };

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = Some(description);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(category) = patch.category {
            task.category = Some(category);
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = Some(due_date);
        }
        task.updated_at = Utc::now();

        sqlx::query(UPDATE_TASK)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(task.priority.as_str())
            .bind(&task.category)
            .bind(tags_to_json(&task.tags))
            .bind(task.due_date)
            .bind(task.updated_at)
            .bind(&task.id)
            .execute(&self.pool)
            .await?;
        Ok(Some(task))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(DELETE_TASK).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search(&self, term: &str, owner_id: Option<&str>) -> Result<Vec<Task>, StoreError> {
        let pattern = format!("%{}%", term.trim());
        let rows = sqlx::query(SEARCH_TASKS)
            .bind(owner_id)
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn stats(&self, owner_id: Option<&str>) -> Result<Vec<TaskStatsRow>, StoreError> {
        let rows = sqlx::query(STATS_TASKS)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let priority: String = row.get("priority");
                Ok(TaskStatsRow {
                    status: TaskStatus::parse(&status).ok_or_else(|| {
                        StoreError::InvalidData(format!("unknown status '{status}'"))
                    })?,
                    priority: TaskPriority::parse(&priority).ok_or_else(|| {
                        StoreError::InvalidData(format!("unknown priority '{priority}'"))
                    })?,
                    count: row.get("count"),
                    due_today: row.get::<Option<i64>, _>("due_today").unwrap_or(0),
                    due_this_week: row.get::<Option<i64>, _>("due_this_week").unwrap_or(0),
                    due_this_month: row.get::<Option<i64>, _>("due_this_month").unwrap_or(0),
                })
            })
            .collect()
    }

    async fn delete_by_owner_and_status(
        &self,
        owner_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(DELETE_BY_OWNER_AND_STATUS)
            .bind(owner_id)
            .bind(status.map(|s| s.as_str()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
