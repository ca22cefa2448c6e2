// src/store/mod.rs

pub mod migration;
pub mod tasks;
pub mod users;

pub use tasks::{SqliteTaskStore, StoreError, TaskStore};
pub use users::{NewUser, SqliteUserStore, User, UserRole, UserStore};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Task entity
// ============================================================================

/// A task row. Maps directly to the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub owner_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub category: Option<String>,
    /// Ordered; serialized as a JSON array in the tags column.
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" | "in progress" => Some(TaskStatus::InProgress),
            "completed" | "done" => Some(TaskStatus::Completed),
            "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(TaskPriority::Low),
            "medium" | "normal" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            "urgent" | "critical" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

// ============================================================================
// Store inputs
// ============================================================================

/// Input for task creation. Fields left as None fall back to defaults
/// (status pending, priority medium, due date now + 1 day).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    /// Materialize a full task, applying the creation defaults.
    pub fn into_task(self) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4().to_string(),
            owner_id: self.owner_id,
            title: self.title,
            description: self.description,
            status: self.status.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            category: self.category,
            tags: self.tags,
            due_date: Some(self.due_date.unwrap_or(now + Duration::days(1))),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. Only Some fields are written; the rest are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.due_date.is_none()
    }
}

/// List filter. All fields optional; combined with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

// ============================================================================
// Aggregates
// ============================================================================

/// One aggregate row, grouped by status x priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatsRow {
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub count: i64,
    pub due_today: i64,
    pub due_this_week: i64,
    pub due_this_month: i64,
}
