// src/store/users.rs
//! User accounts: chat identity, email, role, activation. Consumed by the
//! front ends for session scoping; the core only sees owner ids.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub telegram_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub telegram_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: UserRole,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, input: NewUser) -> Result<User, StoreError>;
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError>;
    async fn list(
        &self,
        active: Option<bool>,
        role: Option<UserRole>,
    ) -> Result<Vec<User>, StoreError>;
}

const INSERT_USER: &str = r#"
    INSERT INTO users (id, telegram_id, email, display_name, role, active, created_at)
    VALUES (?, ?, ?, ?, ?, 1, ?)
"#;

const FIND_BY_TELEGRAM: &str = "SELECT * FROM users WHERE telegram_id = ?";
const FIND_BY_EMAIL: &str = "SELECT * FROM users WHERE email = ?";
const SET_ACTIVE: &str = "UPDATE users SET active = ? WHERE id = ?";

const LIST_USERS: &str = r#"
    SELECT * FROM users
    WHERE (?1 IS NULL OR active = ?1)
      AND (?2 IS NULL OR role = ?2)
    ORDER BY created_at DESC
"#;

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        role: UserRole::parse(&role)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown role '{role}'")))?,
        active: row.get::<i64, _>("active") != 0,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn create(&self, input: NewUser) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            telegram_id: input.telegram_id,
            email: input.email,
            display_name: input.display_name,
            role: input.role,
            active: true,
            created_at: Utc::now(),
        };
        sqlx::query(INSERT_USER)
            .bind(&user.id)
            .bind(&user.telegram_id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(user.role.as_str())
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(FIND_BY_TELEGRAM)
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(FIND_BY_EMAIL)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(SET_ACTIVE)
            .bind(active as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        active: Option<bool>,
        role: Option<UserRole>,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(LIST_USERS)
            .bind(active.map(|a| a as i64))
            .bind(role.map(|r| r.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_user).collect()
    }
}
