// src/config/mod.rs
// All tunables load from the environment (.env supported), with defaults.

use once_cell::sync::Lazy;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    // ── LLM Configuration
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub model: String,
    pub intent_temperature: f32,
    pub llm_timeout: u64,

    // ── Database Configuration
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Conversation Configuration
    pub history_message_cap: usize,
    pub action_history_cap: usize,
    pub snapshot_recent_messages: usize,
    pub recent_tasks_cap: usize,
    pub flow_timeout_secs: i64,

    // ── Defaults applied when the user states no preference
    pub default_priority: String,
    pub default_timezone: String,
    pub default_language: String,

    // ── Logging
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            clean.parse::<T>().unwrap_or(default)
        }
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        // .env is optional; plain environment variables win either way
        let _ = dotenvy::dotenv();

        Self {
            openai_base_url: env_var_or(
                "OPENAI_BASE_URL",
                "https://api.openai.com/v1".to_string(),
            ),
            openai_api_key: env_var_or("OPENAI_API_KEY", String::new()),
            model: env_var_or("TASKPILOT_MODEL", "gpt-4o-mini".to_string()),
            intent_temperature: env_var_or("TASKPILOT_INTENT_TEMPERATURE", 0.2),
            llm_timeout: env_var_or("TASKPILOT_LLM_TIMEOUT", 30),
            database_url: env_var_or("DATABASE_URL", "sqlite:./taskpilot.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            history_message_cap: env_var_or("TASKPILOT_HISTORY_CAP", 20),
            action_history_cap: env_var_or("TASKPILOT_ACTION_HISTORY_CAP", 10),
            snapshot_recent_messages: env_var_or("TASKPILOT_SNAPSHOT_MESSAGES", 5),
            recent_tasks_cap: env_var_or("TASKPILOT_RECENT_TASKS_CAP", 10),
            flow_timeout_secs: env_var_or("TASKPILOT_FLOW_TIMEOUT_SECS", 600),
            default_priority: env_var_or("TASKPILOT_DEFAULT_PRIORITY", "medium".to_string()),
            default_timezone: env_var_or("TASKPILOT_TIMEZONE", "UTC".to_string()),
            default_language: env_var_or("TASKPILOT_LANGUAGE", "en".to_string()),
            log_level: env_var_or("TASKPILOT_LOG_LEVEL", "info".to_string()),
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);
