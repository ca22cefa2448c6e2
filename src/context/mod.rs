// src/context/mod.rs
//! Cross-turn conversation state. One `ContextManager` per session, purely
//! in-memory; lost on restart by design. Nothing here touches the store.

pub mod resolver;

pub use resolver::{ResolutionRule, ResolvedReference};

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::store::{Task, TaskPriority};

/// A learned category must be the most-used one and reach this many uses
/// before it becomes the default.
const CATEGORY_LEARN_THRESHOLD: u64 = 3;

// ============================================================================
// Message & action history
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    /// Tasks shown to the user in this message; feeds reference resolution.
    #[serde(default)]
    pub displayed_tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub reversible: bool,
}

// ============================================================================
// Entity memory
// ============================================================================

/// The task(s) currently in focus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveTaskContext {
    pub primary: Option<String>,
    pub secondary: Vec<String>,
    pub last_displayed: Vec<Task>,
}

/// Hint that the next ambiguous reference likely targets a specific task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationFlowHint {
    pub expecting_task_ref: bool,
    pub implicit_task_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMemory {
    /// Most recently created or touched single task.
    pub last_task: Option<Task>,
    /// Most recent read/search result set.
    pub last_list: Vec<Task>,
    /// Rolling window of tasks seen this session, newest first.
    pub recent_tasks: Vec<Task>,
    /// Normalized lowercase title -> task id.
    pub task_id_map: HashMap<String, String>,
    pub active_task: ActiveTaskContext,
    pub conversation_flow: ConversationFlowHint,
}

// ============================================================================
// Preferences & stats
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub default_priority: TaskPriority,
    pub default_category: Option<String>,
    /// (start hour, end hour), 24h clock.
    pub working_hours: (u32, u32),
    pub timezone: String,
    pub language: String,
    pub notifications_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_priority: TaskPriority::parse(&CONFIG.default_priority)
                .unwrap_or(TaskPriority::Medium),
            default_category: None,
            working_hours: (9, 18),
            timezone: CONFIG.default_timezone.clone(),
            language: CONFIG.default_language.clone(),
            notifications_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub category_counts: HashMap<String, u64>,
    pub priority_counts: HashMap<String, u64>,
}

// ============================================================================
// Flows
// ============================================================================

/// Short-lived multi-step interaction (e.g. guided creation). Expiry is
/// enforced lazily by `is_flow_active` and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub kind: String,
    pub step: u32,
    pub data: Value,
    pub started_at: DateTime<Utc>,
    pub timeout: DateTime<Utc>,
}

// ============================================================================
// Snapshot & updates (the two boundary types)
// ============================================================================

/// Read-only view handed to the intent analyzer. Carries data only, no
/// internals like caps or eviction state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub recent_messages: Vec<SnapshotMessage>,
    pub current_flow: Option<Flow>,
    pub last_task_title: Option<String>,
    pub recent_task_titles: Vec<String>,
    pub active_task_id: Option<String>,
    pub expecting_task_ref: bool,
    pub preferences: Preferences,
    pub session_minutes: i64,
    pub message_count: usize,
    pub user_patterns: UserPatterns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub role: Role,
    pub content: String,
}

/// Derived habits: what the user actually does, not what they configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatterns {
    pub most_used_priority: Option<String>,
    pub top_categories: Vec<String>,
}

/// What a task was added to memory as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemoryDirective {
    Single(Task),
    Multiple(Vec<Task>),
}

/// Shallow patch over `EntityMemory`. Some overwrites, None leaves alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPatch {
    pub last_task: Option<Task>,
    pub last_list: Option<Vec<Task>>,
    pub recent_tasks: Option<Vec<Task>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencePatch {
    pub default_priority: Option<TaskPriority>,
    pub default_category: Option<String>,
}

/// Everything an execution result feeds back into the context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextUpdates {
    pub should_add_to_memory: Option<MemoryDirective>,
    pub entities: EntityPatch,
    pub preferences: PreferencePatch,
    pub flow: Option<Flow>,
}

// ============================================================================
// Context manager
// ============================================================================

pub struct ContextManager {
    session_id: String,
    started_at: DateTime<Utc>,
    history: VecDeque<ContextMessage>,
    actions: VecDeque<ActionRecord>,
    pub entities: EntityMemory,
    pub preferences: Preferences,
    pub stats: SessionStats,
    current_flow: Option<Flow>,
    history_cap: usize,
    action_cap: usize,
    recent_tasks_cap: usize,
    flow_timeout: Duration,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            history: VecDeque::new(),
            actions: VecDeque::new(),
            entities: EntityMemory::default(),
            preferences: Preferences::default(),
            stats: SessionStats::default(),
            current_flow: None,
            history_cap: CONFIG.history_message_cap,
            action_cap: CONFIG.action_history_cap,
            recent_tasks_cap: CONFIG.recent_tasks_cap,
            flow_timeout: Duration::seconds(CONFIG.flow_timeout_secs),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> impl Iterator<Item = &ContextMessage> {
        self.history.iter()
    }

    pub fn action_history(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter()
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    // ── History ─────────────────────────────────────────────────────────

    /// Append a message, evicting the oldest once over the cap.
    pub fn add_message(&mut self, role: Role, content: &str, displayed_tasks: Vec<Task>) {
        self.history.push_back(ContextMessage {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            role,
            content: content.to_string(),
            displayed_tasks,
        });
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
    }

    // ── Snapshot ────────────────────────────────────────────────────────

    /// Read-only snapshot for the analyzer. Takes &mut self because flow
    /// state is only trustworthy after lazy expiry.
    pub fn context_for_ai(&mut self) -> ContextSnapshot {
        let flow = if self.is_flow_active() {
            self.current_flow.clone()
        } else {
            None
        };

        let recent_messages = self
            .history
            .iter()
            .rev()
            .take(CONFIG.snapshot_recent_messages)
            .map(|m| SnapshotMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        ContextSnapshot {
            session_id: self.session_id.clone(),
            recent_messages,
            current_flow: flow,
            last_task_title: self.entities.last_task.as_ref().map(|t| t.title.clone()),
            recent_task_titles: self
                .entities
                .recent_tasks
                .iter()
                .map(|t| t.title.clone())
                .collect(),
            active_task_id: self.entities.active_task.primary.clone(),
            expecting_task_ref: self.entities.conversation_flow.expecting_task_ref,
            preferences: self.preferences.clone(),
            session_minutes: (Utc::now() - self.started_at).num_minutes(),
            message_count: self.history.len(),
            user_patterns: self.user_patterns(),
        }
    }

    fn user_patterns(&self) -> UserPatterns {
        let most_used_priority = self
            .stats
            .priority_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(p, _)| p.clone());

        let mut categories: Vec<_> = self.stats.category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let top_categories = categories.into_iter().take(3).map(|(c, _)| c.clone()).collect();

        UserPatterns {
            most_used_priority,
            top_categories,
        }
    }

    // ── Absorption after execution ──────────────────────────────────────

    /// Single absorption point for execution outcomes. Memory population
    /// runs before the generic entity merge so a stale `last_task` in the
    /// patch cannot overwrite the freshly computed active-task pointer.
    pub fn update_context(&mut self, action: &str, updates: ContextUpdates) {
        let populated_memory = updates.should_add_to_memory.is_some();
        if let Some(directive) = updates.should_add_to_memory {
            match directive {
                MemoryDirective::Single(task) => self.add_task_to_memory(task),
                MemoryDirective::Multiple(tasks) => self.add_tasks_to_memory(tasks),
            }
        }

        // The directive is authoritative for last_task; a stale copy in the
        // generic patch must not win over it.
        if let Some(last_task) = updates.entities.last_task {
            if !populated_memory {
                self.entities.last_task = Some(last_task);
            }
        }
        if let Some(last_list) = updates.entities.last_list {
            self.entities.last_list = last_list;
        }
        if let Some(recent) = updates.entities.recent_tasks {
            self.entities.recent_tasks = recent;
            self.entities.recent_tasks.truncate(self.recent_tasks_cap);
        }

        if let Some(priority) = updates.preferences.default_priority {
            self.preferences.default_priority = priority;
        }
        if let Some(category) = updates.preferences.default_category {
            self.preferences.default_category = Some(category);
        }

        if let Some(flow) = updates.flow {
            self.current_flow = Some(flow);
        }

        let reversible = matches!(action, "create" | "update" | "delete");
        self.actions.push_back(ActionRecord {
            action: action.to_string(),
            timestamp: Utc::now(),
            payload: Value::Null,
            reversible,
        });
        while self.actions.len() > self.action_cap {
            self.actions.pop_front();
        }
    }

    // ── Learning ────────────────────────────────────────────────────────

    /// Opportunistic preference/stat learning from a successful operation.
    /// Pure counters; a missing field just skips that sub-update.
    pub fn learn_from_task_operation(&mut self, task: &Task, action: &str) {
        match action {
            "create" => {
                self.stats.tasks_created += 1;

                if let Some(category) = task.category.as_deref().filter(|c| !c.trim().is_empty()) {
                    let count = self
                        .stats
                        .category_counts
                        .entry(category.to_string())
                        .or_insert(0);
                    *count += 1;

                    // Deterministic: the modal category becomes the default
                    // once it has been used often enough.
                    let count = *count;
                    let is_modal = self
                        .stats
                        .category_counts
                        .values()
                        .all(|other| *other <= count);
                    if is_modal && count >= CATEGORY_LEARN_THRESHOLD {
                        self.preferences.default_category = Some(category.to_string());
                    }
                }

                *self
                    .stats
                    .priority_counts
                    .entry(task.priority.as_str().to_string())
                    .or_insert(0) += 1;
            }
            "complete" => {
                self.stats.tasks_completed += 1;
            }
            _ => {}
        }
    }

    // ── Task memory ─────────────────────────────────────────────────────

    fn normalize_title(title: &str) -> String {
        title.trim().to_lowercase()
    }

    fn remember_recent(&mut self, task: &Task) {
        self.entities.recent_tasks.retain(|t| t.id != task.id);
        self.entities.recent_tasks.insert(0, task.clone());
        self.entities.recent_tasks.truncate(self.recent_tasks_cap);
    }

    /// Record a single task as the one in focus. No-op on missing id/title.
    pub fn add_task_to_memory(&mut self, task: Task) {
        if task.id.trim().is_empty() || task.title.trim().is_empty() {
            return;
        }

        self.entities
            .task_id_map
            .insert(Self::normalize_title(&task.title), task.id.clone());
        self.remember_recent(&task);

        self.entities.active_task.primary = Some(task.id.clone());
        self.entities.active_task.secondary.clear();
        self.entities.active_task.last_displayed = vec![task.clone()];
        self.entities.conversation_flow.expecting_task_ref = true;
        self.entities.conversation_flow.implicit_task_id = Some(task.id.clone());
        self.entities.last_task = Some(task);
    }

    /// Record a displayed result set: primary = first, secondary = rest.
    /// No-op on empty input.
    pub fn add_tasks_to_memory(&mut self, tasks: Vec<Task>) {
        let tasks: Vec<Task> = tasks
            .into_iter()
            .filter(|t| !t.id.trim().is_empty() && !t.title.trim().is_empty())
            .collect();
        let Some(first) = tasks.first().cloned() else {
            return;
        };

        for task in &tasks {
            self.entities
                .task_id_map
                .insert(Self::normalize_title(&task.title), task.id.clone());
        }
        for task in tasks.iter().rev() {
            self.remember_recent(task);
        }

        self.entities.active_task.primary = Some(first.id.clone());
        self.entities.active_task.secondary =
            tasks.iter().skip(1).map(|t| t.id.clone()).collect();
        self.entities.active_task.last_displayed = tasks.clone();
        self.entities.conversation_flow.expecting_task_ref = true;
        self.entities.conversation_flow.implicit_task_id = Some(first.id);
        self.entities.last_list = tasks;
    }

    // ── Flow lifecycle ──────────────────────────────────────────────────

    /// Override the default flow window (e.g. per-deployment tuning).
    pub fn set_flow_timeout(&mut self, timeout: Duration) {
        self.flow_timeout = timeout;
    }

    pub fn start_flow(&mut self, kind: &str, data: Value) {
        let now = Utc::now();
        self.current_flow = Some(Flow {
            kind: kind.to_string(),
            step: 0,
            data,
            started_at: now,
            timeout: now + self.flow_timeout,
        });
    }

    pub fn update_flow(&mut self, step: u32, data: Option<Value>) {
        if let Some(flow) = self.current_flow.as_mut() {
            flow.step = step;
            if let Some(data) = data {
                flow.data = data;
            }
        }
    }

    pub fn complete_flow(&mut self) {
        self.current_flow = None;
    }

    /// The only place flow timeout is enforced: a timed-out flow is cleared
    /// here and reported inactive. Callers must use this instead of reading
    /// the flow directly.
    pub fn is_flow_active(&mut self) -> bool {
        match &self.current_flow {
            Some(flow) if Utc::now() > flow.timeout => {
                self.current_flow = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn current_flow(&mut self) -> Option<&Flow> {
        if self.is_flow_active() {
            self.current_flow.as_ref()
        } else {
            None
        }
    }

    // ── Reset ───────────────────────────────────────────────────────────

    /// Drop all state and start a fresh session.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Forget the visible conversation only; memory and stats survive.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// One-line summary for turn results and the /context command.
    pub fn summary(&self) -> String {
        format!(
            "session {} | {} messages | {} created, {} completed | focus: {}",
            &self.session_id[..8.min(self.session_id.len())],
            self.history.len(),
            self.stats.tasks_created,
            self.stats.tasks_completed,
            self.entities
                .active_task
                .primary
                .as_deref()
                .unwrap_or("none"),
        )
    }
}
