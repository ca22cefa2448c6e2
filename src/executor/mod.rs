// src/executor/mod.rs
//! Maps a validated `IntentAnalysis` onto store operations.
//!
//! Every outcome, including every failure, is returned as data in an
//! `ExecutionResult`; nothing is thrown past this boundary. The raw entity
//! bag from the model is validated into per-action records before any store
//! call is made.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{ContextManager, ContextUpdates, MemoryDirective};
use crate::llm::functions::TaskFunction;
use crate::llm::{Action, EntityBag, IntentAnalysis, IntentBackend};
use crate::store::{
    NewTask, Task, TaskFilter, TaskPatch, TaskPriority, TaskStatsRow, TaskStatus, TaskStore,
};

/// Below this the executor asks for clarification instead of acting.
pub const MIN_CONFIDENCE: f32 = 0.7;

// ============================================================================
// Result envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ExecutionError {
    MissingField(String),
    NotFound,
    UnresolvedReference,
    Store(String),
    BulkPartialFailure,
    LowConfidence,
    Unsupported(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkOutcome {
    pub deleted: u64,
    pub failed: u64,
    pub total_found: u64,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum ExecutionData {
    #[default]
    None,
    Task(Task),
    Tasks(Vec<Task>),
    Stats(Vec<TaskStatsRow>),
    Bulk(BulkOutcome),
    /// Concatenated data of the successful steps of a multi-operation run.
    Many(Vec<ExecutionData>),
}

/// Uniform outcome envelope for every action handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub data: ExecutionData,
    pub needs_clarification: bool,
    pub error: Option<ExecutionError>,
    #[serde(skip)]
    pub context_updates: ContextUpdates,
    pub suggestions: Vec<String>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>, data: ExecutionData) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            needs_clarification: false,
            error: None,
            context_updates: ContextUpdates::default(),
            suggestions: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>, error: ExecutionError) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: ExecutionData::None,
            needs_clarification: false,
            error: Some(error),
            context_updates: ContextUpdates::default(),
            suggestions: Vec::new(),
        }
    }

    pub fn clarification(message: impl Into<String>, error: ExecutionError) -> Self {
        let mut result = Self::fail(message, error);
        result.needs_clarification = true;
        result
    }

    fn store_failure(err: crate::store::StoreError) -> Self {
        Self::fail(
            format!("Something went wrong talking to the task store: {err}"),
            ExecutionError::Store(err.to_string()),
        )
    }

    fn with_memory(mut self, directive: MemoryDirective) -> Self {
        self.context_updates.should_add_to_memory = Some(directive);
        self
    }

    fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

// ============================================================================
// Validated per-action entities
// ============================================================================

#[derive(Debug, Clone)]
struct CreateEntities {
    title: String,
    description: Option<String>,
    priority: Option<TaskPriority>,
    category: Option<String>,
    tags: Vec<String>,
    due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct ReadEntities {
    status: Option<TaskStatus>,
    priority: Option<TaskPriority>,
    category: Option<String>,
    due_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct MutationTarget {
    /// Explicit, well-formed id; skips resolution entirely.
    explicit_id: Option<String>,
    /// Free-text reference for the resolution ladder.
    reference: Option<String>,
}

impl MutationTarget {
    fn from_bag(bag: &EntityBag) -> Self {
        let explicit_id = bag
            .task_id
            .as_deref()
            .filter(|id| Uuid::parse_str(id).is_ok())
            .map(str::to_string);
        // A malformed task_id is still usable as reference text.
        let reference = bag
            .task_reference
            .clone()
            .or_else(|| {
                bag.task_id
                    .as_deref()
                    .filter(|id| Uuid::parse_str(id).is_err())
                    .map(str::to_string)
            })
            .or_else(|| bag.title.clone());
        Self {
            explicit_id,
            reference,
        }
    }
}

/// Parse the model's due-date strings: relative words or ISO dates.
pub fn parse_due_date(text: &str) -> Option<DateTime<Utc>> {
    let now = Utc::now();
    match text.trim().to_lowercase().as_str() {
        "today" => Some(now),
        "tomorrow" => Some(now + Duration::days(1)),
        "next week" => Some(now + Duration::days(7)),
        other => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(other) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(23, 59, 59))
                .map(|dt| Utc.from_utc_datetime(&dt))
        }
    }
}

fn parse_priority(bag: &EntityBag) -> Option<TaskPriority> {
    bag.priority.as_deref().and_then(TaskPriority::parse)
}

fn parse_status(bag: &EntityBag) -> Option<TaskStatus> {
    bag.status.as_deref().and_then(TaskStatus::parse)
}

fn parse_due(bag: &EntityBag) -> Option<DateTime<Utc>> {
    bag.due_date
        .as_deref()
        .or(bag.deadline.as_deref())
        .and_then(parse_due_date)
}

/// Pull a usable search term out of the entity bag or the free-text
/// instructions, dropping filler words.
fn extract_search_term(bag: &EntityBag, instructions: Option<&str>) -> Option<String> {
    if let Some(term) = bag
        .search_term
        .as_deref()
        .or(bag.title.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(term.to_string());
    }

    const FILLER: &[&str] = &[
        "search", "find", "look", "for", "show", "me", "my", "the", "a", "tasks", "task", "about",
    ];
    let term = instructions?
        .split_whitespace()
        .filter(|w| !FILLER.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct Executor {
    store: Arc<dyn TaskStore>,
    backend: Arc<dyn IntentBackend>,
    owner_id: Option<String>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn IntentBackend>,
        owner_id: Option<String>,
    ) -> Self {
        Self {
            store,
            backend,
            owner_id,
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Execute a single-action analysis. The confidence gate fires before
    /// anything else, store included.
    pub async fn execute(
        &self,
        analysis: &IntentAnalysis,
        ctx: &mut ContextManager,
    ) -> ExecutionResult {
        if analysis.confidence < MIN_CONFIDENCE {
            return ExecutionResult::clarification(
                "I'm not sure what you'd like me to do. Could you rephrase that?",
                ExecutionError::LowConfidence,
            );
        }

        debug!(
            action = analysis.primary_action.as_str(),
            "executing intent"
        );

        match &analysis.primary_action {
            Action::Create => self.create(&analysis.entities, ctx).await,
            Action::Read => self.read(&analysis.entities).await,
            Action::Update => self.update(&analysis.entities, ctx).await,
            Action::Delete => self.delete(&analysis.entities, ctx).await,
            Action::Search => {
                self.search(&analysis.entities, analysis.instructions.as_deref())
                    .await
            }
            Action::Analyze => self.analyze().await,
            Action::Other(_) => self.fallback(analysis, ctx).await,
        }
    }

    /// Execute a multi-operation plan: ordered, strictly sequential, context
    /// absorbed after each successful step so later steps can resolve ids
    /// created earlier. Stops on the first failure; no rollback.
    pub async fn execute_plan(
        &self,
        analysis: &IntentAnalysis,
        ctx: &mut ContextManager,
    ) -> ExecutionResult {
        if analysis.confidence < MIN_CONFIDENCE {
            return ExecutionResult::clarification(
                "I'm not sure what you'd like me to do. Could you rephrase that?",
                ExecutionError::LowConfidence,
            );
        }

        let mut operations = analysis.operations.clone();
        operations.sort_by_key(|op| op.order);

        let total = operations.len();
        let mut collected = Vec::new();
        let mut messages = Vec::new();

        for (index, op) in operations.into_iter().enumerate() {
            let step = IntentAnalysis {
                primary_action: op.action.clone(),
                entities: op.entities,
                confidence: analysis.confidence,
                instructions: analysis.instructions.clone(),
                operations: Vec::new(),
            };
            let result = self.execute(&step, ctx).await;

            if !result.success {
                let message = format!(
                    "Completed {} of {} steps, then stopped: {}",
                    index, total, result.message
                );
                let mut aggregate = ExecutionResult::fail(
                    message,
                    result
                        .error
                        .unwrap_or(ExecutionError::Store("step failed".to_string())),
                );
                aggregate.needs_clarification = result.needs_clarification;
                aggregate.data = ExecutionData::Many(collected);
                return aggregate;
            }

            absorb_result(ctx, &op.action, &result);
            messages.push(result.message);
            collected.push(result.data);
        }

        ExecutionResult::ok(messages.join(" "), ExecutionData::Many(collected))
    }

    // ── create ──────────────────────────────────────────────────────────

    async fn create(&self, bag: &EntityBag, ctx: &ContextManager) -> ExecutionResult {
        let Some(title) = bag
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return ExecutionResult::fail(
                "I need a title to create a task. What should it be called?",
                ExecutionError::MissingField("title".to_string()),
            );
        };

        let validated = CreateEntities {
            title: title.to_string(),
            description: bag.description.clone(),
            priority: parse_priority(bag),
            category: bag.category.clone(),
            tags: bag.tags.clone().unwrap_or_default(),
            due_date: parse_due(bag),
        };

        let input = NewTask {
            owner_id: self.owner_id.clone(),
            title: validated.title,
            description: validated.description,
            status: None,
            priority: Some(
                validated
                    .priority
                    .unwrap_or(ctx.preferences.default_priority),
            ),
            category: validated
                .category
                .or_else(|| ctx.preferences.default_category.clone()),
            tags: validated.tags,
            // None lets the store apply the now + 1 day default.
            due_date: validated.due_date,
        };

        match self.store.create(input).await {
            Ok(task) => {
                let suggestions = vec![
                    format!("Mark '{}' as completed", task.title),
                    "Show my tasks".to_string(),
                ];
                ExecutionResult::ok(
                    format!(
                        "Created '{}' ({} priority, due {})",
                        task.title,
                        task.priority.as_str(),
                        task.due_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .unwrap_or_else(|| "unset".to_string()),
                    ),
                    ExecutionData::Task(task.clone()),
                )
                .with_memory(MemoryDirective::Single(task))
                .with_suggestions(suggestions)
            }
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    // ── read ────────────────────────────────────────────────────────────

    async fn read(&self, bag: &EntityBag) -> ExecutionResult {
        let entities = ReadEntities {
            status: parse_status(bag),
            priority: parse_priority(bag),
            category: bag.category.clone(),
            due_before: parse_due(bag),
        };

        let filter = TaskFilter {
            owner_id: self.owner_id.clone(),
            status: entities.status,
            priority: entities.priority,
            category: entities.category,
            due_before: entities.due_before,
            limit: None,
        };

        match self.store.list(&filter).await {
            Ok(tasks) => {
                let message = if tasks.is_empty() {
                    "No tasks match.".to_string()
                } else {
                    format!("Found {} task(s).", tasks.len())
                };
                let mut result = ExecutionResult::ok(message, ExecutionData::Tasks(tasks.clone()))
                    .with_suggestions(vec!["Create a new task".to_string()]);
                if !tasks.is_empty() {
                    result = result.with_memory(MemoryDirective::Multiple(tasks));
                }
                result
            }
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    // ── update ──────────────────────────────────────────────────────────

    async fn update(&self, bag: &EntityBag, ctx: &mut ContextManager) -> ExecutionResult {
        let target = MutationTarget::from_bag(bag);
        let id = match self.resolve_target(&target, ctx).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return ExecutionResult::clarification(
                    "Which task do you mean? Give me its title or id.",
                    ExecutionError::UnresolvedReference,
                );
            }
            Err(e) => return ExecutionResult::store_failure(e),
        };

        let patch = TaskPatch {
            title: bag.new_title.clone(),
            description: bag.description.clone(),
            status: parse_status(bag),
            priority: parse_priority(bag),
            category: bag.category.clone(),
            tags: bag.tags.clone(),
            due_date: parse_due(bag),
        };
        if patch.is_empty() {
            return ExecutionResult::fail(
                "What should I change on that task?",
                ExecutionError::MissingField("update fields".to_string()),
            );
        }

        match self.store.update(&id, patch).await {
            Ok(Some(task)) => ExecutionResult::ok(
                format!("Updated '{}' ({}).", task.title, task.status.as_str()),
                ExecutionData::Task(task.clone()),
            )
            .with_memory(MemoryDirective::Single(task)),
            Ok(None) => ExecutionResult::fail(
                "That task no longer exists.",
                ExecutionError::NotFound,
            ),
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    // ── delete ──────────────────────────────────────────────────────────

    async fn delete(&self, bag: &EntityBag, ctx: &mut ContextManager) -> ExecutionResult {
        // Bulk path: "delete all completed tasks".
        if bag.bulk_delete.unwrap_or(false) {
            if let Some(status) = parse_status(bag) {
                return self.bulk_delete_by_status(status).await;
            }
        }

        let target = MutationTarget::from_bag(bag);
        let id = match self.resolve_target(&target, ctx).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return ExecutionResult::clarification(
                    "Which task should I delete? Give me its title or id.",
                    ExecutionError::UnresolvedReference,
                );
            }
            Err(e) => return ExecutionResult::store_failure(e),
        };

        match self.store.delete(&id).await {
            Ok(true) => ExecutionResult::ok("Task deleted.", ExecutionData::None),
            Ok(false) => ExecutionResult::fail(
                "That task no longer exists.",
                ExecutionError::NotFound,
            ),
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    /// Delete every task with the given status. Each task is attempted
    /// regardless of earlier failures; the tally reports the mix.
    async fn bulk_delete_by_status(&self, status: TaskStatus) -> ExecutionResult {
        let filter = TaskFilter {
            owner_id: self.owner_id.clone(),
            status: Some(status),
            limit: Some(i64::MAX),
            ..Default::default()
        };
        let tasks = match self.store.list(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => return ExecutionResult::store_failure(e),
        };

        if tasks.is_empty() {
            return ExecutionResult::fail(
                format!("No tasks with status '{}'.", status.as_str()),
                ExecutionError::NotFound,
            );
        }

        let total_found = tasks.len() as u64;
        let mut deleted = 0u64;
        let mut failed = 0u64;
        for task in &tasks {
            match self.store.delete(&task.id).await {
                Ok(true) => deleted += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    warn!("bulk delete of {} failed: {e}", task.id);
                    failed += 1;
                }
            }
        }

        let outcome = BulkOutcome {
            deleted,
            failed,
            total_found,
            status,
        };
        let message = if failed == 0 {
            format!("Deleted {} '{}' task(s).", deleted, status.as_str())
        } else {
            format!(
                "Deleted {} of {} '{}' task(s); {} could not be removed.",
                deleted,
                total_found,
                status.as_str(),
                failed
            )
        };

        let mut result = ExecutionResult::ok(message, ExecutionData::Bulk(outcome));
        result.success = deleted > 0;
        if failed > 0 {
            result.error = Some(ExecutionError::BulkPartialFailure);
        }
        result
    }

    // ── search ──────────────────────────────────────────────────────────

    async fn search(&self, bag: &EntityBag, instructions: Option<&str>) -> ExecutionResult {
        let Some(term) = extract_search_term(bag, instructions) else {
            return ExecutionResult::fail(
                "What should I search for?",
                ExecutionError::MissingField("search term".to_string()),
            );
        };

        match self.store.search(&term, self.owner_id.as_deref()).await {
            Ok(tasks) => {
                let message = if tasks.is_empty() {
                    format!("Nothing matched '{term}'.")
                } else {
                    format!("Found {} task(s) matching '{term}'.", tasks.len())
                };
                let mut result = ExecutionResult::ok(message, ExecutionData::Tasks(tasks.clone()));
                if !tasks.is_empty() {
                    result = result.with_memory(MemoryDirective::Multiple(tasks));
                }
                result
            }
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    // ── analyze ─────────────────────────────────────────────────────────

    async fn analyze(&self) -> ExecutionResult {
        match self.store.stats(self.owner_id.as_deref()).await {
            Ok(rows) => {
                let total: i64 = rows.iter().map(|r| r.count).sum();
                ExecutionResult::ok(
                    format!("You have {total} task(s) across {} group(s).", rows.len()),
                    ExecutionData::Stats(rows),
                )
            }
            Err(e) => ExecutionResult::store_failure(e),
        }
    }

    // ── fallback function calling ───────────────────────────────────────

    /// Unrecognized primary action: ask the model to pick one of the closed
    /// function set and map it back onto the primitives above.
    async fn fallback(
        &self,
        analysis: &IntentAnalysis,
        ctx: &mut ContextManager,
    ) -> ExecutionResult {
        let snapshot = ctx.context_for_ai();
        let Some(call) = self.backend.function_call(analysis, &snapshot).await else {
            return ExecutionResult::fail(
                "I couldn't work out what to do with that.",
                ExecutionError::Unsupported("no function call".to_string()),
            );
        };

        let function = match TaskFunction::decode(&call.name, &call.arguments) {
            Ok(f) => f,
            Err(name) => {
                return ExecutionResult::fail(
                    format!("I can't perform '{name}'."),
                    ExecutionError::Unsupported(name),
                );
            }
        };

        match function {
            TaskFunction::CreateTask(args) => {
                let bag = EntityBag {
                    title: Some(args.title),
                    description: args.description,
                    priority: args.priority,
                    category: args.category,
                    tags: args.tags,
                    due_date: args.due_date,
                    ..Default::default()
                };
                self.create(&bag, ctx).await
            }
            TaskFunction::UpdateTask(args) => {
                let bag = EntityBag {
                    task_reference: args.identifier().map(str::to_string),
                    new_title: args.title,
                    description: args.description,
                    status: args.status,
                    priority: args.priority,
                    category: args.category,
                    due_date: args.due_date,
                    ..Default::default()
                };
                self.update(&bag, ctx).await
            }
            TaskFunction::DeleteTask(args) => {
                let bag = EntityBag {
                    task_reference: args.identifier().map(str::to_string),
                    ..Default::default()
                };
                self.delete(&bag, ctx).await
            }
            TaskFunction::ListTasks(args) => {
                let bag = EntityBag {
                    status: args.status,
                    priority: args.priority,
                    category: args.category,
                    ..Default::default()
                };
                self.read(&bag).await
            }
            TaskFunction::SearchTasks(args) => {
                let bag = EntityBag {
                    search_term: Some(args.term),
                    ..Default::default()
                };
                self.search(&bag, None).await
            }
        }
    }

    // ── identifier resolution ───────────────────────────────────────────

    /// Text-to-id ladder: explicit id, context resolver, store exact title,
    /// store title/description substring, id prefix. First hit wins.
    async fn resolve_target(
        &self,
        target: &MutationTarget,
        ctx: &ContextManager,
    ) -> Result<Option<String>, crate::store::StoreError> {
        if let Some(id) = &target.explicit_id {
            return Ok(Some(id.clone()));
        }
        let Some(reference) = target.reference.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if reference.is_empty() {
            return Ok(None);
        }

        // Well-formed id passed as reference text.
        if Uuid::parse_str(reference).is_ok() {
            return Ok(Some(reference.to_string()));
        }

        if let Some(resolved) = ctx.resolve_task_reference(reference) {
            return Ok(Some(resolved.task.id));
        }

        // Store lookup: exact title beats title substring beats description
        // substring; results are newest-first so ties break deterministically.
        let lowered = reference.to_lowercase();
        let matches = self.store.search(reference, self.owner_id.as_deref()).await?;
        if let Some(task) = matches.iter().find(|t| t.title.to_lowercase() == lowered) {
            return Ok(Some(task.id.clone()));
        }
        if let Some(task) = matches
            .iter()
            .find(|t| t.title.to_lowercase().contains(&lowered))
        {
            return Ok(Some(task.id.clone()));
        }
        if let Some(task) = matches.iter().find(|t| {
            t.description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&lowered))
                .unwrap_or(false)
        }) {
            return Ok(Some(task.id.clone()));
        }

        // Last resort: id prefix over the owner's tasks.
        if reference.len() >= 8 {
            let all = self
                .store
                .list(&TaskFilter {
                    owner_id: self.owner_id.clone(),
                    limit: Some(i64::MAX),
                    ..Default::default()
                })
                .await?;
            if let Some(task) = all
                .iter()
                .find(|t| t.id.to_lowercase().starts_with(&lowered))
            {
                return Ok(Some(task.id.clone()));
            }
        }

        Ok(None)
    }
}

// ============================================================================
// Absorption helper
// ============================================================================

/// Feed a successful result back into the context: memory/entity updates
/// plus opportunistic stat and preference learning.
pub fn absorb_result(ctx: &mut ContextManager, action: &Action, result: &ExecutionResult) {
    if !result.success {
        // Failures still land in the action history.
        ctx.update_context(action.as_str(), ContextUpdates::default());
        return;
    }

    let mut updates = result.context_updates.clone();
    if let ExecutionData::Tasks(tasks) = &result.data {
        updates.entities.last_list = Some(tasks.clone());
    }
    ctx.update_context(action.as_str(), updates);

    if let ExecutionData::Task(task) = &result.data {
        match action {
            Action::Create => ctx.learn_from_task_operation(task, "create"),
            Action::Update if task.status == TaskStatus::Completed => {
                ctx.learn_from_task_operation(task, "complete")
            }
            _ => {}
        }
    }
}
