// tests/executor_test.rs

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use taskpilot::context::{ContextManager, ContextSnapshot};
use taskpilot::executor::{
    absorb_result, BulkOutcome, ExecutionData, ExecutionError, Executor,
};
use taskpilot::llm::{Action, EntityBag, FunctionCall, IntentAnalysis, IntentBackend, PlannedOperation};
use taskpilot::store::{
    migration, NewTask, SqliteTaskStore, StoreError, Task, TaskFilter, TaskPatch, TaskPriority,
    TaskStatsRow, TaskStatus, TaskStore,
};

// ── Test doubles ────────────────────────────────────────────────────────

/// Backend that replays scripted analyses; panics are avoided by falling
/// back to a low-confidence analysis when the script runs dry.
#[derive(Default)]
struct ScriptedBackend {
    analyses: Mutex<VecDeque<IntentAnalysis>>,
    function: Mutex<Option<FunctionCall>>,
}

#[async_trait]
impl IntentBackend for ScriptedBackend {
    async fn analyze(&self, utterance: &str, _snapshot: &ContextSnapshot) -> IntentAnalysis {
        self.analyses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| IntentAnalysis::fallback(utterance))
    }

    async fn function_call(
        &self,
        _analysis: &IntentAnalysis,
        _snapshot: &ContextSnapshot,
    ) -> Option<FunctionCall> {
        self.function.lock().unwrap().take()
    }
}

/// Store wrapper that fails deletes for chosen ids.
struct FlakyStore {
    inner: SqliteTaskStore,
    fail_delete_ids: Mutex<HashSet<String>>,
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        self.inner.create(input).await
    }
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.inner.list(filter).await
    }
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        self.inner.update(id, patch).await
    }
    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if self.fail_delete_ids.lock().unwrap().contains(id) {
            return Err(StoreError::InvalidData("injected delete failure".to_string()));
        }
        self.inner.delete(id).await
    }
    async fn search(&self, term: &str, owner_id: Option<&str>) -> Result<Vec<Task>, StoreError> {
        self.inner.search(term, owner_id).await
    }
    async fn stats(&self, owner_id: Option<&str>) -> Result<Vec<TaskStatsRow>, StoreError> {
        self.inner.stats(owner_id).await
    }
    async fn delete_by_owner_and_status(
        &self,
        owner_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<u64, StoreError> {
        self.inner.delete_by_owner_and_status(owner_id, status).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn setup_store() -> SqliteTaskStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    migration::run(&pool).await.expect("migrations");
    SqliteTaskStore::new(pool)
}

fn executor(store: Arc<dyn TaskStore>) -> Executor {
    Executor::new(store, Arc::new(ScriptedBackend::default()), None)
}

fn analysis(action: Action, entities: EntityBag) -> IntentAnalysis {
    IntentAnalysis {
        primary_action: action,
        entities,
        confidence: 0.95,
        instructions: None,
        operations: Vec::new(),
    }
}

fn create_entities(title: &str) -> EntityBag {
    EntityBag {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

// ── Confidence gate ─────────────────────────────────────────────────────

#[tokio::test]
async fn low_confidence_short_circuits_without_store_calls() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let mut a = analysis(Action::Create, create_entities("never created"));
    a.confidence = 0.65;

    let result = exec.execute(&a, &mut ctx).await;

    assert!(!result.success);
    assert!(result.needs_clarification);
    assert_eq!(result.error, Some(ExecutionError::LowConfidence));
    let tasks = store.list(&TaskFilter::default()).await.unwrap();
    assert!(tasks.is_empty(), "gate must fire before any store write");
}

// ── create ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_defaults_due_date_to_tomorrow() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(&analysis(Action::Create, create_entities("fix bug")), &mut ctx)
        .await;

    assert!(result.success, "{}", result.message);
    let ExecutionData::Task(task) = &result.data else {
        panic!("expected task data");
    };
    let due = task.due_date.expect("due date defaulted");
    let expected = Utc::now() + Duration::days(1);
    let drift = (due - expected).num_seconds().abs();
    assert!(drift < 60, "due date should be ~now + 1 day, drift {drift}s");
}

#[tokio::test]
async fn create_applies_preference_defaults() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();
    ctx.preferences.default_priority = TaskPriority::High;
    ctx.preferences.default_category = Some("work".to_string());

    let result = exec
        .execute(&analysis(Action::Create, create_entities("prefs apply")), &mut ctx)
        .await;

    let ExecutionData::Task(task) = &result.data else {
        panic!("expected task data");
    };
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.category.as_deref(), Some("work"));
}

#[tokio::test]
async fn create_without_title_fails_validation() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(&analysis(Action::Create, EntityBag::default()), &mut ctx)
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(ExecutionError::MissingField("title".to_string()))
    );
    assert!(store.list(&TaskFilter::default()).await.unwrap().is_empty());
}

// ── update ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_patches_only_provided_fields() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let task = store
        .create(NewTask {
            title: "partial patch".to_string(),
            priority: Some(TaskPriority::Urgent),
            category: Some("ops".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    let bag = EntityBag {
        task_id: Some(task.id.clone()),
        status: Some("completed".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Update, bag), &mut ctx).await;

    assert!(result.success, "{}", result.message);
    let updated = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Completed);
    assert_eq!(updated.title, "partial patch");
    assert_eq!(updated.priority, TaskPriority::Urgent);
    assert_eq!(updated.category.as_deref(), Some("ops"));
    assert_eq!(updated.tags, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn update_with_unresolvable_reference_asks_for_clarification() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let bag = EntityBag {
        task_reference: Some("no such thing anywhere".to_string()),
        status: Some("completed".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Update, bag), &mut ctx).await;

    assert!(!result.success);
    assert!(result.needs_clarification);
    assert_eq!(result.error, Some(ExecutionError::UnresolvedReference));
}

#[tokio::test]
async fn update_resolved_but_missing_row_is_not_found() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let bag = EntityBag {
        task_id: Some(Uuid::new_v4().to_string()),
        status: Some("completed".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Update, bag), &mut ctx).await;

    assert!(!result.success);
    assert!(!result.needs_clarification, "not-found is distinct from unresolved");
    assert_eq!(result.error, Some(ExecutionError::NotFound));
}

#[tokio::test]
async fn update_resolves_reference_by_store_title_substring() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let task = store
        .create(NewTask {
            title: "prepare quarterly review".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // Context is empty, so resolution has to go through the store ladder.
    let bag = EntityBag {
        task_reference: Some("quarterly".to_string()),
        priority: Some("urgent".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Update, bag), &mut ctx).await;

    assert!(result.success, "{}", result.message);
    let updated = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(updated.priority, TaskPriority::Urgent);
}

// ── delete ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_missing_task_reports_not_found() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let bag = EntityBag {
        task_id: Some(Uuid::new_v4().to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Delete, bag), &mut ctx).await;

    assert!(!result.success);
    assert_eq!(result.error, Some(ExecutionError::NotFound));
}

#[tokio::test]
async fn bulk_delete_tallies_partial_failures() {
    let inner = setup_store().await;
    let mut fail_ids = HashSet::new();
    for i in 0..5 {
        let task = inner
            .create(NewTask {
                title: format!("pending {i}"),
                ..Default::default()
            })
            .await
            .unwrap();
        if i < 2 {
            fail_ids.insert(task.id);
        }
    }
    let store = Arc::new(FlakyStore {
        inner,
        fail_delete_ids: Mutex::new(fail_ids),
    });
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let bag = EntityBag {
        bulk_delete: Some(true),
        status: Some("pending".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Delete, bag), &mut ctx).await;

    assert!(result.success, "at least one deletion succeeded");
    assert_eq!(result.error, Some(ExecutionError::BulkPartialFailure));
    assert_eq!(
        result.data,
        ExecutionData::Bulk(BulkOutcome {
            deleted: 3,
            failed: 2,
            total_found: 5,
            status: TaskStatus::Pending,
        })
    );
}

#[tokio::test]
async fn bulk_delete_with_no_matches_is_an_informative_failure() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let bag = EntityBag {
        bulk_delete: Some(true),
        status: Some("completed".to_string()),
        ..Default::default()
    };
    let result = exec.execute(&analysis(Action::Delete, bag), &mut ctx).await;

    assert!(!result.success);
    assert!(result.message.contains("completed"));
}

// ── search & analyze ────────────────────────────────────────────────────

#[tokio::test]
async fn search_requires_a_term() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(&analysis(Action::Search, EntityBag::default()), &mut ctx)
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(ExecutionError::MissingField("search term".to_string()))
    );
}

#[tokio::test]
async fn search_term_can_come_from_instructions() {
    let store = Arc::new(setup_store().await);
    store
        .create(NewTask {
            title: "water the plants".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let mut a = analysis(Action::Search, EntityBag::default());
    a.instructions = Some("search for plants".to_string());
    let result = exec.execute(&a, &mut ctx).await;

    assert!(result.success, "{}", result.message);
    let ExecutionData::Tasks(tasks) = &result.data else {
        panic!("expected tasks");
    };
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn analyze_returns_grouped_stats() {
    let store = Arc::new(setup_store().await);
    for i in 0..3 {
        store
            .create(NewTask {
                title: format!("task {i}"),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(&analysis(Action::Analyze, EntityBag::default()), &mut ctx)
        .await;

    assert!(result.success);
    let ExecutionData::Stats(rows) = &result.data else {
        panic!("expected stats");
    };
    let total: i64 = rows.iter().map(|r| r.count).sum();
    assert_eq!(total, 3);
}

// ── fallback function calling ───────────────────────────────────────────

#[tokio::test]
async fn fallback_maps_known_function_onto_create() {
    let store = Arc::new(setup_store().await);
    let backend = Arc::new(ScriptedBackend::default());
    *backend.function.lock().unwrap() = Some(FunctionCall {
        name: "create_task".to_string(),
        arguments: serde_json::json!({ "title": "from fallback", "priority": "high" }),
    });
    let exec = Executor::new(store.clone(), backend, None);
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(
            &analysis(Action::Other("remind".to_string()), EntityBag::default()),
            &mut ctx,
        )
        .await;

    assert!(result.success, "{}", result.message);
    let tasks = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "from fallback");
    assert_eq!(tasks[0].priority, TaskPriority::High);
}

#[tokio::test]
async fn fallback_rejects_unknown_function_names() {
    let store = Arc::new(setup_store().await);
    let backend = Arc::new(ScriptedBackend::default());
    *backend.function.lock().unwrap() = Some(FunctionCall {
        name: "format_hard_drive".to_string(),
        arguments: serde_json::json!({}),
    });
    let exec = Executor::new(store.clone(), backend, None);
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(
            &analysis(Action::Other("mystery".to_string()), EntityBag::default()),
            &mut ctx,
        )
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(ExecutionError::Unsupported("format_hard_drive".to_string()))
    );
}

#[tokio::test]
async fn fallback_without_function_call_is_a_generic_failure() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(
            &analysis(Action::Other("gibberish".to_string()), EntityBag::default()),
            &mut ctx,
        )
        .await;

    assert!(!result.success);
    assert!(matches!(result.error, Some(ExecutionError::Unsupported(_))));
}

// ── multi-operation ─────────────────────────────────────────────────────

fn plan(operations: Vec<PlannedOperation>) -> IntentAnalysis {
    IntentAnalysis {
        primary_action: Action::Create,
        entities: EntityBag::default(),
        confidence: 0.95,
        instructions: None,
        operations,
    }
}

#[tokio::test]
async fn multi_op_executes_in_order_field_order() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    // Deliberately scripted out of order.
    let a = plan(vec![
        PlannedOperation {
            order: 2,
            action: Action::Create,
            entities: create_entities("second"),
        },
        PlannedOperation {
            order: 1,
            action: Action::Create,
            entities: create_entities("first"),
        },
    ]);
    let result = exec.execute_plan(&a, &mut ctx).await;

    assert!(result.success, "{}", result.message);
    let tasks = store.list(&TaskFilter::default()).await.unwrap();
    let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(tasks.len(), 2);
    // Newest-first listing: "second" was created after "first".
    assert!(titles.contains(&"first") && titles.contains(&"second"));
    assert_eq!(
        ctx.entities.last_task.as_ref().map(|t| t.title.as_str()),
        Some("second"),
        "context absorbed after each step"
    );
}

#[tokio::test]
async fn multi_op_stops_on_first_failure_without_rollback() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let a = plan(vec![
        PlannedOperation {
            order: 1,
            action: Action::Create,
            entities: create_entities("survives"),
        },
        PlannedOperation {
            order: 2,
            action: Action::Create,
            entities: EntityBag::default(), // no title: fails
        },
        PlannedOperation {
            order: 3,
            action: Action::Create,
            entities: create_entities("never reached"),
        },
    ]);
    let result = exec.execute_plan(&a, &mut ctx).await;

    assert!(!result.success);
    let tasks = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1, "step 1 kept, step 3 never attempted");
    assert_eq!(tasks[0].title, "survives");
    let ExecutionData::Many(collected) = &result.data else {
        panic!("expected aggregated data");
    };
    assert_eq!(collected.len(), 1, "only successful step data is carried");
}

#[tokio::test]
async fn later_steps_see_context_from_earlier_steps() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let a = plan(vec![
        PlannedOperation {
            order: 1,
            action: Action::Create,
            entities: create_entities("write report"),
        },
        PlannedOperation {
            order: 2,
            action: Action::Update,
            entities: EntityBag {
                task_reference: Some("that task".to_string()),
                status: Some("completed".to_string()),
                ..Default::default()
            },
        },
    ]);
    let result = exec.execute_plan(&a, &mut ctx).await;

    assert!(result.success, "{}", result.message);
    let tasks = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
}

// ── absorption helper ───────────────────────────────────────────────────

#[tokio::test]
async fn absorbing_a_create_updates_memory_and_stats() {
    let store = Arc::new(setup_store().await);
    let exec = executor(store.clone());
    let mut ctx = ContextManager::new();

    let result = exec
        .execute(&analysis(Action::Create, create_entities("remember me")), &mut ctx)
        .await;
    absorb_result(&mut ctx, &Action::Create, &result);

    assert_eq!(ctx.stats.tasks_created, 1);
    assert_eq!(
        ctx.entities.last_task.as_ref().map(|t| t.title.as_str()),
        Some("remember me")
    );
    assert!(ctx.entities.task_id_map.contains_key("remember me"));
}
