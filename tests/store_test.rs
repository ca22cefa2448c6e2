// tests/store_test.rs

use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use taskpilot::store::{
    migration, NewTask, NewUser, SqliteTaskStore, SqliteUserStore, TaskFilter, TaskPatch,
    TaskPriority, TaskStatus, TaskStore, UserRole, UserStore,
};

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    migration::run(&pool).await.expect("migrations");
    pool
}

// ── Task store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_round_trips_all_fields() {
    let store = SqliteTaskStore::new(setup_pool().await);

    let created = store
        .create(NewTask {
            owner_id: Some("alice".to_string()),
            title: "write report".to_string(),
            description: Some("quarterly numbers".to_string()),
            status: Some(TaskStatus::InProgress),
            priority: Some(TaskPriority::High),
            category: Some("work".to_string()),
            tags: vec!["q3".to_string(), "finance".to_string()],
            due_date: Some(Utc::now() + Duration::days(3)),
        })
        .await
        .unwrap();

    let fetched = store.get(&created.id).await.unwrap().expect("task exists");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.owner_id.as_deref(), Some("alice"));
    assert_eq!(fetched.title, "write report");
    assert_eq!(fetched.description.as_deref(), Some("quarterly numbers"));
    assert_eq!(fetched.status, TaskStatus::InProgress);
    assert_eq!(fetched.priority, TaskPriority::High);
    assert_eq!(fetched.category.as_deref(), Some("work"));
    assert_eq!(fetched.tags, vec!["q3".to_string(), "finance".to_string()]);
    let due_drift = (fetched.due_date.unwrap() - created.due_date.unwrap())
        .num_milliseconds()
        .abs();
    assert!(due_drift < 5, "due date must survive storage, drift {due_drift}ms");
}

#[tokio::test]
async fn list_combines_filters_and_orders_newest_first() {
    let store = SqliteTaskStore::new(setup_pool().await);

    for (title, owner, status) in [
        ("a", "alice", TaskStatus::Pending),
        ("b", "alice", TaskStatus::Completed),
        ("c", "bob", TaskStatus::Pending),
    ] {
        store
            .create(NewTask {
                owner_id: Some(owner.to_string()),
                title: title.to_string(),
                status: Some(status),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let alices = store
        .list(&TaskFilter {
            owner_id: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alices.len(), 2);

    let alices_pending = store
        .list(&TaskFilter {
            owner_id: Some("alice".to_string()),
            status: Some(TaskStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alices_pending.len(), 1);
    assert_eq!(alices_pending[0].title, "a");

    let all = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(
        all[0].created_at >= all[1].created_at && all[1].created_at >= all[2].created_at,
        "listing must be newest first"
    );
}

#[tokio::test]
async fn update_patch_bumps_updated_at_and_preserves_the_rest() {
    let store = SqliteTaskStore::new(setup_pool().await);
    let task = store
        .create(NewTask {
            title: "stable title".to_string(),
            description: Some("stable description".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let updated = store
        .update(
            &task.id,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("row exists");

    assert_eq!(updated.status, TaskStatus::Completed);
    assert_eq!(updated.title, "stable title");
    assert_eq!(updated.description.as_deref(), Some("stable description"));
    assert!(updated.updated_at >= task.updated_at);
}

#[tokio::test]
async fn update_and_delete_of_missing_ids() {
    let store = SqliteTaskStore::new(setup_pool().await);

    let updated = store
        .update(
            "no-such-id",
            TaskPatch {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_none());

    assert!(!store.delete("no-such-id").await.unwrap());
}

#[tokio::test]
async fn search_matches_title_description_category_and_tags() {
    let store = SqliteTaskStore::new(setup_pool().await);

    store
        .create(NewTask {
            title: "buy groceries".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create(NewTask {
            title: "misc".to_string(),
            description: Some("pick up groceries on the way".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create(NewTask {
            title: "other".to_string(),
            tags: vec!["groceries".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create(NewTask {
            title: "unrelated".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let hits = store.search("groceries", None).await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn delete_by_owner_and_status_scopes_correctly() {
    let store = SqliteTaskStore::new(setup_pool().await);

    for (owner, status) in [
        ("alice", TaskStatus::Completed),
        ("alice", TaskStatus::Completed),
        ("alice", TaskStatus::Pending),
        ("bob", TaskStatus::Completed),
    ] {
        store
            .create(NewTask {
                owner_id: Some(owner.to_string()),
                title: "x".to_string(),
                status: Some(status),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let removed = store
        .delete_by_owner_and_status(Some("alice"), Some(TaskStatus::Completed))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = store.list(&TaskFilter::default()).await.unwrap();
    assert_eq!(remaining.len(), 2);
}

// ── User store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn user_lookup_by_telegram_id_and_email() {
    let store = SqliteUserStore::new(setup_pool().await);

    let created = store
        .create(NewUser {
            telegram_id: Some("tg-123".to_string()),
            email: Some("alice@example.com".to_string()),
            display_name: Some("Alice".to_string()),
            role: UserRole::User,
        })
        .await
        .unwrap();

    let by_tg = store
        .find_by_telegram_id("tg-123")
        .await
        .unwrap()
        .expect("found by telegram id");
    assert_eq!(by_tg.id, created.id);

    let by_email = store
        .find_by_email("alice@example.com")
        .await
        .unwrap()
        .expect("found by email");
    assert_eq!(by_email.id, created.id);

    assert!(store.find_by_telegram_id("tg-999").await.unwrap().is_none());
}

#[tokio::test]
async fn deactivated_users_drop_out_of_the_active_listing() {
    let store = SqliteUserStore::new(setup_pool().await);

    let alice = store
        .create(NewUser {
            telegram_id: Some("tg-1".to_string()),
            role: UserRole::Admin,
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .create(NewUser {
            telegram_id: Some("tg-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(store.set_active(&alice.id, false).await.unwrap());

    let active = store.list(Some(true), None).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].telegram_id.as_deref(), Some("tg-2"));

    let admins = store.list(None, Some(UserRole::Admin)).await.unwrap();
    assert_eq!(admins.len(), 1);
    assert!(!admins[0].active);
}
