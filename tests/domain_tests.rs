/// Domain collection tests
///
/// Task, guest and budget operations layered on the engine.
/// Run with: cargo test --test domain_tests

use chrono::{Duration as ChronoDuration, Utc};
use scopesync::domain::{
    BudgetCategory, BudgetDraft, BudgetItem, Guest, GuestDraft, GuestFilters, PaymentMethod,
    PaymentStatus, RsvpStatus, Task, TaskBulkOperation, TaskCategory, TaskDraft, TaskFilters,
    TaskPatch, TaskPriority, TaskStatus, TemplateRequest, task_templates,
};
use scopesync::{
    EntityKind, Identity, InMemoryRemoteStore, LocalCache, RemoteStore, ScopeInit, SyncConfig,
    SyncEngine, SyncError,
};
use std::sync::Arc;
use std::time::Duration;

fn engine<T: EntityKind>(remote: &InMemoryRemoteStore) -> SyncEngine<T> {
    let remote: Arc<dyn RemoteStore> = Arc::new(remote.clone());
    SyncEngine::new(remote, LocalCache::in_memory(), &SyncConfig::default())
}

fn demo() -> ScopeInit {
    ScopeInit::new("demo", Identity::new("demo-user-id"))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not reached in time");
}

#[tokio::test]
async fn test_toggle_twice_restores_status() {
    let engine = engine::<Task>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let original = engine.get("demo-task-3").unwrap().unwrap();
    assert_eq!(original.fields.status, TaskStatus::Pending);

    engine.toggle_status("demo-task-3").await.unwrap();
    let first = engine.get("demo-task-3").unwrap().unwrap();
    assert_eq!(first.fields.status, TaskStatus::Completed);
    assert!(first.fields.completed_at.is_some());

    engine.toggle_status("demo-task-3").await.unwrap();
    let second = engine.get("demo-task-3").unwrap().unwrap();
    assert_eq!(second.fields.status, TaskStatus::Pending);
    assert!(second.fields.completed_at.is_none());
    assert!(second.updated_at() >= first.updated_at());
    assert!(first.updated_at() >= original.updated_at());
}

#[tokio::test]
async fn test_toggle_through_remote_round_trip() {
    let remote = InMemoryRemoteStore::new();
    let engine = engine::<Task>(&remote);
    engine
        .activate(ScopeInit::new("w1", Identity::new("u1")))
        .await
        .unwrap();

    let id = engine
        .create(TaskDraft::new("Book venue"))
        .await
        .unwrap()
        .value
        .id()
        .to_string();
    eventually(|| engine.get(&id).unwrap().is_some()).await;

    engine.toggle_status(&id).await.unwrap();
    eventually(|| engine.get(&id).unwrap().is_some_and(|t| t.fields.is_completed())).await;
    let first = engine.get(&id).unwrap().unwrap();

    engine.toggle_status(&id).await.unwrap();
    eventually(|| engine.get(&id).unwrap().is_some_and(|t| !t.fields.is_completed())).await;
    let second = engine.get(&id).unwrap().unwrap();

    assert!(second.fields.completed_at.is_none());
    assert!(second.updated_at() >= first.updated_at());
    let doc = remote.document("tasks", &id).unwrap().unwrap();
    assert!(!doc.fields.contains_key("completedAt"));
}

#[tokio::test]
async fn test_back_to_back_toggles_on_live_scope() {
    let remote = InMemoryRemoteStore::new();
    let engine = engine::<Task>(&remote);
    engine
        .activate(ScopeInit::new("w1", Identity::new("u1")))
        .await
        .unwrap();

    let id = engine
        .create(TaskDraft::new("Send invitations"))
        .await
        .unwrap()
        .value
        .id()
        .to_string();
    eventually(|| engine.get(&id).unwrap().is_some()).await;

    let first = engine.toggle_status(&id).await.unwrap();
    let second = engine.toggle_status(&id).await.unwrap();
    assert!(first.is_remote());
    assert!(second.is_remote());
    assert_eq!(engine.get(&id).unwrap().unwrap().fields.status, TaskStatus::Pending);

    eventually(|| {
        engine
            .entities()
            .unwrap()
            .iter()
            .any(|t| t.id() == id && t.fields.status == TaskStatus::Pending)
    })
    .await;
    let doc = remote.document("tasks", &id).unwrap().unwrap();
    assert_eq!(doc.fields.get("status").and_then(|v| v.as_str()), Some("pending"));
    assert!(!doc.fields.contains_key("completedAt"));
}

#[tokio::test]
async fn test_sort_order_follows_category() {
    let engine = engine::<Task>(&InMemoryRemoteStore::new());
    engine
        .activate(ScopeInit::new("plan", Identity::new("u1")).sandboxed())
        .await
        .unwrap();

    // Fixtures hold one venue task.
    let a = engine
        .create(TaskDraft::new("Visit castle").category(TaskCategory::Venue))
        .await
        .unwrap();
    let b = engine
        .create(TaskDraft::new("Visit barn").category(TaskCategory::Venue))
        .await
        .unwrap();
    let c = engine
        .create(TaskDraft::new("Plan seating").category(TaskCategory::Guests))
        .await
        .unwrap();
    assert_eq!(a.value.sort_order, Some(1));
    assert_eq!(b.value.sort_order, Some(2));
    assert_eq!(c.value.sort_order, Some(0));

    let venue = engine.tasks_by_category(TaskCategory::Venue).unwrap();
    let titles: Vec<_> = venue.iter().map(|t| t.fields.title.as_str()).collect();
    assert_eq!(titles, vec!["Book the venue", "Visit castle", "Visit barn"]);
}

#[tokio::test]
async fn test_templates_initialize_once() {
    let engine = engine::<Task>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let wedding = Utc::now() + ChronoDuration::weeks(60);
    let created = engine.initialize_from_templates(wedding).await.unwrap();
    let required = task_templates().iter().filter(|t| t.is_required).count();
    assert_eq!(created.len(), required);

    let first = created
        .iter()
        .find(|r| r.value.fields.template_id.as_deref() == Some("foundation-001"))
        .unwrap();
    assert_eq!(first.value.fields.due_date, Some(wedding - ChronoDuration::weeks(52)));
    assert!(first.value.fields.notes.is_some());

    let again = engine.initialize_from_templates(wedding).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_unknown_template_is_a_validation_error() {
    let engine = engine::<Task>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let err = engine
        .create_from_template(TemplateRequest::new("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn test_task_bulk_operations_and_filters() {
    let engine = engine::<Task>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let results = engine
        .bulk(TaskBulkOperation::Update(
            vec!["demo-task-3".to_string(), "demo-task-4".to_string()],
            TaskPatch::default().with_priority(TaskPriority::Urgent),
        ))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let urgent = engine
        .filtered_tasks(&TaskFilters {
            priority: vec![TaskPriority::Urgent],
            ..TaskFilters::default()
        })
        .unwrap();
    assert_eq!(urgent.len(), 2);

    engine
        .bulk(TaskBulkOperation::Complete(vec!["demo-task-3".to_string()]))
        .await
        .unwrap();
    let stats = engine.task_stats().unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.completion_rate, 60);

    engine
        .bulk(TaskBulkOperation::Delete(vec!["demo-task-1".to_string(), "demo-task-5".to_string()]))
        .await
        .unwrap();
    assert_eq!(engine.task_stats().unwrap().total, 3);
}

#[tokio::test]
async fn test_guest_rsvp_and_stats() {
    let engine = engine::<Guest>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let before = engine.guest_stats().unwrap();
    engine
        .update_rsvp("demo-guest-2", RsvpStatus::Attending)
        .await
        .unwrap();
    let guest = engine.get("demo-guest-2").unwrap().unwrap();
    assert_eq!(guest.fields.rsvp_status, RsvpStatus::Attending);
    assert!(guest.fields.rsvp_date.is_some());

    let after = engine.guest_stats().unwrap();
    assert_eq!(after.attending, before.attending + 1);
    assert_eq!(after.pending, before.pending - 1);

    assert!(engine.update_rsvp("missing", RsvpStatus::Declined).await.unwrap().is_skipped());

    let created = engine
        .create(GuestDraft::new("Karel", "Novy").email("karel@example.com").plus_one("Anna"))
        .await
        .unwrap();
    assert_eq!(created.value.sort_order, Some(4));
    let with_plus_one = engine
        .filtered_guests(&GuestFilters {
            has_plus_one: Some(true),
            ..GuestFilters::default()
        })
        .unwrap();
    assert_eq!(with_plus_one.len(), 3);

    let invalid = engine.create(GuestDraft::new("Karel", "Novy").email("karel@")).await;
    assert!(matches!(invalid, Err(SyncError::Validation(_))));
}

#[tokio::test]
async fn test_budget_payments_settle_items() {
    let engine = engine::<BudgetItem>(&InMemoryRemoteStore::new());
    engine.activate(demo()).await.unwrap();

    let item = engine.get("demo-budget-3").unwrap().unwrap();
    assert_eq!(item.fields.payment_status, PaymentStatus::Pending);

    engine
        .record_payment("demo-budget-3", 10_000.0, Some(PaymentMethod::Card), None)
        .await
        .unwrap();
    let partial = engine.get("demo-budget-3").unwrap().unwrap();
    assert_eq!(partial.fields.paid_amount, 10_000.0);
    assert_eq!(partial.fields.payment_status, PaymentStatus::Partial);

    engine
        .record_payment("demo-budget-3", 25_000.0, None, Some("final".to_string()))
        .await
        .unwrap();
    let paid = engine.get("demo-budget-3").unwrap().unwrap();
    assert_eq!(paid.fields.paid_amount, 35_000.0);
    assert_eq!(paid.fields.payments.len(), 2);
    assert_eq!(paid.fields.payment_status, PaymentStatus::Paid);
    assert!(paid.fields.paid_date.is_some());

    assert!(matches!(
        engine.record_payment("demo-budget-3", -5.0, None, None).await,
        Err(SyncError::Validation(_))
    ));

    let stats = engine.budget_stats().unwrap();
    assert_eq!(stats.paid_count, 2);
    assert_eq!(stats.total_paid, 150_000.0);
}

#[tokio::test]
async fn test_back_to_back_payments_on_live_scope() {
    let remote = InMemoryRemoteStore::new();
    let engine = engine::<BudgetItem>(&remote);
    engine
        .activate(ScopeInit::new("w1", Identity::new("u1")))
        .await
        .unwrap();

    let id = engine
        .create(BudgetDraft::new("Decorations", BudgetCategory::Decoration, 1_000.0).actual(1_000.0))
        .await
        .unwrap()
        .value
        .id()
        .to_string();
    eventually(|| engine.get(&id).unwrap().is_some()).await;

    engine.record_payment(&id, 100.0, None, None).await.unwrap();
    engine.record_payment(&id, 200.0, None, None).await.unwrap();

    let item = engine.get(&id).unwrap().unwrap();
    assert_eq!(item.fields.payments.len(), 2);
    assert_eq!(item.fields.paid_amount, 300.0);
    assert_eq!(item.fields.payment_status, PaymentStatus::Partial);

    eventually(|| {
        engine
            .entities()
            .unwrap()
            .iter()
            .any(|i| i.id() == id && i.fields.payments.len() == 2)
    })
    .await;
    let doc = remote.document("budgetItems", &id).unwrap().unwrap();
    assert_eq!(doc.fields.get("payments").and_then(|v| v.as_array()).map(Vec::len), Some(2));
    assert_eq!(doc.fields.get("paidAmount").and_then(|v| v.as_f64()), Some(300.0));
}

#[tokio::test]
async fn test_budget_items_round_trip_through_remote() {
    let remote = InMemoryRemoteStore::new();
    let engine = engine::<BudgetItem>(&remote);
    engine
        .activate(ScopeInit::new("w1", Identity::new("u1")))
        .await
        .unwrap();

    let created = engine
        .create(BudgetDraft::new("Rings", BudgetCategory::Rings, 20_000.0).actual(18_500.0))
        .await
        .unwrap();
    assert!(created.is_remote());
    let id = created.value.id().to_string();
    eventually(|| engine.get(&id).unwrap().is_some()).await;

    engine
        .record_payment(&id, 18_500.0, Some(PaymentMethod::Transfer), None)
        .await
        .unwrap();
    eventually(|| {
        engine
            .get(&id)
            .unwrap()
            .is_some_and(|item| item.fields.payment_status == PaymentStatus::Paid)
    })
    .await;
    assert_eq!(
        engine.items_by_category(BudgetCategory::Rings).unwrap().len(),
        1
    );
}
