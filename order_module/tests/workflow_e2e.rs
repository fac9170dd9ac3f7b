mod test_support;

use std::sync::atomic::Ordering;

use chrono::Duration;
use order_module::{extract, Action, Actor, Order, OrderKey, WorkflowError, WorkflowState};
use test_support::{at, notification_html, Harness};

fn order(notification_id: &str, order_number: &str, buyer: &str) -> Order {
    Order {
        source_notification_id: notification_id.to_string(),
        ..extract(&notification_html(order_number, buyer))
    }
}

fn actor(id: &str) -> Actor {
    Actor::new(id, id)
}

fn assign(key: &str, assignee_id: &str) -> Action {
    Action::AssignmentChosen {
        key: OrderKey::new(key),
        assignee_id: assignee_id.to_string(),
        actor: actor("staff-1"),
    }
}

fn commit(key: &str, hours: &str) -> Action {
    Action::HoursCommitted {
        key: OrderKey::new(key),
        hours_input: hours.to_string(),
        actor: actor("admin1"),
    }
}

fn complete(key: &str, actor_id: &str) -> Action {
    Action::MarkedComplete {
        key: OrderKey::new(key),
        actor: actor(actor_id),
    }
}

#[tokio::test]
async fn order_runs_from_detection_to_completion() {
    let harness = Harness::new();
    let engine = &harness.engine;
    let key = OrderKey::new("101");

    let detected = engine
        .ingest(order("101", "OD123456", "Budi"), at(9, 0))
        .await
        .expect("ingest");
    assert_eq!(detected.state, WorkflowState::Detected);
    assert_eq!(detected.order.buyer_name.as_deref(), Some("Budi"));
    assert!(detected.prompt.is_some());
    {
        let prompts = harness.renderer.assignment_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].1, vec!["admin1", "admin2", "admin3"]);
    }

    let assigned = engine
        .handle_at(assign("101", "admin1"), at(9, 5))
        .await
        .expect("assign");
    let instance = assigned.instance.expect("instance");
    assert_eq!(instance.state, WorkflowState::Assigned);
    assert_eq!(instance.assignee_id(), Some("admin1"));
    assert!(instance.work_prompt.is_some());
    assert!(assigned.message.contains("#admin1-orders"));
    assert!(assigned.notices.is_empty());
    assert_eq!(harness.renderer.marked_assigned.lock().unwrap().len(), 1);
    let view = engine.reconciler().last_view("admin1").expect("status view");
    assert_eq!(view.active_order_count, 1);
    assert_eq!(view.total_hours, 0);

    let committed = engine
        .handle_at(commit("101", "3"), at(10, 0))
        .await
        .expect("commit");
    let instance = committed.instance.expect("instance");
    assert_eq!(instance.state, WorkflowState::Committed);
    assert_eq!(instance.committed_hours, Some(3));
    assert_eq!(instance.commit_started_at, Some(at(10, 0)));
    assert_eq!(instance.expected_completion_at, Some(at(13, 0)));
    // 13:00 UTC shown at +07:00.
    assert!(committed.message.contains("19/10/2026 20:00"));
    assert_eq!(harness.renderer.updated_prompts.lock().unwrap().len(), 1);

    let completed = engine
        .handle_at(complete("101", "admin1"), at(12, 30))
        .await
        .expect("complete");
    let instance = completed.instance.expect("instance");
    assert_eq!(instance.state, WorkflowState::Completed);
    assert_eq!(instance.completed_by.as_deref(), Some("admin1"));
    assert!(instance.work_prompt.is_none());

    let entries = harness.ledger.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].admin_id, "admin1");
    assert_eq!(entries[0].order_number.as_deref(), Some("OD123456"));
    assert_eq!(entries[0].hours, 3);
    assert_eq!(entries[0].timestamp, at(12, 30));
    assert_eq!(harness.ledger.total_hours("admin1").expect("total"), 3);
    assert_eq!(harness.renderer.summaries.lock().unwrap().len(), 1);

    let view = engine.reconciler().last_view("admin1").expect("status view");
    assert_eq!(view.active_order_count, 0);
    assert_eq!(view.total_hours, 3);
    assert_eq!(
        engine.snapshot(&key).await.map(|instance| instance.state),
        Some(WorkflowState::Completed)
    );
}

#[tokio::test]
async fn out_of_range_hours_are_rejected_without_side_effects() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("102", "OD200", "Ani"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("102", "admin2"), at(9, 1))
        .await
        .expect("assign");

    for input in ["30", "0", "2.5", "abc", ""] {
        let err = engine
            .handle_at(commit("102", input), at(9, 2))
            .await
            .expect_err("invalid hours");
        assert!(matches!(err, WorkflowError::Validation(_)), "{input}: {err}");
    }

    let instance = engine.snapshot(&OrderKey::new("102")).await.expect("tracked");
    assert_eq!(instance.state, WorkflowState::Assigned);
    assert_eq!(instance.committed_hours, None);
    assert!(harness.ledger.entries().expect("entries").is_empty());
}

#[tokio::test]
async fn concurrent_completion_records_exactly_one_entry() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("103", "OD300", "Citra"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("103", "admin1"), at(9, 1))
        .await
        .expect("assign");
    engine
        .handle_at(commit("103", "2"), at(9, 2))
        .await
        .expect("commit");

    let (first, second) = tokio::join!(
        engine.handle_at(complete("103", "admin1"), at(10, 0)),
        engine.handle_at(complete("103", "admin2"), at(10, 0)),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let conflict = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .expect("one rejection");
    assert!(matches!(conflict, WorkflowError::Conflict(_)));
    assert!(conflict.user_message().contains("already completed"));

    let entries = harness.ledger.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].hours, 2);
}

#[tokio::test]
async fn second_assignment_is_a_conflict() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("104", "OD400", "Dewi"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("104", "admin1"), at(9, 1))
        .await
        .expect("assign");

    let err = engine
        .handle_at(assign("104", "admin2"), at(9, 2))
        .await
        .expect_err("reassign");
    assert!(matches!(err, WorkflowError::Conflict(_)));
    assert!(err.user_message().contains("admin1"));

    let instance = engine.snapshot(&OrderKey::new("104")).await.expect("tracked");
    assert_eq!(instance.assignee_id(), Some("admin1"));
    assert_eq!(harness.renderer.open_prompts_for("admin2"), 0);
}

#[tokio::test]
async fn completing_before_commit_is_a_conflict() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("105", "OD500", "Eka"), at(9, 0))
        .await
        .expect("ingest");

    let err = engine
        .handle_at(complete("105", "admin1"), at(9, 1))
        .await
        .expect_err("not committed");
    assert!(matches!(err, WorkflowError::Conflict(_)));
    assert!(harness.ledger.entries().expect("entries").is_empty());
}

#[tokio::test]
async fn failed_work_prompt_leaves_order_detected() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("106", "OD600", "Fajar"), at(9, 0))
        .await
        .expect("ingest");
    harness
        .renderer
        .fail_work_prompt
        .store(true, Ordering::SeqCst);

    let err = engine
        .handle_at(assign("106", "admin1"), at(9, 1))
        .await
        .expect_err("transport");
    assert!(matches!(err, WorkflowError::Transport(_)));
    assert!(err.is_retryable());

    let instance = engine.snapshot(&OrderKey::new("106")).await.expect("tracked");
    assert_eq!(instance.state, WorkflowState::Detected);
    assert!(instance.assignee.is_none());

    harness
        .renderer
        .fail_work_prompt
        .store(false, Ordering::SeqCst);
    let retried = engine
        .handle_at(assign("106", "admin1"), at(9, 2))
        .await
        .expect("retry");
    assert_eq!(
        retried.instance.map(|instance| instance.state),
        Some(WorkflowState::Assigned)
    );
}

#[tokio::test]
async fn unrendered_assignment_prompt_is_republished() {
    let harness = Harness::new();
    let engine = &harness.engine;
    harness
        .renderer
        .fail_assignment_prompt
        .store(true, Ordering::SeqCst);

    let instance = engine
        .ingest(order("107", "OD700", "Gita"), at(9, 0))
        .await
        .expect("ingest keeps the order");
    assert!(instance.prompt.is_none());
    assert_eq!(engine.instance_count(), 1);
    assert_eq!(engine.republish_pending().await, 0);

    harness
        .renderer
        .fail_assignment_prompt
        .store(false, Ordering::SeqCst);
    assert_eq!(engine.republish_pending().await, 1);
    assert_eq!(engine.republish_pending().await, 0);
    assert_eq!(harness.renderer.assignment_prompt_count(), 1);
    let instance = engine.snapshot(&OrderKey::new("107")).await.expect("tracked");
    assert!(instance.prompt.is_some());
}

#[tokio::test]
async fn duplicate_notification_is_not_tracked_twice() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("108", "OD800", "Hadi"), at(9, 0))
        .await
        .expect("ingest");

    let err = engine
        .ingest(order("108", "OD800", "Hadi"), at(9, 1))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, WorkflowError::Conflict(_)));
    assert_eq!(engine.instance_count(), 1);
    assert_eq!(harness.renderer.assignment_prompt_count(), 1);
}

#[tokio::test]
async fn status_refresh_failure_keeps_last_view() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("109", "OD900", "Indah"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("109", "admin3"), at(9, 1))
        .await
        .expect("assign");
    let before = engine.reconciler().last_view("admin3").expect("view");

    harness.renderer.fail_status.store(true, Ordering::SeqCst);
    let outcome = engine
        .handle_at(
            Action::RefreshStatus {
                admin_id: Some("admin3".to_string()),
            },
            at(11, 0),
        )
        .await
        .expect("refresh is best-effort");
    assert_eq!(outcome.notices.len(), 1);
    assert!(outcome.reply_text().contains("could not be refreshed"));
    assert_eq!(engine.reconciler().last_view("admin3"), Some(before.clone()));

    // A failed refresh after a commit still leaves the commit applied.
    let committed = engine
        .handle_at(commit("109", "4"), at(11, 5))
        .await
        .expect("commit");
    assert_eq!(committed.notices.len(), 1);
    assert_eq!(
        committed.instance.map(|instance| instance.state),
        Some(WorkflowState::Committed)
    );
    assert_eq!(engine.reconciler().last_view("admin3"), Some(before));
}

#[tokio::test]
async fn registered_admins_replace_fallback_assignees() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .handle(Action::AddAdmin {
            id: "5550001".to_string(),
            display_name: "Rina".to_string(),
        })
        .await
        .expect("add admin");

    engine
        .ingest(order("110", "OD1000", "Joko"), at(9, 0))
        .await
        .expect("ingest");
    {
        let prompts = harness.renderer.assignment_prompts.lock().unwrap();
        assert_eq!(prompts[0].1, vec!["5550001"]);
    }

    let err = engine
        .handle_at(assign("110", "admin1"), at(9, 1))
        .await
        .expect_err("not an admin");
    assert!(matches!(err, WorkflowError::Validation(_)));

    let outcome = engine
        .handle_at(assign("110", "5550001"), at(9, 2))
        .await
        .expect("assign");
    assert!(outcome.message.contains("Rina"));
}

#[tokio::test]
async fn admin_commands_manage_the_ledger() {
    let harness = Harness::new();
    let engine = &harness.engine;

    let added = engine
        .handle(Action::AddAdmin {
            id: "42".to_string(),
            display_name: "Sari".to_string(),
        })
        .await
        .expect("add");
    assert_eq!(added.message, "Sari added as admin.");
    let renamed = engine
        .handle(Action::AddAdmin {
            id: "42".to_string(),
            display_name: "Sari D".to_string(),
        })
        .await
        .expect("rename");
    assert!(renamed.message.contains("renamed"));

    let err = engine
        .handle(Action::AddAdmin {
            id: "  ".to_string(),
            display_name: "Nobody".to_string(),
        })
        .await
        .expect_err("empty id");
    assert!(matches!(err, WorkflowError::Validation(_)));

    let listed = engine.handle(Action::ListAdmins).await.expect("list");
    assert!(listed.message.contains("Sari D (42)"));

    let backup = engine.handle_at(Action::Backup, at(8, 0)).await.expect("backup");
    assert!(backup.message.starts_with("Backup "));

    let removed = engine
        .handle(Action::RemoveAdmin {
            id: "42".to_string(),
        })
        .await
        .expect("remove");
    assert_eq!(removed.message, "Sari D is no longer an admin.");
    assert!(harness.ledger.admins().expect("admins").is_empty());

    let restored = engine.handle(Action::Restore).await.expect("restore");
    assert!(restored.message.starts_with("Ledger restored"));
    assert_eq!(harness.ledger.admins().expect("admins").len(), 1);
}

#[tokio::test]
async fn total_hours_reports_every_assignee() {
    let harness = Harness::new();
    let engine = &harness.engine;
    for (key, assignee, hours) in [("111", "admin1", "2"), ("112", "admin2", "5")] {
        engine
            .ingest(order(key, &format!("OD{key}"), "Kiki"), at(9, 0))
            .await
            .expect("ingest");
        engine
            .handle_at(assign(key, assignee), at(9, 1))
            .await
            .expect("assign");
        engine
            .handle_at(commit(key, hours), at(9, 2))
            .await
            .expect("commit");
        engine
            .handle_at(complete(key, assignee), at(10, 0))
            .await
            .expect("complete");
    }

    let all = engine
        .handle(Action::TotalHours { admin_id: None })
        .await
        .expect("totals");
    assert!(all.message.contains("admin1: 2h"));
    assert!(all.message.contains("admin2: 5h"));

    let one = engine
        .handle(Action::TotalHours {
            admin_id: Some("admin2".to_string()),
        })
        .await
        .expect("total");
    assert_eq!(one.message, "admin2 has 5 completed hour(s).");
}

#[tokio::test]
async fn purge_and_cleanup_validate_their_arguments() {
    let harness = Harness::new();
    let engine = &harness.engine;

    for count in [0, 101, -3] {
        let err = engine
            .handle(Action::Purge {
                channel_id: 77,
                count,
            })
            .await
            .expect_err("count out of range");
        assert!(matches!(err, WorkflowError::Validation(_)));
    }
    assert!(harness.renderer.purged.lock().unwrap().is_empty());

    let purged = engine
        .handle(Action::Purge {
            channel_id: 77,
            count: 100,
        })
        .await
        .expect("purge");
    assert_eq!(purged.message, "Deleted 100 message(s).");
    assert_eq!(*harness.renderer.purged.lock().unwrap(), vec![(77, 100)]);

    let err = engine
        .handle(Action::Cleanup { days: 0 })
        .await
        .expect_err("zero days");
    assert!(matches!(err, WorkflowError::Validation(_)));

    engine
        .ingest(order("113", "OD1300", "Lina"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("113", "admin1"), at(9, 1))
        .await
        .expect("assign");
    engine
        .handle_at(commit("113", "1"), at(9, 2))
        .await
        .expect("commit");
    engine
        .handle_at(complete("113", "admin1"), at(10, 0))
        .await
        .expect("complete");

    let kept = engine
        .handle_at(Action::Cleanup { days: 1 }, at(10, 0) + Duration::hours(12))
        .await
        .expect("cleanup");
    assert!(kept.message.starts_with("Removed 0 entries"));
    let removed = engine
        .handle_at(Action::Cleanup { days: 1 }, at(10, 0) + Duration::days(2))
        .await
        .expect("cleanup");
    assert!(removed.message.starts_with("Removed 1 entry"));
    assert!(harness.ledger.entries().expect("entries").is_empty());
}

#[tokio::test]
async fn unknown_order_is_reported() {
    let harness = Harness::new();
    let err = harness
        .engine
        .handle_at(assign("999", "admin1"), at(9, 0))
        .await
        .expect_err("unknown");
    assert!(matches!(err, WorkflowError::UnknownOrder(_)));
    assert!(err.user_message().contains("999"));
}

#[tokio::test]
async fn completed_orders_are_pruned_after_retention() {
    let harness = Harness::new();
    let engine = &harness.engine;
    engine
        .ingest(order("114", "OD1400", "Maya"), at(9, 0))
        .await
        .expect("ingest");
    engine
        .handle_at(assign("114", "admin1"), at(9, 1))
        .await
        .expect("assign");
    engine
        .handle_at(commit("114", "1"), at(9, 2))
        .await
        .expect("commit");
    engine
        .handle_at(complete("114", "admin1"), at(10, 0))
        .await
        .expect("complete");

    assert_eq!(engine.prune_completed(at(10, 0) + Duration::hours(23)), 0);
    assert_eq!(engine.prune_completed(at(10, 0) + Duration::hours(25)), 1);
    assert_eq!(engine.instance_count(), 0);

    let err = engine
        .handle_at(complete("114", "admin1"), at(11, 0))
        .await
        .expect_err("pruned");
    assert!(matches!(err, WorkflowError::UnknownOrder(_)));
}
