//! Plan reconciliation against the in-memory backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Map;
use vitality_store::database::{InMemoryRemoteStore, PlanReconciler, RemoteStore};
use vitality_store::domain::{
    DailyProgress, GenerationMethod, Plan, PlanDay, PlanStatus, PlanTask,
};
use vitality_store::error::{RemoteError, StoreError};
use vitality_store::logging::NoticeLog;

fn plan(id: &str, owner: &str, status: PlanStatus, age_days: Option<i64>) -> Plan {
    let days = (1..=30)
        .map(|day| PlanDay {
            day,
            tasks: vec![PlanTask {
                id: format!("{id}-d{day}"),
                title: "Stretch".to_string(),
                kind: "exercise".to_string(),
            }],
            extra: Map::new(),
        })
        .collect();

    let mut plan = Plan::new(owner, GenerationMethod::Algorithm, days);
    plan.id = id.to_string();
    plan.status = status;
    plan.created_at = age_days.map(|age| Utc::now() - Duration::days(age));
    plan.plan_data.generated_at = None;
    plan
}

fn setup(plans: Vec<Plan>) -> (PlanReconciler, Arc<InMemoryRemoteStore>) {
    let remote = Arc::new(InMemoryRemoteStore::new());
    for p in plans {
        remote.seed_plan(p);
    }
    let reconciler = PlanReconciler::new(remote.clone(), NoticeLog::default());
    (reconciler, remote)
}

fn active_count(remote: &InMemoryRemoteStore, owner: &str) -> usize {
    remote
        .plans()
        .iter()
        .filter(|p| p.owner_id == owner && p.status == PlanStatus::Active)
        .count()
}

#[tokio::test]
async fn test_newer_active_plan_wins() {
    let (reconciler, remote) = setup(vec![
        plan("A", "ana", PlanStatus::Active, Some(10)),
        plan("B", "ana", PlanStatus::Active, Some(1)),
    ]);

    let summary = reconciler.run().await.expect("run");
    assert_eq!(summary.updates_count, 1);
    assert_eq!(summary.users_affected, 1);
    assert!(summary.is_clean());

    assert_eq!(remote.plan("A").expect("A").status, PlanStatus::Inactive);
    assert_eq!(remote.plan("B").expect("B").status, PlanStatus::Active);
}

#[tokio::test]
async fn test_second_run_writes_nothing() {
    let (reconciler, remote) = setup(vec![
        plan("A", "ana", PlanStatus::Active, Some(3)),
        plan("B", "ana", PlanStatus::Active, Some(2)),
        plan("C", "ana", PlanStatus::Active, Some(1)),
        plan("D", "bo", PlanStatus::Pending, Some(5)),
        plan("E", "cy", PlanStatus::Active, None),
    ]);

    let first = reconciler.run().await.expect("first run");
    assert_eq!(first.updates_count, 3);
    assert_eq!(first.users_affected, 2);
    let writes_after_first = remote.status_update_count();

    let second = reconciler.run().await.expect("second run");
    assert_eq!(second.updates_count, 0);
    assert_eq!(second.users_affected, 0);
    assert_eq!(remote.status_update_count(), writes_after_first);

    for owner in ["ana", "bo", "cy"] {
        assert_eq!(active_count(&remote, owner), 1, "owner {owner}");
    }
}

/// A server row cap must not hide the newest plan from the scan.
#[tokio::test]
async fn test_capped_backend_is_scanned_page_by_page() {
    let (reconciler, remote) = setup(vec![
        plan("a-older", "ana", PlanStatus::Inactive, Some(20)),
        plan("b-newer", "ana", PlanStatus::Active, Some(1)),
        plan("c-only", "bo", PlanStatus::Active, Some(3)),
        plan("d-stale", "cy", PlanStatus::Active, Some(9)),
        plan("e-fresh", "cy", PlanStatus::Active, Some(2)),
    ]);
    remote.set_max_rows(Some(1));

    let summary = reconciler.run().await.expect("run");
    assert_eq!(summary.updates_count, 1);
    assert_eq!(summary.users_affected, 1);

    assert_eq!(remote.plan("a-older").expect("a").status, PlanStatus::Inactive);
    assert_eq!(remote.plan("b-newer").expect("b").status, PlanStatus::Active);
    assert_eq!(remote.plan("d-stale").expect("d").status, PlanStatus::Inactive);
    for owner in ["ana", "bo", "cy"] {
        assert_eq!(active_count(&remote, owner), 1, "owner {owner}");
    }
}

#[tokio::test]
async fn test_failed_write_does_not_stop_the_run() {
    let (reconciler, remote) = setup(vec![
        plan("A1", "ana", PlanStatus::Active, Some(2)),
        plan("A2", "ana", PlanStatus::Active, Some(1)),
        plan("B1", "bo", PlanStatus::Active, Some(2)),
        plan("B2", "bo", PlanStatus::Active, Some(1)),
    ]);
    remote.fail_status_updates_for("A1");

    let summary = reconciler.run().await.expect("run");
    assert_eq!(summary.updates_count, 1);
    assert_eq!(summary.users_affected, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].plan_id, "A1");
    assert_eq!(summary.failures[0].owner_id, "ana");

    assert_eq!(remote.plan("B1").expect("B1").status, PlanStatus::Inactive);
    assert_eq!(remote.plan("A1").expect("A1").status, PlanStatus::Active);
}

#[tokio::test]
async fn test_fetch_failure_aborts_the_run() {
    let (reconciler, remote) = setup(vec![plan("A", "ana", PlanStatus::Active, Some(1))]);
    remote.fail_requests(Some(RemoteError::Network("offline".to_string())));

    let err = reconciler.run().await.expect_err("fetch fails");
    assert!(matches!(err, StoreError::Remote(RemoteError::Network(_))));
}

#[tokio::test]
async fn test_run_posts_a_notice() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.seed_plan(plan("A", "ana", PlanStatus::Active, Some(2)));
    remote.seed_plan(plan("B", "ana", PlanStatus::Active, Some(1)));
    let notices = NoticeLog::default();
    let reconciler = PlanReconciler::new(remote, notices.clone());

    reconciler.run().await.expect("run");
    let drained = notices.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].message, "Fixed 1 plan(s) across 1 user(s)");
}

#[tokio::test]
async fn test_delete_plan_removes_progress_first() {
    let (reconciler, remote) = setup(vec![plan("A", "ana", PlanStatus::Completed, Some(40))]);
    for day in 1..=3 {
        let mut progress = DailyProgress::new("A", day);
        progress.set_task(format!("A-d{day}"), true, Utc::now());
        remote.upsert_progress(&progress).await.expect("progress");
    }
    assert_eq!(remote.progress_row_count("A"), 3);

    // Deleting the parent directly is refused while children exist
    assert!(remote.delete_plan("A").await.is_err());

    reconciler.delete_plan("A").await.expect("cascade delete");
    assert!(remote.plan("A").is_none());
    assert_eq!(remote.progress_row_count("A"), 0);
}

#[tokio::test]
async fn test_delete_plan_leaves_parent_when_children_fail() {
    let (reconciler, remote) = setup(vec![plan("A", "ana", PlanStatus::Inactive, Some(5))]);
    remote.fail_requests(Some(RemoteError::Network("offline".to_string())));

    assert!(reconciler.delete_plan("A").await.is_err());

    remote.fail_requests(None);
    assert!(remote.plan("A").is_some());
}
