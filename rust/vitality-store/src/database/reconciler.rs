//! Plan consistency reconciliation.
//!
//! Admin batch job restoring "exactly one active plan per owner" on the
//! hosted backend. Nothing on the write path enforces the invariant, so it can
//! drift whenever two plans are created concurrently.
//!
//! Within each owner's plans the newest wins. Recency is `created_at`, falling
//! back to `plan_data.generated_at`; plans with neither count as older than
//! any dated plan, and ties go to the lexicographically greater id.
//!
//! Writes are issued one plan at a time. A failed write is recorded and the
//! loop moves on. Only one run may be in flight per process; runs from
//! separate processes are not coordinated.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::remote::RemoteStore;
use crate::domain::{PlanStatus, PlanSummary};
use crate::error::{StoreError, StoreResult};
use crate::logging::{NoticeLog, OpTimer};

const COMPONENT: &str = "plan_reconciler";

/// A status write the reconciler wants to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub plan_id: String,
    pub owner_id: String,
    pub from: PlanStatus,
    pub to: PlanStatus,
}

/// A write that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub plan_id: String,
    pub owner_id: String,
    pub error: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Status writes that succeeded.
    pub updates_count: usize,
    /// Owners with at least one successful write.
    pub users_affected: usize,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line description for the admin screen.
    #[must_use]
    pub fn message(&self) -> String {
        let mut message = format!(
            "Fixed {} plan(s) across {} user(s)",
            self.updates_count, self.users_affected
        );
        if !self.failures.is_empty() {
            message.push_str(&format!("; {} update(s) failed", self.failures.len()));
        }
        message
    }
}

/// Newest first: dated before undated, then greater id first.
fn newest_first(a: &PlanSummary, b: &PlanSummary) -> Ordering {
    match (a.recency(), b.recency()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

/// Compute the writes needed to leave each owner with exactly one active
/// plan. Returns nothing when the plans are already consistent.
#[must_use]
pub fn plan_changes(plans: &[PlanSummary]) -> Vec<StatusChange> {
    let mut by_owner: BTreeMap<&str, Vec<&PlanSummary>> = BTreeMap::new();
    for plan in plans {
        by_owner.entry(plan.owner_id.as_str()).or_default().push(plan);
    }

    let mut changes = Vec::new();
    for (owner_id, mut group) in by_owner {
        group.sort_by(|a, b| newest_first(a, b));

        for (rank, plan) in group.into_iter().enumerate() {
            let target = if rank == 0 {
                PlanStatus::Active
            } else {
                PlanStatus::Inactive
            };
            if plan.status != target {
                changes.push(StatusChange {
                    plan_id: plan.id.clone(),
                    owner_id: owner_id.to_string(),
                    from: plan.status,
                    to: target,
                });
            }
        }
    }
    changes
}

/// Runs reconciliation and admin deletes against the hosted backend.
#[derive(Debug)]
pub struct PlanReconciler {
    remote: Arc<dyn RemoteStore>,
    running: Mutex<()>,
    notices: NoticeLog,
}

impl PlanReconciler {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, notices: NoticeLog) -> Self {
        Self {
            remote,
            running: Mutex::new(()),
            notices,
        }
    }

    /// Reconcile every owner's plans.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReconcileInProgress`] when another run is in
    /// flight, or the remote error when the plan list cannot be fetched.
    /// Individual write failures are reported in the summary instead.
    pub async fn run(&self) -> StoreResult<ReconcileSummary> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!("Plan reconciliation already running");
            return Err(StoreError::ReconcileInProgress);
        };

        let timer = OpTimer::new(COMPONENT, "run");
        let result = self.reconcile().await;
        timer.finish_with_result(result.as_ref());

        if let Ok(summary) = &result {
            self.notices.info(summary.message());
        }
        result
    }

    async fn reconcile(&self) -> StoreResult<ReconcileSummary> {
        let plans = self.remote.list_plan_summaries().await?;
        let changes = plan_changes(&plans);

        tracing::info!(
            plans = plans.len(),
            pending_updates = changes.len(),
            "Starting plan reconciliation"
        );

        let mut summary = ReconcileSummary::default();
        let mut affected: HashSet<String> = HashSet::new();

        for change in changes {
            match self.remote.update_plan_status(&change.plan_id, change.to).await {
                Ok(()) => {
                    tracing::debug!(
                        plan_id = %change.plan_id,
                        owner_id = %change.owner_id,
                        from = %change.from,
                        to = %change.to,
                        "Plan status corrected"
                    );
                    summary.updates_count += 1;
                    affected.insert(change.owner_id);
                }
                Err(e) => {
                    tracing::warn!(
                        plan_id = %change.plan_id,
                        owner_id = %change.owner_id,
                        error = %e,
                        "Plan status update failed, continuing"
                    );
                    summary.failures.push(ReconcileFailure {
                        plan_id: change.plan_id,
                        owner_id: change.owner_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.users_affected = affected.len();
        tracing::info!(
            updates = summary.updates_count,
            users_affected = summary.users_affected,
            failures = summary.failures.len(),
            "Plan reconciliation finished"
        );
        Ok(summary)
    }

    /// Hard-delete a plan, removing its progress rows first.
    ///
    /// # Errors
    ///
    /// Returns the remote error of whichever step failed. When the progress
    /// delete fails the plan is left untouched.
    pub async fn delete_plan(&self, plan_id: &str) -> StoreResult<()> {
        let timer = OpTimer::new(COMPONENT, "delete_plan");
        let result = self.cascade_delete(plan_id).await;
        timer.finish_with_result(result.as_ref());
        result
    }

    async fn cascade_delete(&self, plan_id: &str) -> StoreResult<()> {
        self.remote.delete_progress_for_plan(plan_id).await?;
        self.remote.delete_plan(plan_id).await?;
        tracing::info!(plan_id, "Plan deleted with its progress");
        Ok(())
    }
}
