//! Unified data service.
//!
//! The single entry point the application uses for persistence. Every call
//! decides afresh whether to talk to the hosted backend or the local store:
//!
//! - a signed-in session routes to the [`RemoteStore`]; remote failures are
//!   returned to the caller, never retried locally
//! - no session, no backend, or a failed session check (under
//!   [`AuthCheckPolicy::FailOpenToLocal`]) routes to the [`LocalStore`], with
//!   every payload sealed by [`encryption`](super::encryption)
//!
//! A full local store does not fail the call: the write is skipped and the
//! caller gets [`SaveOutcome::LocalDegraded`] plus a notice in the
//! [`NoticeLog`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::encryption::{self, decrypt, decrypt_as, encrypt};
use super::local::{keys, LocalStore};
use super::remote::RemoteStore;
use super::schema;
use crate::domain::{
    inventory_status, DailyProgress, IntakeRecord, InventoryItem, InventoryProjection, Plan,
    PlanStatus,
};
use crate::error::{LocalStoreError, StoreError, StoreResult, ValidationError};
use crate::logging::{NoticeLog, OpTimer};

const COMPONENT: &str = "data_service";

/// What to do when the session check itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthCheckPolicy {
    /// Keep the user working on local data.
    #[default]
    FailOpenToLocal,
    /// Surface the session error to the caller.
    FailClosed,
}

/// Where a call is routed, and on whose behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Remote { user_id: String },
    Local { owner_id: String },
}

impl StorageMode {
    /// The id that owns the data in this mode.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        match self {
            Self::Remote { user_id } => user_id,
            Self::Local { owner_id } => owner_id,
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// How a write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored on the hosted backend.
    Remote,
    /// Encrypted and stored locally.
    Local,
    /// The local store was full; nothing was written and the previous value
    /// is intact.
    LocalDegraded { warning: String },
}

impl SaveOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::LocalDegraded { .. })
    }
}

/// A written value together with where it went.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved<T> {
    pub value: T,
    pub outcome: SaveOutcome,
}

/// One inventory item with its depletion forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryReportLine {
    #[serde(flatten)]
    pub item: InventoryItem,
    #[serde(flatten)]
    pub projection: InventoryProjection,
}

/// Local shape of `plan_progress`: one plan, task toggles per day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalProgress {
    plan_id: String,
    #[serde(default)]
    days: BTreeMap<u8, BTreeMap<String, bool>>,
    #[serde(default)]
    last_task_completed_at: BTreeMap<u8, DateTime<Utc>>,
}

impl LocalProgress {
    fn for_plan(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            ..Self::default()
        }
    }

    fn day(&self, day_number: u8) -> DailyProgress {
        let mut progress = DailyProgress::new(&self.plan_id, day_number);
        if let Some(tasks) = self.days.get(&day_number) {
            progress.completed_tasks.clone_from(tasks);
        }
        progress.last_task_completed_at = self.last_task_completed_at.get(&day_number).copied();
        progress.recount();
        progress
    }

    fn store_day(&mut self, progress: &DailyProgress) {
        self.days
            .insert(progress.day_number, progress.completed_tasks.clone());
        if let Some(at) = progress.last_task_completed_at {
            self.last_task_completed_at.insert(progress.day_number, at);
        }
    }

    fn to_rows(&self) -> Vec<DailyProgress> {
        self.days.keys().map(|day| self.day(*day)).collect()
    }
}

#[derive(Debug, Deserialize)]
struct MockSession {
    user_id: String,
}

/// Persistence facade shared by the whole application.
#[derive(Debug, Clone)]
pub struct DataService {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    policy: AuthCheckPolicy,
    mock_session: bool,
    notices: NoticeLog,
}

impl DataService {
    /// Build a service over `local` and, when configured, `remote`.
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        notices: NoticeLog,
    ) -> Self {
        Self {
            local,
            remote,
            policy: AuthCheckPolicy::default(),
            mock_session: false,
            notices,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AuthCheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Honour a development `mock_session` entry in local mode.
    #[must_use]
    pub fn with_mock_session(mut self, enabled: bool) -> Self {
        self.mock_session = enabled;
        self
    }

    #[must_use]
    pub fn policy(&self) -> AuthCheckPolicy {
        self.policy
    }

    #[must_use]
    pub fn notices(&self) -> &NoticeLog {
        &self.notices
    }

    // ========================================================================
    // Mode resolution
    // ========================================================================

    /// Decide where the current call goes. Never cached between calls.
    ///
    /// # Errors
    ///
    /// Fails when the local owner id cannot be read or created, or when the
    /// session check fails under [`AuthCheckPolicy::FailClosed`].
    pub async fn resolve_mode(&self) -> StoreResult<StorageMode> {
        let Some(remote) = &self.remote else {
            return self.local_mode();
        };

        match remote.current_user().await {
            Ok(Some(user_id)) => Ok(StorageMode::Remote { user_id }),
            Ok(None) => self.local_mode(),
            Err(e) => match self.policy {
                AuthCheckPolicy::FailOpenToLocal => {
                    tracing::warn!(
                        error = %e,
                        "Session check failed, continuing with local storage"
                    );
                    self.local_mode()
                }
                AuthCheckPolicy::FailClosed => Err(e.into()),
            },
        }
    }

    fn local_mode(&self) -> StoreResult<StorageMode> {
        Ok(StorageMode::Local {
            owner_id: self.local_owner_id()?,
        })
    }

    /// Best-known owner for local data: the mock session user when enabled,
    /// otherwise a persisted anonymous id.
    ///
    /// # Errors
    ///
    /// Fails when the local store cannot be read or the new id cannot be
    /// written.
    pub fn local_owner_id(&self) -> StoreResult<String> {
        if self.mock_session {
            if let Some(raw) = self.local.get(keys::MOCK_SESSION)? {
                match serde_json::from_str::<MockSession>(&raw) {
                    Ok(session) if !session.user_id.trim().is_empty() => {
                        return Ok(session.user_id);
                    }
                    Ok(_) => tracing::warn!("Mock session has an empty user id, ignoring it"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Mock session entry is malformed, ignoring it");
                    }
                }
            }
        }

        if let Some(id) = self.local.get(keys::ANONYMOUS_ID)? {
            if !id.trim().is_empty() {
                return Ok(id);
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.local.set(keys::ANONYMOUS_ID, &id)?;
        tracing::info!(owner_id = %id, "Created anonymous owner id");
        Ok(id)
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Store the owner's questionnaire answers, replacing earlier ones.
    ///
    /// # Errors
    ///
    /// Fails on invalid answers, remote failures, encryption failures, or a
    /// broken local store. A full local store is reported through
    /// [`SaveOutcome::LocalDegraded`] instead.
    pub async fn save_intake(&self, answers: Map<String, Value>) -> StoreResult<SaveOutcome> {
        timed("save_intake", async {
            schema::validate_intake(&answers)?;

            match self.resolve_mode().await? {
                StorageMode::Remote { user_id } => {
                    let record = IntakeRecord::new(user_id, answers);
                    self.remote()?.upsert_intake(&record).await?;
                    Ok(SaveOutcome::Remote)
                }
                StorageMode::Local { owner_id } => {
                    let record = IntakeRecord::new(&owner_id, answers);
                    self.write_sealed(keys::INTAKE_DATA, &record, &owner_id)
                }
            }
        })
        .await
    }

    /// The owner's answers, `None` when absent or unreadable.
    ///
    /// # Errors
    ///
    /// Fails on remote failures or a broken local store.
    pub async fn get_intake(&self) -> StoreResult<Option<IntakeRecord>> {
        timed("get_intake", async {
            match self.resolve_mode().await? {
                StorageMode::Remote { user_id } => Ok(self.remote()?.get_intake(&user_id).await?),
                StorageMode::Local { owner_id } => {
                    let Some(raw) = self.local.get(keys::INTAKE_DATA)? else {
                        return Ok(None);
                    };
                    Ok(decrypt(&raw, Some(&owner_id))
                        .and_then(|value| intake_from_value(value, &owner_id)))
                }
            }
        })
        .await
    }

    // ========================================================================
    // Plans
    // ========================================================================

    /// Store a newly generated plan as the owner's current plan.
    ///
    /// The plan is re-owned by whoever the call resolves to. The previous plan
    /// is moved out of the way: deactivated remotely when the new plan is
    /// itself active, or moved into the local archive.
    ///
    /// # Errors
    ///
    /// Fails on an invalid plan, remote failures, encryption failures, or a
    /// broken local store.
    pub async fn save_plan(&self, mut plan: Plan) -> StoreResult<Saved<Plan>> {
        timed("save_plan", async {
            schema::validate_plan(&plan)?;

            match self.resolve_mode().await? {
                StorageMode::Remote { user_id } => {
                    plan.owner_id = user_id;
                    let remote = self.remote()?;
                    // A plan that is not active yet leaves the current one in place
                    let previous = if plan.status == PlanStatus::Active {
                        remote.get_active_plan(&plan.owner_id).await?
                    } else {
                        None
                    };
                    let stored = remote.insert_plan(&plan).await?;

                    if let Some(previous) = previous.filter(|p| p.id != stored.id) {
                        // The reconciler settles it if this write is lost
                        if let Err(e) = remote
                            .update_plan_status(&previous.id, PlanStatus::Inactive)
                            .await
                        {
                            tracing::warn!(
                                plan_id = %previous.id,
                                error = %e,
                                "Failed to deactivate previous plan"
                            );
                        }
                    }

                    Ok(Saved {
                        value: stored,
                        outcome: SaveOutcome::Remote,
                    })
                }
                StorageMode::Local { owner_id } => {
                    plan.owner_id.clone_from(&owner_id);
                    if plan.created_at.is_none() {
                        plan.created_at = Some(Utc::now());
                    }
                    let outcome = self.write_local_plan(&plan, &owner_id)?;
                    Ok(Saved {
                        value: plan,
                        outcome,
                    })
                }
            }
        })
        .await
    }

    fn write_local_plan(&self, plan: &Plan, owner_id: &str) -> StoreResult<SaveOutcome> {
        let previous: Option<Plan> = self.read_sealed(keys::GENERATED_PLAN, owner_id)?;

        let Some(mut previous) = previous.filter(|p| p.id != plan.id) else {
            return self.write_sealed(keys::GENERATED_PLAN, plan, owner_id);
        };

        if previous.status == PlanStatus::Active {
            previous.status = PlanStatus::Inactive;
        }
        let archive_raw = self.local.get(keys::PLAN_ARCHIVE)?;
        let mut archive: Vec<Plan> = archive_raw
            .as_deref()
            .and_then(|raw| decrypt_as(raw, Some(owner_id)))
            .unwrap_or_default();
        archive.retain(|p| p.id != previous.id);
        archive.push(previous);

        // Both keys change together or neither does
        let outcome = self.write_sealed(keys::PLAN_ARCHIVE, &archive, owner_id)?;
        if outcome.is_degraded() {
            return Ok(outcome);
        }
        let result = self.write_sealed(keys::GENERATED_PLAN, plan, owner_id);
        if !matches!(result, Ok(SaveOutcome::Local)) {
            self.restore_raw(keys::PLAN_ARCHIVE, archive_raw.as_deref());
        }
        result
    }

    /// Put back a value captured before a multi-key write.
    fn restore_raw(&self, key: &str, raw: Option<&str>) {
        let restored = match raw {
            Some(raw) => self.local.set(key, raw),
            None => self.local.remove(key),
        };
        match restored {
            Ok(()) => tracing::debug!(key, "Rolled back partial local write"),
            Err(e) => tracing::error!(key, error = %e, "Failed to roll back partial local write"),
        }
    }

    /// The owner's active plan.
    ///
    /// # Errors
    ///
    /// Fails on remote failures or a broken local store.
    pub async fn get_active_plan(&self) -> StoreResult<Option<Plan>> {
        timed("get_active_plan", async {
            match self.resolve_mode().await? {
                StorageMode::Remote { user_id } => {
                    Ok(self.remote()?.get_active_plan(&user_id).await?)
                }
                StorageMode::Local { owner_id } => {
                    let plan: Option<Plan> = self.read_sealed(keys::GENERATED_PLAN, &owner_id)?;
                    Ok(plan.filter(|p| p.status == PlanStatus::Active))
                }
            }
        })
        .await
    }

    /// Superseded plans, newest first.
    ///
    /// # Errors
    ///
    /// Fails on remote failures or a broken local store.
    pub async fn get_archived_plans(&self) -> StoreResult<Vec<Plan>> {
        timed("get_archived_plans", async {
            match self.resolve_mode().await? {
                StorageMode::Remote { user_id } => {
                    Ok(self.remote()?.list_archived_plans(&user_id).await?)
                }
                StorageMode::Local { owner_id } => {
                    let mut archive: Vec<Plan> = self
                        .read_sealed(keys::PLAN_ARCHIVE, &owner_id)?
                        .unwrap_or_default();
                    archive.sort_by(|a, b| {
                        b.recency()
                            .cmp(&a.recency())
                            .then_with(|| b.id.cmp(&a.id))
                    });
                    Ok(archive)
                }
            }
        })
        .await
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Every recorded day of `plan_id`, ordered by day.
    ///
    /// # Errors
    ///
    /// Fails on remote failures or a broken local store.
    pub async fn get_progress(&self, plan_id: &str) -> StoreResult<Vec<DailyProgress>> {
        timed("get_progress", async {
            match self.resolve_mode().await? {
                StorageMode::Remote { .. } => Ok(self.remote()?.list_progress(plan_id).await?),
                StorageMode::Local { owner_id } => {
                    let progress: Option<LocalProgress> =
                        self.read_sealed(keys::PLAN_PROGRESS, &owner_id)?;
                    Ok(progress
                        .filter(|p| p.plan_id == plan_id)
                        .map(|p| p.to_rows())
                        .unwrap_or_default())
                }
            }
        })
        .await
    }

    /// Toggle one task and return the day's updated row.
    ///
    /// # Errors
    ///
    /// Fails on an invalid day or task, a plan that is not the current local
    /// plan, remote failures, encryption failures, or a broken local store.
    pub async fn update_progress(
        &self,
        plan_id: &str,
        day_number: u8,
        task_id: &str,
        completed: bool,
    ) -> StoreResult<Saved<DailyProgress>> {
        timed("update_progress", async {
            schema::validate_progress_day(day_number, task_id)?;
            let now = Utc::now();

            match self.resolve_mode().await? {
                StorageMode::Remote { .. } => {
                    let remote = self.remote()?;
                    let mut progress = remote
                        .get_progress_day(plan_id, day_number)
                        .await?
                        .unwrap_or_else(|| DailyProgress::new(plan_id, day_number));
                    progress.set_task(task_id, completed, now);
                    remote.upsert_progress(&progress).await?;
                    Ok(Saved {
                        value: progress,
                        outcome: SaveOutcome::Remote,
                    })
                }
                StorageMode::Local { owner_id } => {
                    let plan: Option<Plan> = self.read_sealed(keys::GENERATED_PLAN, &owner_id)?;
                    if plan.as_ref().map(|p| p.id.as_str()) != Some(plan_id) {
                        return Err(ValidationError::new(
                            "progress.plan_id",
                            format!("'{plan_id}' is not the current local plan"),
                        )
                        .into());
                    }

                    let mut stored: LocalProgress = self
                        .read_sealed::<LocalProgress>(keys::PLAN_PROGRESS, &owner_id)?
                        .filter(|p| p.plan_id == plan_id)
                        .unwrap_or_else(|| LocalProgress::for_plan(plan_id));

                    let mut progress = stored.day(day_number);
                    progress.set_task(task_id, completed, now);
                    stored.store_day(&progress);

                    let outcome = self.write_sealed(keys::PLAN_PROGRESS, &stored, &owner_id)?;
                    Ok(Saved {
                        value: progress,
                        outcome,
                    })
                }
            }
        })
        .await
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    /// Replace the owner's supplement inventory. Always stored locally.
    ///
    /// # Errors
    ///
    /// Fails on invalid items, encryption failures, or a broken local store.
    pub async fn save_inventory(&self, items: &[InventoryItem]) -> StoreResult<SaveOutcome> {
        timed("save_inventory", async {
            schema::validate_inventory(items)?;
            let mode = self.resolve_mode().await?;
            let owner_id = mode.owner_id();
            self.write_sealed(&keys::inventory(owner_id), items, owner_id)
        })
        .await
    }

    /// The owner's supplement inventory, empty when none is stored.
    ///
    /// # Errors
    ///
    /// Fails on a broken local store.
    pub async fn get_inventory(&self) -> StoreResult<Vec<InventoryItem>> {
        timed("get_inventory", async {
            let mode = self.resolve_mode().await?;
            let owner_id = mode.owner_id();
            Ok(self
                .read_sealed(&keys::inventory(owner_id), owner_id)?
                .unwrap_or_default())
        })
        .await
    }

    /// Each inventory item with its depletion forecast.
    ///
    /// # Errors
    ///
    /// Fails on a broken local store.
    pub async fn inventory_report(&self) -> StoreResult<Vec<InventoryReportLine>> {
        let items = self.get_inventory().await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let projection = inventory_status(&item);
                InventoryReportLine { item, projection }
            })
            .collect())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Encrypt every plaintext entry the service owns. Returns how many
    /// entries were rewritten; running it again returns 0.
    ///
    /// # Errors
    ///
    /// Fails when the owner cannot be resolved.
    pub async fn migrate_local_data(&self) -> StoreResult<usize> {
        timed("migrate_local_data", async {
            let local_owner = self.local_owner_id()?;
            let mode = self.resolve_mode().await?;

            let mut migrated = [
                keys::INTAKE_DATA,
                keys::GENERATED_PLAN,
                keys::PLAN_PROGRESS,
                keys::PLAN_ARCHIVE,
            ]
            .into_iter()
            .filter(|key| {
                encryption::migrate_to_encrypted(self.local.as_ref(), key, Some(&local_owner))
            })
            .count();

            let inventory_key = keys::inventory(mode.owner_id());
            if encryption::migrate_to_encrypted(
                self.local.as_ref(),
                &inventory_key,
                Some(mode.owner_id()),
            ) {
                migrated += 1;
            }

            if migrated > 0 {
                tracing::info!(migrated, "Encrypted legacy local entries");
            }
            Ok(migrated)
        })
        .await
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    /// Night-mode preference; `None` follows the system setting.
    ///
    /// # Errors
    ///
    /// Fails on a broken local store.
    pub fn night_mode_override(&self) -> StoreResult<Option<bool>> {
        let Some(raw) = self.local.get(keys::NIGHT_MODE_OVERRIDE)? else {
            return Ok(None);
        };
        match raw.trim() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => {
                tracing::warn!(value = other, "Ignoring malformed night mode override");
                Ok(None)
            }
        }
    }

    /// # Errors
    ///
    /// Fails when the local store rejects the write.
    pub fn set_night_mode_override(&self, enabled: bool) -> StoreResult<()> {
        self.local
            .set(keys::NIGHT_MODE_OVERRIDE, if enabled { "true" } else { "false" })?;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on a broken local store.
    pub fn clear_night_mode_override(&self) -> StoreResult<()> {
        self.local.remove(keys::NIGHT_MODE_OVERRIDE)?;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn remote(&self) -> StoreResult<&Arc<dyn RemoteStore>> {
        self.remote
            .as_ref()
            .ok_or_else(|| StoreError::RemoteRequired("no hosted backend configured".to_string()))
    }

    /// Encrypt then store. Encryption happens before the store is touched, so
    /// a failure leaves the previous value in place.
    fn write_sealed<T: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &T,
        owner_id: &str,
    ) -> StoreResult<SaveOutcome> {
        let wire = encrypt(payload, Some(owner_id))?;

        match self.local.set(key, &wire) {
            Ok(()) => Ok(SaveOutcome::Local),
            Err(LocalStoreError::Quota { needed, limit }) => {
                tracing::warn!(key, needed, limit, "Local storage full, save skipped");
                let warning = format!(
                    "Storage on this device is full ({needed} of {limit} bytes needed); \
                     your latest changes were not saved."
                );
                self.notices.warn(warning.clone());
                Ok(SaveOutcome::LocalDegraded { warning })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_sealed<T: DeserializeOwned>(
        &self,
        key: &str,
        owner_id: &str,
    ) -> StoreResult<Option<T>> {
        Ok(self
            .local
            .get(key)?
            .and_then(|raw| decrypt_as(&raw, Some(owner_id))))
    }
}

/// Accept both the stored record shape and a bare answers map written by
/// older builds.
fn intake_from_value(value: Value, owner_id: &str) -> Option<IntakeRecord> {
    match serde_json::from_value::<IntakeRecord>(value.clone()) {
        Ok(record) => Some(record),
        Err(_) => match value {
            Value::Object(answers) => Some(IntakeRecord::new(owner_id, answers)),
            _ => {
                tracing::warn!("Stored intake has an unexpected shape");
                None
            }
        },
    }
}

async fn timed<T, F>(operation: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let timer = OpTimer::new(COMPONENT, operation);
    let result = fut.await;
    timer.finish_with_result(result.as_ref());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::encryption::Envelope;
    use crate::database::local::InMemoryLocalStore;
    use crate::database::remote::InMemoryRemoteStore;
    use crate::domain::{GenerationMethod, InventoryStatus, PlanDay, PlanTask};
    use crate::error::RemoteError;
    use serde_json::json;

    fn answers(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn days() -> Vec<PlanDay> {
        (1..=30)
            .map(|day| PlanDay {
                day,
                tasks: vec![
                    PlanTask {
                        id: format!("d{day}-walk"),
                        title: "Walk".to_string(),
                        kind: "exercise".to_string(),
                    },
                    PlanTask {
                        id: format!("d{day}-d3"),
                        title: "Vitamin D3".to_string(),
                        kind: "supplement".to_string(),
                    },
                ],
                extra: Map::new(),
            })
            .collect()
    }

    fn local_service() -> (DataService, InMemoryLocalStore) {
        let local = InMemoryLocalStore::new();
        let service = DataService::new(Arc::new(local.clone()), None, NoticeLog::default());
        (service, local)
    }

    fn hybrid_service() -> (DataService, InMemoryLocalStore, Arc<InMemoryRemoteStore>) {
        let local = InMemoryLocalStore::new();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let service = DataService::new(
            Arc::new(local.clone()),
            Some(remote.clone()),
            NoticeLog::default(),
        );
        (service, local, remote)
    }

    #[tokio::test]
    async fn test_anonymous_intake_round_trip() {
        let (service, local) = local_service();

        let outcome = service
            .save_intake(answers(json!({ "name": "Ana" })))
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Local);

        let raw = local.get(keys::INTAKE_DATA).expect("get").expect("stored");
        assert!(Envelope::parse(&raw).expect("envelope").is_encrypted());

        let owner = service.local_owner_id().expect("owner");
        let record = service.get_intake().await.expect("get").expect("intake");
        assert_eq!(record.owner_id, owner);
        assert_eq!(record.answers["name"], "Ana");

        assert!(decrypt(&raw, Some("someone-else")).is_none());
    }

    #[tokio::test]
    async fn test_anonymous_id_is_stable() {
        let (service, local) = local_service();
        let first = service.local_owner_id().expect("first");
        let second = service.local_owner_id().expect("second");
        assert_eq!(first, second);
        assert_eq!(local.get(keys::ANONYMOUS_ID).expect("get"), Some(first));
    }

    #[tokio::test]
    async fn test_mock_session_owner() {
        let (service, local) = local_service();
        local
            .set(keys::MOCK_SESSION, r#"{"user_id":"dev-user"}"#)
            .expect("seed");

        // Ignored unless enabled
        assert_ne!(service.local_owner_id().expect("owner"), "dev-user");

        let service = service.with_mock_session(true);
        assert_eq!(service.local_owner_id().expect("owner"), "dev-user");
    }

    #[tokio::test]
    async fn test_signed_in_user_goes_remote() {
        let (service, local, remote) = hybrid_service();
        remote.sign_in("user-1");

        let outcome = service
            .save_intake(answers(json!({ "name": "Ana" })))
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Remote);
        assert!(local.get(keys::INTAKE_DATA).expect("get").is_none());

        let record = service.get_intake().await.expect("get").expect("intake");
        assert_eq!(record.owner_id, "user-1");
    }

    #[tokio::test]
    async fn test_session_check_failure_fails_open() {
        let (service, local, remote) = hybrid_service();
        remote.sign_in("user-1");
        remote.fail_session_check(Some(RemoteError::Network("offline".to_string())));

        let outcome = service
            .save_intake(answers(json!({ "name": "Ana" })))
            .await
            .expect("fail open");
        assert_eq!(outcome, SaveOutcome::Local);
        assert!(local.get(keys::INTAKE_DATA).expect("get").is_some());
    }

    #[tokio::test]
    async fn test_session_check_failure_fail_closed() {
        let (service, _local, remote) = hybrid_service();
        let service = service.with_policy(AuthCheckPolicy::FailClosed);
        remote.fail_session_check(Some(RemoteError::Auth("expired".to_string())));

        let err = service
            .save_intake(answers(json!({ "name": "Ana" })))
            .await
            .expect_err("fail closed");
        assert!(matches!(err, StoreError::Remote(RemoteError::Auth(_))));
    }

    #[tokio::test]
    async fn test_remote_failure_does_not_fall_back() {
        let (service, local, remote) = hybrid_service();
        remote.sign_in("user-1");
        remote.fail_requests(Some(RemoteError::Network("timeout".to_string())));

        let err = service
            .save_intake(answers(json!({ "name": "Ana" })))
            .await
            .expect_err("remote failure");
        assert!(err.is_retryable());
        assert!(local.get(keys::INTAKE_DATA).expect("get").is_none());
    }

    #[tokio::test]
    async fn test_invalid_intake_is_rejected() {
        let (service, _local) = local_service();
        let err = service
            .save_intake(answers(json!({ "profile": { "name": "Ana" } })))
            .await
            .expect_err("nested answers");
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_quota_reports_degraded_save() {
        let local = InMemoryLocalStore::with_quota(120);
        let service = DataService::new(Arc::new(local.clone()), None, NoticeLog::default());

        // Room for the anonymous id only
        service.local_owner_id().expect("owner");

        let outcome = service
            .save_intake(answers(json!({ "name": "Ana", "goals": ["sleep", "energy"] })))
            .await
            .expect("degraded, not an error");
        assert!(outcome.is_degraded());
        assert!(local.get(keys::INTAKE_DATA).expect("get").is_none());
        assert_eq!(service.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_local_plan_archive() {
        let (service, _local) = local_service();

        let first = service
            .save_plan(Plan::new("ignored", GenerationMethod::Algorithm, days()))
            .await
            .expect("first")
            .value;
        let owner = service.local_owner_id().expect("owner");
        assert_eq!(first.owner_id, owner);

        let second = service
            .save_plan(Plan::new("ignored", GenerationMethod::Llm, days()))
            .await
            .expect("second")
            .value;

        let active = service.get_active_plan().await.expect("active").expect("plan");
        assert_eq!(active.id, second.id);

        let archived = service.get_archived_plans().await.expect("archive");
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, first.id);
        assert_eq!(archived[0].status, PlanStatus::Inactive);

        // Saving the same plan again updates in place
        service.save_plan(second.clone()).await.expect("resave");
        assert_eq!(service.get_archived_plans().await.expect("archive").len(), 1);
    }

    #[tokio::test]
    async fn test_remote_plan_replaces_active() {
        let (service, _local, remote) = hybrid_service();
        remote.sign_in("user-1");

        let first = service
            .save_plan(Plan::new("user-1", GenerationMethod::Algorithm, days()))
            .await
            .expect("first")
            .value;
        let second = service
            .save_plan(Plan::new("user-1", GenerationMethod::Llm, days()))
            .await
            .expect("second")
            .value;

        assert_eq!(remote.plan(&first.id).expect("first").status, PlanStatus::Inactive);
        let active = service.get_active_plan().await.expect("active").expect("plan");
        assert_eq!(active.id, second.id);

        let archived = service.get_archived_plans().await.expect("archive");
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, first.id);
    }

    #[tokio::test]
    async fn test_remote_pending_plan_keeps_current_active() {
        let (service, _local, remote) = hybrid_service();
        remote.sign_in("user-1");

        let current = service
            .save_plan(Plan::new("user-1", GenerationMethod::Algorithm, days()))
            .await
            .expect("current")
            .value;
        let mut draft = Plan::new("user-1", GenerationMethod::Llm, days());
        draft.status = PlanStatus::Pending;
        let draft = service.save_plan(draft).await.expect("draft").value;

        assert_eq!(remote.status_update_count(), 0);
        assert_eq!(remote.plan(&draft.id).expect("draft").status, PlanStatus::Pending);
        let active = service.get_active_plan().await.expect("active").expect("plan");
        assert_eq!(active.id, current.id);
    }

    #[tokio::test]
    async fn test_local_progress_toggles() {
        let (service, _local) = local_service();
        let plan = service
            .save_plan(Plan::new("ignored", GenerationMethod::Algorithm, days()))
            .await
            .expect("plan")
            .value;

        service.update_progress(&plan.id, 3, "d3-walk", true).await.expect("walk");
        let saved = service.update_progress(&plan.id, 3, "d3-d3", true).await.expect("d3");
        assert_eq!(saved.outcome, SaveOutcome::Local);
        assert_eq!(saved.value.completed_count, 2);

        let undone = service.update_progress(&plan.id, 3, "d3-walk", false).await.expect("undo");
        assert_eq!(undone.value.completed_count, 1);

        let rows = service.get_progress(&plan.id).await.expect("progress");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day_number, 3);
        assert!(rows[0].is_completed("d3-d3"));
        assert!(!rows[0].is_completed("d3-walk"));

        assert!(service.get_progress("other-plan").await.expect("other").is_empty());

        let err = service
            .update_progress("other-plan", 1, "t", true)
            .await
            .expect_err("unknown plan");
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_remote_progress_upserts_one_row_per_day() {
        let (service, _local, remote) = hybrid_service();
        remote.sign_in("user-1");
        let plan = service
            .save_plan(Plan::new("user-1", GenerationMethod::Algorithm, days()))
            .await
            .expect("plan")
            .value;

        service.update_progress(&plan.id, 1, "d1-walk", true).await.expect("first");
        let saved = service.update_progress(&plan.id, 1, "d1-d3", true).await.expect("second");
        assert_eq!(saved.outcome, SaveOutcome::Remote);
        assert_eq!(saved.value.completed_count, 2);
        assert_eq!(remote.progress_row_count(&plan.id), 1);
    }

    #[tokio::test]
    async fn test_inventory_report() {
        let (service, local) = local_service();
        let items = vec![
            InventoryItem {
                supplement_slug: "vitamin-d3".to_string(),
                current_stock: 90.0,
                daily_consumption_rate: Some(1.0),
                reorder_threshold: 10,
            },
            InventoryItem {
                supplement_slug: "magnesium".to_string(),
                current_stock: 0.0,
                daily_consumption_rate: Some(2.0),
                reorder_threshold: 10,
            },
        ];

        service.save_inventory(&items).await.expect("save");
        let owner = service.local_owner_id().expect("owner");
        assert!(local.get(&keys::inventory(&owner)).expect("get").is_some());

        let report = service.inventory_report().await.expect("report");
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].projection.days_remaining, Some(112));
        assert_eq!(report[0].projection.status, InventoryStatus::Ok);
        assert_eq!(report[1].projection.status, InventoryStatus::Depleted);
    }

    #[tokio::test]
    async fn test_migrate_local_data() {
        let (service, local) = local_service();
        local
            .set(keys::INTAKE_DATA, r#"{"name":"Ana"}"#)
            .expect("legacy intake");
        local
            .set(keys::PLAN_ARCHIVE, r#"{"unencrypted":true,"data":[]}"#)
            .expect("plain archive");

        assert_eq!(service.migrate_local_data().await.expect("migrate"), 2);
        assert_eq!(service.migrate_local_data().await.expect("again"), 0);

        let record = service.get_intake().await.expect("get").expect("intake");
        assert_eq!(record.answers["name"], "Ana");
    }

    #[tokio::test]
    async fn test_night_mode_override() {
        let (service, _local) = local_service();
        assert_eq!(service.night_mode_override().expect("get"), None);

        service.set_night_mode_override(true).expect("set");
        assert_eq!(service.night_mode_override().expect("get"), Some(true));

        service.clear_night_mode_override().expect("clear");
        assert_eq!(service.night_mode_override().expect("get"), None);
    }
}
