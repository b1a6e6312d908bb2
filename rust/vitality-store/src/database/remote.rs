//! Hosted backend adapter.
//!
//! Each method maps to a single query against the relational backend. The
//! production implementation talks PostgREST over HTTPS; the in-memory one
//! backs tests and supports failure injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::domain::{DailyProgress, IntakeRecord, Plan, PlanStatus, PlanSummary};
use crate::error::{RemoteError, RemoteResult};

const INTAKE_TABLE: &str = "intake_forms";
const PLANS_TABLE: &str = "plans";
const SUMMARY_COLUMNS: &str = "id,user_id,status,created_at,generated_at:plan_data->>generated_at";
const PROGRESS_TABLE: &str = "daily_progress";

/// Rows requested per page when scanning every plan.
pub const SUMMARY_PAGE_SIZE: usize = 500;

/// CRUD surface of the hosted backend.
#[async_trait]
pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    /// Resolve the signed-in user, `None` when there is no session.
    async fn current_user(&self) -> RemoteResult<Option<String>>;

    /// Create or replace the owner's intake record.
    async fn upsert_intake(&self, record: &IntakeRecord) -> RemoteResult<()>;

    async fn get_intake(&self, user_id: &str) -> RemoteResult<Option<IntakeRecord>>;

    /// Insert a plan and return the stored row (with `created_at`).
    async fn insert_plan(&self, plan: &Plan) -> RemoteResult<Plan>;

    /// Newest plan with status `active`.
    async fn get_active_plan(&self, user_id: &str) -> RemoteResult<Option<Plan>>;

    /// Inactive, completed and cancelled plans, newest first.
    async fn list_archived_plans(&self, user_id: &str) -> RemoteResult<Vec<Plan>>;

    /// One page of plan summaries ordered by id. The backend may return
    /// fewer than `limit` rows even when more remain.
    async fn plan_summaries_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Vec<PlanSummary>>;

    /// Every plan of every user, without `plan_data`.
    ///
    /// Pages until the backend returns an empty page, so a server-side row
    /// cap never truncates the scan.
    async fn list_plan_summaries(&self) -> RemoteResult<Vec<PlanSummary>> {
        let mut summaries = Vec::new();
        loop {
            let page = self
                .plan_summaries_page(summaries.len(), SUMMARY_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            summaries.extend(page);
        }
        tracing::debug!(count = summaries.len(), "Fetched plan summaries");
        Ok(summaries)
    }

    async fn update_plan_status(&self, plan_id: &str, status: PlanStatus) -> RemoteResult<()>;

    /// All progress rows of a plan ordered by day.
    async fn list_progress(&self, plan_id: &str) -> RemoteResult<Vec<DailyProgress>>;

    async fn get_progress_day(
        &self,
        plan_id: &str,
        day_number: u8,
    ) -> RemoteResult<Option<DailyProgress>>;

    /// Insert or replace the row keyed by `(plan_id, day_number)`.
    async fn upsert_progress(&self, progress: &DailyProgress) -> RemoteResult<()>;

    async fn delete_progress_for_plan(&self, plan_id: &str) -> RemoteResult<()>;

    async fn delete_plan(&self, plan_id: &str) -> RemoteResult<()>;
}

// ============================================================================
// PostgREST Client
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// PostgREST-backed remote store.
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: parking_lot::RwLock<Option<String>>,
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .field("anon_key", &"<redacted>")
            .field("has_session", &self.access_token.read().is_some())
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    /// Build a client for the backend at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: parking_lot::RwLock::new(None),
        })
    }

    /// Replace the session token. `None` signs out.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RemoteResult<RequestBuilder> {
        let token = self
            .access_token
            .read()
            .clone()
            .ok_or_else(|| RemoteError::Auth("No active session".to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token))
    }

    async fn check(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), body))
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> RemoteResult<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn execute(request: RequestBuilder) -> RemoteResult<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn current_user(&self) -> RemoteResult<Option<String>> {
        if self.access_token.read().is_none() {
            return Ok(None);
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let user: AuthUser = Self::fetch(self.request(Method::GET, &url)?).await?;
        Ok(Some(user.id))
    }

    async fn upsert_intake(&self, record: &IntakeRecord) -> RemoteResult<()> {
        let request = self
            .request(Method::POST, &self.table_url(INTAKE_TABLE))?
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);
        Self::execute(request).await
    }

    async fn get_intake(&self, user_id: &str) -> RemoteResult<Option<IntakeRecord>> {
        let request = self
            .request(Method::GET, &self.table_url(INTAKE_TABLE))?
            .query(&[("user_id", format!("eq.{user_id}")), ("limit", "1".to_string())]);
        let rows: Vec<IntakeRecord> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_plan(&self, plan: &Plan) -> RemoteResult<Plan> {
        let request = self
            .request(Method::POST, &self.table_url(PLANS_TABLE))?
            .header("Prefer", "return=representation")
            .json(plan);
        let rows: Vec<Plan> = Self::fetch(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::Network("Insert returned no row".to_string()))
    }

    async fn get_active_plan(&self, user_id: &str) -> RemoteResult<Option<Plan>> {
        let request = self
            .request(Method::GET, &self.table_url(PLANS_TABLE))?
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", "eq.active".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<Plan> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_archived_plans(&self, user_id: &str) -> RemoteResult<Vec<Plan>> {
        let request = self
            .request(Method::GET, &self.table_url(PLANS_TABLE))?
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", "in.(inactive,completed,cancelled)".to_string()),
                ("order", "created_at.desc".to_string()),
            ]);
        Self::fetch(request).await
    }

    async fn plan_summaries_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Vec<PlanSummary>> {
        let request = self
            .request(Method::GET, &self.table_url(PLANS_TABLE))?
            .query(&[
                ("select", SUMMARY_COLUMNS.to_string()),
                ("order", "id.asc".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);
        Self::fetch(request).await
    }

    async fn update_plan_status(&self, plan_id: &str, status: PlanStatus) -> RemoteResult<()> {
        let request = self
            .request(Method::PATCH, &self.table_url(PLANS_TABLE))?
            .query(&[("id", format!("eq.{plan_id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "status": status }));
        Self::execute(request).await
    }

    async fn list_progress(&self, plan_id: &str) -> RemoteResult<Vec<DailyProgress>> {
        let request = self
            .request(Method::GET, &self.table_url(PROGRESS_TABLE))?
            .query(&[
                ("plan_id", format!("eq.{plan_id}")),
                ("order", "day_number.asc".to_string()),
            ]);
        Self::fetch(request).await
    }

    async fn get_progress_day(
        &self,
        plan_id: &str,
        day_number: u8,
    ) -> RemoteResult<Option<DailyProgress>> {
        let request = self
            .request(Method::GET, &self.table_url(PROGRESS_TABLE))?
            .query(&[
                ("plan_id", format!("eq.{plan_id}")),
                ("day_number", format!("eq.{day_number}")),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<DailyProgress> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_progress(&self, progress: &DailyProgress) -> RemoteResult<()> {
        let request = self
            .request(Method::POST, &self.table_url(PROGRESS_TABLE))?
            .query(&[("on_conflict", "plan_id,day_number")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(progress);
        Self::execute(request).await
    }

    async fn delete_progress_for_plan(&self, plan_id: &str) -> RemoteResult<()> {
        let request = self
            .request(Method::DELETE, &self.table_url(PROGRESS_TABLE))?
            .query(&[("plan_id", format!("eq.{plan_id}"))]);
        Self::execute(request).await
    }

    async fn delete_plan(&self, plan_id: &str) -> RemoteResult<()> {
        let request = self
            .request(Method::DELETE, &self.table_url(PLANS_TABLE))?
            .query(&[("id", format!("eq.{plan_id}"))]);
        Self::execute(request).await
    }
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

#[derive(Debug, Default)]
struct RemoteState {
    session: Option<String>,
    session_error: Option<RemoteError>,
    request_error: Option<RemoteError>,
    failing_status_updates: HashSet<String>,
    max_rows: Option<usize>,
    intakes: HashMap<String, IntakeRecord>,
    plans: Vec<Plan>,
    progress: BTreeMap<(String, u8), DailyProgress>,
    status_updates: usize,
}

impl RemoteState {
    fn guard(&self) -> RemoteResult<()> {
        match &self.request_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory remote store with failure injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemoteStore {
    state: Arc<parking_lot::RwLock<RemoteState>>,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `user_id`.
    pub fn sign_in(&self, user_id: impl Into<String>) {
        self.state.write().session = Some(user_id.into());
    }

    pub fn sign_out(&self) {
        self.state.write().session = None;
    }

    /// Make the session check fail with `error` until cleared with `None`.
    pub fn fail_session_check(&self, error: Option<RemoteError>) {
        self.state.write().session_error = error;
    }

    /// Make every data request fail with `error` until cleared with `None`.
    pub fn fail_requests(&self, error: Option<RemoteError>) {
        self.state.write().request_error = error;
    }

    /// Reject status updates for `plan_id`.
    pub fn fail_status_updates_for(&self, plan_id: impl Into<String>) {
        self.state.write().failing_status_updates.insert(plan_id.into());
    }

    /// Cap every page at `max_rows`, like a server-side row limit.
    pub fn set_max_rows(&self, max_rows: Option<usize>) {
        self.state.write().max_rows = max_rows;
    }

    /// Store a plan as-is, bypassing insert defaults.
    pub fn seed_plan(&self, plan: Plan) {
        self.state.write().plans.push(plan);
    }

    #[must_use]
    pub fn plan(&self, plan_id: &str) -> Option<Plan> {
        self.state.read().plans.iter().find(|p| p.id == plan_id).cloned()
    }

    #[must_use]
    pub fn plans(&self) -> Vec<Plan> {
        self.state.read().plans.clone()
    }

    /// Successful status updates so far.
    #[must_use]
    pub fn status_update_count(&self) -> usize {
        self.state.read().status_updates
    }

    #[must_use]
    pub fn progress_row_count(&self, plan_id: &str) -> usize {
        self.state
            .read()
            .progress
            .keys()
            .filter(|(id, _)| id == plan_id)
            .count()
    }

    fn newest_first(plans: &mut [Plan]) {
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn current_user(&self) -> RemoteResult<Option<String>> {
        let state = self.state.read();
        if let Some(err) = &state.session_error {
            return Err(err.clone());
        }
        Ok(state.session.clone())
    }

    async fn upsert_intake(&self, record: &IntakeRecord) -> RemoteResult<()> {
        let mut state = self.state.write();
        state.guard()?;
        state.intakes.insert(record.owner_id.clone(), record.clone());
        Ok(())
    }

    async fn get_intake(&self, user_id: &str) -> RemoteResult<Option<IntakeRecord>> {
        let state = self.state.read();
        state.guard()?;
        Ok(state.intakes.get(user_id).cloned())
    }

    async fn insert_plan(&self, plan: &Plan) -> RemoteResult<Plan> {
        let mut state = self.state.write();
        state.guard()?;
        if state.plans.iter().any(|p| p.id == plan.id) {
            return Err(RemoteError::Constraint(format!(
                "duplicate key value violates unique constraint \"plans_pkey\" ({})",
                plan.id
            )));
        }
        let mut stored = plan.clone();
        if stored.created_at.is_none() {
            stored.created_at = Some(Utc::now());
        }
        state.plans.push(stored.clone());
        Ok(stored)
    }

    async fn get_active_plan(&self, user_id: &str) -> RemoteResult<Option<Plan>> {
        let state = self.state.read();
        state.guard()?;
        let mut active: Vec<Plan> = state
            .plans
            .iter()
            .filter(|p| p.owner_id == user_id && p.status == PlanStatus::Active)
            .cloned()
            .collect();
        Self::newest_first(&mut active);
        Ok(active.into_iter().next())
    }

    async fn list_archived_plans(&self, user_id: &str) -> RemoteResult<Vec<Plan>> {
        let state = self.state.read();
        state.guard()?;
        let mut archived: Vec<Plan> = state
            .plans
            .iter()
            .filter(|p| p.owner_id == user_id && p.status.is_archived())
            .cloned()
            .collect();
        Self::newest_first(&mut archived);
        Ok(archived)
    }

    async fn plan_summaries_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Vec<PlanSummary>> {
        let state = self.state.read();
        state.guard()?;
        let limit = state.max_rows.map_or(limit, |cap| limit.min(cap));
        let mut summaries: Vec<PlanSummary> = state.plans.iter().map(PlanSummary::from).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_plan_status(&self, plan_id: &str, status: PlanStatus) -> RemoteResult<()> {
        let mut state = self.state.write();
        state.guard()?;
        if state.failing_status_updates.contains(plan_id) {
            return Err(RemoteError::Network(format!(
                "Connection reset while updating {plan_id}"
            )));
        }
        // Zero matched rows is not an error, but nothing was written either
        let Some(plan) = state.plans.iter_mut().find(|p| p.id == plan_id) else {
            return Ok(());
        };
        plan.status = status;
        state.status_updates += 1;
        Ok(())
    }

    async fn list_progress(&self, plan_id: &str) -> RemoteResult<Vec<DailyProgress>> {
        let state = self.state.read();
        state.guard()?;
        Ok(state
            .progress
            .values()
            .filter(|p| p.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn get_progress_day(
        &self,
        plan_id: &str,
        day_number: u8,
    ) -> RemoteResult<Option<DailyProgress>> {
        let state = self.state.read();
        state.guard()?;
        Ok(state
            .progress
            .get(&(plan_id.to_string(), day_number))
            .cloned())
    }

    async fn upsert_progress(&self, progress: &DailyProgress) -> RemoteResult<()> {
        let mut state = self.state.write();
        state.guard()?;
        if !state.plans.iter().any(|p| p.id == progress.plan_id) {
            return Err(RemoteError::Constraint(format!(
                "insert on daily_progress violates foreign key: plan {} not found",
                progress.plan_id
            )));
        }
        state.progress.insert(
            (progress.plan_id.clone(), progress.day_number),
            progress.clone(),
        );
        Ok(())
    }

    async fn delete_progress_for_plan(&self, plan_id: &str) -> RemoteResult<()> {
        let mut state = self.state.write();
        state.guard()?;
        state.progress.retain(|(id, _), _| id != plan_id);
        Ok(())
    }

    async fn delete_plan(&self, plan_id: &str) -> RemoteResult<()> {
        let mut state = self.state.write();
        state.guard()?;
        if state.progress.keys().any(|(id, _)| id == plan_id) {
            return Err(RemoteError::Constraint(format!(
                "delete on plans violates foreign key: daily_progress still references {plan_id}"
            )));
        }
        state.plans.retain(|p| p.id != plan_id);
        Ok(())
    }
}
