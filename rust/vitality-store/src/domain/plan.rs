//! 30-day plan model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of day entries in every plan.
pub const PLAN_LENGTH_DAYS: u8 = 30;

/// Plan lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Generated but not yet started.
    Pending,
    /// The plan the user is currently following.
    Active,
    /// Superseded by a newer plan.
    Inactive,
    /// All 30 days finished.
    Completed,
    /// Abandoned by the user.
    Cancelled,
    /// Temporarily on hold.
    Paused,
}

impl PlanStatus {
    /// Convert status to string for storage and query filters.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Whether a plan in this status belongs in the user's history.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        matches!(self, Self::Inactive | Self::Completed | Self::Cancelled)
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("Invalid plan status: {s}")),
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    /// Generated by the LLM proxy.
    Llm,
    /// Deterministic rule-table fallback.
    Algorithm,
}

impl GenerationMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Algorithm => "algorithm",
        }
    }
}

impl std::str::FromStr for GenerationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "algorithm" => Ok(Self::Algorithm),
            _ => Err(format!("Invalid generation method: {s}")),
        }
    }
}

/// A single task on a plan day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    /// Task category, e.g. `supplement`, `exercise`, `nutrition`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// One day of the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDay {
    /// 1-based day number.
    pub day: u8,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    /// Generator-specific extras (focus text, tips) kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `plan_data` column: ordered day entries plus generation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub days: Vec<PlanDay>,
}

/// A generated 30-day plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    /// Owner (`user_id` on the hosted backend).
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub status: PlanStatus,
    /// Day the user is on, 1..=30.
    pub current_day: u8,
    pub start_date: NaiveDate,
    pub generation_method: GenerationMethod,
    pub plan_data: PlanData,
    /// Set by the backend on insert; absent for plans never stored remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Wrap freshly generated days in an active plan starting today.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, method: GenerationMethod, days: Vec<PlanDay>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            status: PlanStatus::Active,
            current_day: 1,
            start_date: now.date_naive(),
            generation_method: method,
            plan_data: PlanData {
                generated_at: Some(now),
                days,
            },
            created_at: Some(now),
        }
    }

    /// Timestamp used to decide which plan is the newest.
    #[must_use]
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.plan_data.generated_at)
    }

    /// Look up a day entry by its 1-based number.
    #[must_use]
    pub fn day(&self, day_number: u8) -> Option<&PlanDay> {
        self.plan_data.days.iter().find(|d| d.day == day_number)
    }
}

/// The columns the reconciler needs, without the heavy `plan_data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

impl PlanSummary {
    #[must_use]
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.generated_at)
    }
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            owner_id: plan.owner_id.clone(),
            status: plan.status,
            created_at: plan.created_at,
            generated_at: plan.plan_data.generated_at,
        }
    }
}
