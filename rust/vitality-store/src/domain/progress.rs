//! Per-day task completion.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Completion state for one `(plan_id, day_number)` pair.
///
/// Field names follow the hosted `daily_progress` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyProgress {
    pub plan_id: String,
    pub day_number: u8,
    /// `task_id -> completed`.
    #[serde(default)]
    pub completed_tasks: BTreeMap<String, bool>,
    /// Count of `true` entries in `completed_tasks`.
    #[serde(rename = "tasks_completed", default)]
    pub completed_count: u32,
    #[serde(default)]
    pub last_task_completed_at: Option<DateTime<Utc>>,
}

impl DailyProgress {
    #[must_use]
    pub fn new(plan_id: impl Into<String>, day_number: u8) -> Self {
        Self {
            plan_id: plan_id.into(),
            day_number,
            completed_tasks: BTreeMap::new(),
            completed_count: 0,
            last_task_completed_at: None,
        }
    }

    /// Record a toggle and keep the derived count in step.
    pub fn set_task(&mut self, task_id: impl Into<String>, completed: bool, at: DateTime<Utc>) {
        self.completed_tasks.insert(task_id.into(), completed);
        self.recount();
        if completed {
            self.last_task_completed_at = Some(at);
        }
    }

    /// Recompute `completed_count` from the task map.
    pub fn recount(&mut self) {
        let count = self.completed_tasks.values().filter(|done| **done).count();
        self.completed_count = u32::try_from(count).unwrap_or(u32::MAX);
    }

    #[must_use]
    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed_tasks.get(task_id).copied().unwrap_or(false)
    }

    /// Fraction of `total_tasks` done, in `0.0..=1.0`.
    #[must_use]
    pub fn completion_ratio(&self, total_tasks: usize) -> f64 {
        if total_tasks == 0 {
            return 0.0;
        }
        (f64::from(self.completed_count) / total_tasks as f64).min(1.0)
    }
}
