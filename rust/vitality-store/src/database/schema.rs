//! Shape checks applied before anything is persisted.
//!
//! Intake answers arrive as free-form JSON. These checks turn a silently
//! wrong shape into a [`ValidationError`] at the service boundary.

use serde_json::{Map, Value};

use crate::domain::{InventoryItem, Plan, PLAN_LENGTH_DAYS};
use crate::error::ValidationError;

/// Longest array accepted as a single intake answer.
pub const MAX_INTAKE_ARRAY_LEN: usize = 64;

/// Longest accepted intake answer key.
const MAX_INTAKE_KEY_LEN: usize = 128;

/// Intake answers must be scalars or small arrays of scalars.
pub fn validate_intake(answers: &Map<String, Value>) -> Result<(), ValidationError> {
    if answers.is_empty() {
        return Err(ValidationError::new("intake", "no answers supplied"));
    }

    for (key, value) in answers {
        if key.trim().is_empty() || key.len() > MAX_INTAKE_KEY_LEN {
            return Err(ValidationError::new(
                "intake",
                format!("answer key '{key}' is empty or too long"),
            ));
        }

        match value {
            Value::Object(_) => {
                return Err(ValidationError::new(
                    format!("intake.{key}"),
                    "nested objects are not allowed",
                ));
            }
            Value::Array(items) => {
                if items.len() > MAX_INTAKE_ARRAY_LEN {
                    return Err(ValidationError::new(
                        format!("intake.{key}"),
                        format!("more than {MAX_INTAKE_ARRAY_LEN} entries"),
                    ));
                }
                if items.iter().any(|v| v.is_array() || v.is_object()) {
                    return Err(ValidationError::new(
                        format!("intake.{key}"),
                        "array entries must be scalars",
                    ));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
    }

    Ok(())
}

/// A plan needs exactly 30 ordered days with identifiable tasks.
pub fn validate_plan(plan: &Plan) -> Result<(), ValidationError> {
    if plan.id.trim().is_empty() {
        return Err(ValidationError::new("plan.id", "must not be empty"));
    }
    if plan.owner_id.trim().is_empty() {
        return Err(ValidationError::new("plan.owner_id", "must not be empty"));
    }
    validate_day_number("plan.current_day", plan.current_day)?;

    let days = &plan.plan_data.days;
    if days.len() != usize::from(PLAN_LENGTH_DAYS) {
        return Err(ValidationError::new(
            "plan.plan_data.days",
            format!("expected {PLAN_LENGTH_DAYS} entries, found {}", days.len()),
        ));
    }

    for (expected, day) in (1..=PLAN_LENGTH_DAYS).zip(days) {
        if day.day != expected {
            return Err(ValidationError::new(
                "plan.plan_data.days",
                format!("entry {expected} is numbered {}", day.day),
            ));
        }
        if let Some(task) = day.tasks.iter().find(|t| t.id.trim().is_empty()) {
            return Err(ValidationError::new(
                format!("plan.plan_data.days[{expected}]"),
                format!("task '{}' has no id", task.title),
            ));
        }
    }

    Ok(())
}

/// Day numbers run from 1 to 30.
pub fn validate_day_number(field: &str, day_number: u8) -> Result<(), ValidationError> {
    if (1..=PLAN_LENGTH_DAYS).contains(&day_number) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{day_number} is outside 1..={PLAN_LENGTH_DAYS}"),
        ))
    }
}

/// A progress toggle must name a real day and a non-empty task.
pub fn validate_progress_day(day_number: u8, task_id: &str) -> Result<(), ValidationError> {
    validate_day_number("progress.day_number", day_number)?;
    if task_id.trim().is_empty() {
        return Err(ValidationError::new("progress.task_id", "must not be empty"));
    }
    Ok(())
}

/// Inventory items need a slug, a real stock count and a sane schedule.
pub fn validate_inventory(items: &[InventoryItem]) -> Result<(), ValidationError> {
    for item in items {
        let field = format!("inventory.{}", item.supplement_slug);
        if item.supplement_slug.trim().is_empty() {
            return Err(ValidationError::new("inventory", "item has no supplement slug"));
        }
        if !item.current_stock.is_finite() || item.current_stock < 0.0 {
            return Err(ValidationError::new(
                format!("{field}.current_stock"),
                "must be a non-negative number",
            ));
        }
        if item
            .daily_consumption_rate
            .is_some_and(|rate| !rate.is_finite() || rate < 0.0)
        {
            return Err(ValidationError::new(
                format!("{field}.daily_consumption_rate"),
                "must be a non-negative number",
            ));
        }
    }

    let mut slugs: Vec<&str> = items.iter().map(|i| i.supplement_slug.as_str()).collect();
    slugs.sort_unstable();
    if let Some(pair) = slugs.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(ValidationError::new(
            "inventory",
            format!("'{}' is listed twice", pair[0]),
        ));
    }

    Ok(())
}
