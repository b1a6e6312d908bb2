//! Core domain models shared by both storage backends.

pub mod intake;
pub mod inventory;
pub mod plan;
pub mod progress;

pub use intake::IntakeRecord;
pub use inventory::{
    inventory_status, InventoryItem, InventoryProjection, InventoryStatus, COMPLIANCE_FACTOR,
};
pub use plan::{
    GenerationMethod, Plan, PlanData, PlanDay, PlanStatus, PlanSummary, PlanTask,
    PLAN_LENGTH_DAYS,
};
pub use progress::DailyProgress;
