//! Supplement inventory and depletion forecasting.

use serde::{Deserialize, Serialize};

/// Assumed fraction of scheduled doses users actually take.
pub const COMPLIANCE_FACTOR: f64 = 0.8;

/// Days of supply at or below which an item is critical.
const CRITICAL_DAYS: i64 = 3;

/// One supplement on the user's shelf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub supplement_slug: String,
    /// Doses on hand.
    pub current_stock: f64,
    /// Scheduled doses per day; `None` when the schedule is unknown.
    #[serde(default)]
    pub daily_consumption_rate: Option<f64>,
    /// Days of supply at which to reorder.
    pub reorder_threshold: u32,
}

/// Stock classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Ok,
    Warning,
    Critical,
    Depleted,
    Unknown,
}

/// Forecast for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryProjection {
    /// Whole days of supply left; `None` when consumption is unknown.
    pub days_remaining: Option<i64>,
    pub status: InventoryStatus,
}

/// Project how long `item` will last and classify it.
///
/// `days_remaining = floor(stock / (rate * COMPLIANCE_FACTOR))`. An empty
/// shelf is depleted whatever the schedule says.
#[must_use]
pub fn inventory_status(item: &InventoryItem) -> InventoryProjection {
    if item.current_stock <= 0.0 {
        return InventoryProjection {
            days_remaining: Some(0),
            status: InventoryStatus::Depleted,
        };
    }

    let rate = match item.daily_consumption_rate {
        Some(rate) if rate > 0.0 && rate.is_finite() => rate,
        _ => {
            return InventoryProjection {
                days_remaining: None,
                status: InventoryStatus::Unknown,
            };
        }
    };

    #[allow(
        clippy::cast_possible_truncation,
        reason = "day counts are far below i64::MAX"
    )]
    let days = (item.current_stock / (rate * COMPLIANCE_FACTOR)).floor() as i64;

    let status = if days <= 0 {
        InventoryStatus::Depleted
    } else if days <= CRITICAL_DAYS {
        InventoryStatus::Critical
    } else if days <= i64::from(item.reorder_threshold) {
        InventoryStatus::Warning
    } else {
        InventoryStatus::Ok
    };

    InventoryProjection {
        days_remaining: Some(days),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stock: f64, rate: Option<f64>, threshold: u32) -> InventoryItem {
        InventoryItem {
            supplement_slug: "vitamin-d3".to_string(),
            current_stock: stock,
            daily_consumption_rate: rate,
            reorder_threshold: threshold,
        }
    }

    #[test]
    fn test_empty_stock_is_depleted() {
        assert_eq!(inventory_status(&item(0.0, Some(1.0), 10)).status, InventoryStatus::Depleted);
        assert_eq!(inventory_status(&item(0.0, None, 10)).status, InventoryStatus::Depleted);
    }

    #[test]
    fn test_ninety_doses_one_per_day() {
        let projection = inventory_status(&item(90.0, Some(1.0), 10));
        assert_eq!(projection.days_remaining, Some(112));
        assert_eq!(projection.status, InventoryStatus::Ok);
    }

    #[test]
    fn test_thresholds() {
        // 2 / 0.8 = 2.5 -> 2 days
        assert_eq!(inventory_status(&item(2.0, Some(1.0), 10)).status, InventoryStatus::Critical);
        // 4 / 0.8 = 5 days, threshold 10
        assert_eq!(inventory_status(&item(4.0, Some(1.0), 10)).status, InventoryStatus::Warning);
        // 8 / 0.8 = 10 days, exactly at threshold
        assert_eq!(inventory_status(&item(8.0, Some(1.0), 10)).status, InventoryStatus::Warning);
        // 0.5 / (2 * 0.8) = 0.31 -> 0 days
        let projection = inventory_status(&item(0.5, Some(2.0), 10));
        assert_eq!(projection.days_remaining, Some(0));
        assert_eq!(projection.status, InventoryStatus::Depleted);
    }

    #[test]
    fn test_unknown_consumption() {
        assert_eq!(inventory_status(&item(30.0, None, 5)).status, InventoryStatus::Unknown);
        assert_eq!(inventory_status(&item(30.0, Some(0.0), 5)).status, InventoryStatus::Unknown);
        assert_eq!(inventory_status(&item(30.0, Some(0.0), 5)).days_remaining, None);
    }
}
