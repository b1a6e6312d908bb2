//! Intake questionnaire record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user's questionnaire answers. One per owner, overwritten on re-submission.
///
/// Answers stay schema-less; their shape is checked by
/// [`validate_intake`](crate::database::schema::validate_intake) before any
/// write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeRecord {
    /// Owner of the answers (`user_id` on the hosted backend).
    #[serde(rename = "user_id")]
    pub owner_id: String,
    /// Questionnaire answers keyed by question.
    #[serde(rename = "data")]
    pub answers: Map<String, Value>,
    /// Last submission time.
    pub updated_at: DateTime<Utc>,
}

impl IntakeRecord {
    /// Stamp a fresh submission for `owner_id`.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, answers: Map<String, Value>) -> Self {
        Self {
            owner_id: owner_id.into(),
            answers,
            updated_at: Utc::now(),
        }
    }
}
