//! Error taxonomy for the persistence layer.
//!
//! Each adapter has its own error type so callers can tell a full local store
//! apart from an expired session or a rejected remote write. [`StoreError`]
//! is what the data service hands back to the application.

use thiserror::Error;

/// Errors raised by the encryption module.
///
/// Decryption failures are deliberately absent: `decrypt` reports them as
/// `None` so they never reach UI code paths.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No owner id was available to derive a key from.
    #[error("Cannot derive encryption key: owner id is missing or empty")]
    KeyDerivation,

    /// The payload could not be serialized to JSON.
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The AEAD cipher rejected the operation.
    #[error("Cipher operation failed")]
    Cipher,
}

/// Errors raised by a [`LocalStore`](crate::database::local::LocalStore).
#[derive(Debug, Error)]
pub enum LocalStoreError {
    /// Writing would exceed the configured storage budget.
    #[error("Local storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    Quota { needed: u64, limit: u64 },

    /// The underlying storage engine failed.
    #[error("Local storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for LocalStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for LocalStoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Backend(format!("Connection lock poisoned: {err}"))
    }
}

/// Errors raised by a [`RemoteStore`](crate::database::remote::RemoteStore).
///
/// Only a failed session check may send the data service to local storage.
/// Failures of the operation itself always propagate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Missing or expired session.
    #[error("Remote authentication failed: {0}")]
    Auth(String),

    /// The request did not complete or the response was unusable.
    #[error("Remote request failed: {0}")]
    Network(String),

    /// The backend rejected the write (schema or constraint violation).
    #[error("Remote constraint violation: {0}")]
    Constraint(String),
}

impl RemoteError {
    /// Whether this error stems from the session rather than the request.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Map an HTTP status code and response body onto the taxonomy.
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {body}")),
            400 | 409 | 422 => Self::Constraint(format!("HTTP {status}: {body}")),
            _ => Self::Network(format!("HTTP {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Self::Network(format!("Invalid response body: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// A record failed its shape check before being persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {field}: {reason}")]
pub struct ValidationError {
    /// The offending field or record.
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Umbrella error returned by the data service and reconciler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Another reconciliation run is still in flight in this process.
    #[error("A plan reconciliation run is already in progress")]
    ReconcileInProgress,

    /// The operation needs an authenticated remote session.
    #[error("Operation requires remote mode: {0}")]
    RemoteRequired(String),
}

impl StoreError {
    /// Whether the caller should offer the user a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(RemoteError::Network(_)) | Self::Local(LocalStoreError::Backend(_)) => {
                true
            }
            Self::Remote(_)
            | Self::Crypto(_)
            | Self::Local(LocalStoreError::Quota { .. })
            | Self::Validation(_)
            | Self::ReconcileInProgress
            | Self::RemoteRequired(_) => false,
        }
    }
}

/// Result alias for service operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for remote adapter operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(RemoteError::from_status(401, "jwt expired").is_auth());
        assert!(RemoteError::from_status(403, "rls").is_auth());
        assert!(matches!(
            RemoteError::from_status(409, "duplicate key"),
            RemoteError::Constraint(_)
        ));
        assert!(matches!(
            RemoteError::from_status(422, "bad column"),
            RemoteError::Constraint(_)
        ));
        assert!(matches!(
            RemoteError::from_status(503, "unavailable"),
            RemoteError::Network(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = LocalStoreError::Quota {
            needed: 6_000_000,
            limit: 5_242_880,
        };
        assert_eq!(
            err.to_string(),
            "Local storage quota exceeded: 6000000 bytes needed, limit is 5242880"
        );

        let err = ValidationError::new("plan.current_day", "must be within 1..=30");
        assert_eq!(err.to_string(), "Invalid plan.current_day: must be within 1..=30");
    }

    #[test]
    fn test_retryable() {
        assert!(StoreError::from(RemoteError::Network("timeout".into())).is_retryable());
        assert!(!StoreError::from(RemoteError::Auth("expired".into())).is_retryable());
        assert!(!StoreError::from(CryptoError::KeyDerivation).is_retryable());
    }
}
