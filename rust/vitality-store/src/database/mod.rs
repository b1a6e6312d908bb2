//! Persistence layer.
//!
//! - **local**: synchronous key-value store (SQLite file or memory)
//! - **encryption**: per-owner AES-GCM envelopes for local payloads
//! - **remote**: hosted relational backend (PostgREST)
//! - **service**: routes each call to one of the two and normalizes results
//! - **reconciler**: admin job keeping one active plan per owner
//!
//! Application code talks to [`DataService`]; the adapters are public so
//! tests and tools can drive them directly.

pub mod encryption;
pub mod local;
pub mod reconciler;
pub mod remote;
pub mod schema;
pub mod service;

use std::sync::Arc;

pub use encryption::{decrypt, derive_key, encrypt, migrate_to_encrypted, DerivedKey, Envelope};
pub use local::{InMemoryLocalStore, LocalStore, SqliteLocalStore};
pub use reconciler::{PlanReconciler, ReconcileFailure, ReconcileSummary};
pub use remote::{InMemoryRemoteStore, RemoteStore, RestRemoteStore};
pub use service::{AuthCheckPolicy, DataService, SaveOutcome, Saved, StorageMode};

use crate::config::{LocalConfig, RemoteConfig};
use crate::error::{LocalStoreError, RemoteError};

/// Open the local store described by `config`.
///
/// # Errors
///
/// Returns an error if the SQLite file cannot be opened or initialised.
pub fn create_local_store(config: &LocalConfig) -> Result<Arc<dyn LocalStore>, LocalStoreError> {
    if config.in_memory {
        tracing::info!(quota_bytes = config.quota_bytes, "Using in-memory local store");
        return Ok(Arc::new(InMemoryLocalStore::with_quota(config.quota_bytes)));
    }

    let path = config.database_path();
    tracing::info!(path = %path.display(), quota_bytes = config.quota_bytes, "Opening local store");
    Ok(Arc::new(SqliteLocalStore::open(&path, config.quota_bytes)?))
}

/// Build the hosted backend client, `None` when no URL is configured.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_remote_store(
    config: &RemoteConfig,
) -> Result<Option<Arc<RestRemoteStore>>, RemoteError> {
    let Some(url) = &config.url else {
        tracing::info!("No hosted backend configured, running local-only");
        return Ok(None);
    };

    let store = RestRemoteStore::new(
        url.as_str(),
        config.anon_key.clone().unwrap_or_default(),
        config.timeout(),
    )?;
    store.set_access_token(config.access_token.clone());
    tracing::info!(
        url = %url,
        has_session = config.access_token.is_some(),
        "Hosted backend configured"
    );
    Ok(Some(Arc::new(store)))
}
