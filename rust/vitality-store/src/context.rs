//! Process-wide application context.
//!
//! Owns the stores, the data service, the reconciler and the notice buffer.
//! Create one with [`AppContext::init`] at startup, hand out references, and
//! call [`AppContext::shutdown`] on exit. Nothing here is global.

use std::sync::Arc;

use anyhow::Context as _;

use crate::config::StoreConfig;
use crate::database::{
    self, DataService, LocalStore, PlanReconciler, RemoteStore, RestRemoteStore,
};
use crate::error::{StoreError, StoreResult};
use crate::logging::{self, Notice, NoticeLog};

/// Everything the persistence layer needs at runtime.
#[derive(Debug)]
pub struct AppContext {
    config: StoreConfig,
    local: Arc<dyn LocalStore>,
    rest: Option<Arc<RestRemoteStore>>,
    service: DataService,
    reconciler: Option<PlanReconciler>,
    notices: NoticeLog,
}

impl AppContext {
    /// Validate `config`, install logging and open the configured stores.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, the local store cannot be
    /// opened, or the HTTP client cannot be built.
    pub fn init(config: StoreConfig) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        logging::init_tracing(&config.logging);

        let local = database::create_local_store(&config.local)
            .context("Failed to open local store")?;
        let rest = database::create_remote_store(&config.remote)
            .context("Failed to create hosted backend client")?;
        let remote = rest.clone().map(|r| r as Arc<dyn RemoteStore>);

        let context = Self::assemble(config, local, remote, rest);
        tracing::info!(
            remote = context.has_remote(),
            policy = ?context.config.auth_policy,
            "Application context initialised"
        );
        Ok(context)
    }

    /// Build a context around ready-made stores. Used by tests and embedders
    /// that bring their own adapters.
    #[must_use]
    pub fn from_parts(
        config: StoreConfig,
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self::assemble(config, local, remote, None)
    }

    fn assemble(
        config: StoreConfig,
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        rest: Option<Arc<RestRemoteStore>>,
    ) -> Self {
        let notices = NoticeLog::default();
        let service = DataService::new(Arc::clone(&local), remote.clone(), notices.clone())
            .with_policy(config.auth_policy)
            .with_mock_session(config.dev.mock_session);
        let reconciler = remote.map(|remote| PlanReconciler::new(remote, notices.clone()));

        Self {
            config,
            local,
            rest,
            service,
            reconciler,
            notices,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn service(&self) -> &DataService {
        &self.service
    }

    #[must_use]
    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    #[must_use]
    pub fn notices(&self) -> &NoticeLog {
        &self.notices
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.reconciler.is_some()
    }

    /// The admin reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RemoteRequired`] when no hosted backend is
    /// configured.
    pub fn reconciler(&self) -> StoreResult<&PlanReconciler> {
        self.reconciler.as_ref().ok_or_else(|| {
            StoreError::RemoteRequired("plan reconciliation needs a hosted backend".to_string())
        })
    }

    /// Swap the hosted session after sign-in or sign-out. No-op for contexts
    /// built from custom adapters.
    pub fn set_session_token(&self, token: Option<String>) {
        if let Some(rest) = &self.rest {
            tracing::info!(signed_in = token.is_some(), "Session token updated");
            rest.set_access_token(token);
        }
    }

    /// Tear down the context and return notices nobody drained.
    #[must_use]
    pub fn shutdown(self) -> Vec<Notice> {
        let pending = self.notices.drain();
        tracing::info!(pending_notices = pending.len(), "Application context shut down");
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryLocalStore, InMemoryRemoteStore};
    use tempfile::tempdir;

    #[test]
    fn test_init_local_only_in_memory() {
        let mut config = StoreConfig::default();
        config.local.in_memory = true;

        let context = AppContext::init(config).expect("init");
        assert!(!context.has_remote());
        assert!(matches!(
            context.reconciler(),
            Err(StoreError::RemoteRequired(_))
        ));
        assert!(context.shutdown().is_empty());
    }

    #[test]
    fn test_init_sqlite_with_remote() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut config = StoreConfig::default();
        config.local.data_dir = dir.path().join("profile");
        config.remote.url = Some("https://project.example.co".to_string());
        config.remote.anon_key = Some("anon".to_string());

        let context = AppContext::init(config).expect("init");
        assert!(context.has_remote());
        assert!(context.reconciler().is_ok());
        assert!(dir.path().join("profile").join("local-store.db").exists());
        context.set_session_token(Some("token".to_string()));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = StoreConfig::default();
        config.local.quota_bytes = 0;
        assert!(AppContext::init(config).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_returns_pending_notices() {
        let remote: Arc<dyn RemoteStore> = Arc::new(InMemoryRemoteStore::new());
        let context = AppContext::from_parts(
            StoreConfig::default(),
            Arc::new(InMemoryLocalStore::new()),
            Some(remote),
        );

        context.reconciler().expect("reconciler").run().await.expect("run");
        let pending = context.shutdown();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].message.starts_with("Fixed 0 plan(s)"));
    }
}
