//! Vitality Store - persistence and at-rest encryption for the longevity planner
//!
//! One API for intake answers, 30-day plans, daily progress and supplement
//! inventory, backed by either a hosted relational backend or an encrypted
//! local key-value store:
//!
//! - **Per-call routing**: each operation checks the session and picks the
//!   backend; a failed check falls back to local storage by policy
//! - **Encryption at rest**: local payloads are sealed with AES-256-GCM under
//!   a key derived from the owner id
//! - **Degraded saves**: a full local store produces a warning, not a crash
//! - **Reconciliation**: an admin job restores one active plan per owner
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`context`]: Process-wide [`AppContext`] with init and shutdown
//! - [`database`]: Stores, encryption, data service and reconciler
//! - [`domain`]: Intake, plan, progress and inventory models
//! - [`error`]: Error taxonomy
//! - [`logging`]: Tracing setup, operation timers and user notices
//!
//! # Example
//!
//! ```rust,ignore
//! use vitality_store::{config::StoreConfig, AppContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = AppContext::init(StoreConfig::load()?)?;
//!
//!     let answers = serde_json::json!({ "name": "Ana", "age": 41 });
//!     let outcome = context
//!         .service()
//!         .save_intake(answers.as_object().cloned().unwrap_or_default())
//!         .await?;
//!     println!("saved: {outcome:?}");
//!
//!     for notice in context.shutdown() {
//!         println!("{}", notice.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::StoreConfig;
pub use context::AppContext;
pub use database::{AuthCheckPolicy, DataService, SaveOutcome};
pub use error::{StoreError, StoreResult};
