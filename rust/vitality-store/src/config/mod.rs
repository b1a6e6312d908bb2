//! Configuration management for the persistence layer.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `config/vitality-store.{toml,yaml,json}` if present
//! 3. `VITALITY__*` environment variables (`VITALITY__REMOTE__URL`, ...)
//!
//! A `.env` file in the working directory is loaded before the environment
//! is read.

pub mod error;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};

use crate::database::service::AuthCheckPolicy;

/// Browser local-storage budget the local store mirrors.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    /// What to do when the session check itself fails.
    #[serde(default)]
    pub auth_policy: AuthCheckPolicy,
    #[serde(default)]
    pub dev: DevConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StoreConfig {
    /// Load and validate configuration.
    ///
    /// # Errors
    ///
    /// Fails when a source cannot be parsed or the result does not validate.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    ///
    /// # Errors
    ///
    /// Fails when a source cannot be parsed.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("local.data_dir", "./data")?
            .set_default("local.quota_bytes", DEFAULT_QUOTA_BYTES)?
            .set_default("remote.timeout_secs", 10)?
            .set_default("auth_policy", "fail_open_to_local")?
            .set_default("logging.level", "info")?
            .add_source(config::File::with_name("config/vitality-store").required(false))
            .add_source(
                config::Environment::with_prefix("VITALITY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check value ranges and cross-setting requirements.
    ///
    /// # Errors
    ///
    /// Returns every problem found, wrapped in `Multiple` when there are
    /// several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.local.quota_bytes == 0 {
            errors.push(ConfigurationError::invalid(
                "local.quota_bytes is 0",
                "Set VITALITY__LOCAL__QUOTA_BYTES to a positive byte count",
            ));
        }

        if self.remote.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "remote.timeout_secs is 0",
                "Set VITALITY__REMOTE__TIMEOUT_SECS to a positive number of seconds",
            ));
        }

        match self.remote.url.as_deref() {
            Some(raw) => {
                match url::Url::parse(raw) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => errors.push(ConfigurationError::invalid(
                        format!("remote.url uses unsupported scheme '{}'", parsed.scheme()),
                        "Use an http:// or https:// project URL",
                    )),
                    Err(e) => errors.push(ConfigurationError::invalid(
                        format!("remote.url '{raw}' is not a valid URL: {e}"),
                        "Use the full project URL, e.g. https://project.example.co",
                    )),
                }
                let anon_key = self.remote.anon_key.as_deref().unwrap_or_default();
                if anon_key.trim().is_empty() {
                    errors.push(ConfigurationError::missing_required(
                        "remote.anon_key",
                        "Hosted storage",
                        "VITALITY__REMOTE__ANON_KEY",
                    ));
                }
            }
            None => {
                if self.remote.access_token.is_some() {
                    errors.push(ConfigurationError::incompatible(
                        "remote.access_token",
                        "missing remote.url",
                        "A session token is meaningless without a backend to send it to",
                    ));
                }
            }
        }

        match ConfigurationError::from_list(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether a hosted backend is configured.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.url.is_some()
    }
}

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding the SQLite file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Byte budget across all keys.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
    /// Keep everything in memory (nothing survives shutdown).
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            quota_bytes: default_quota_bytes(),
            in_memory: false,
        }
    }
}

impl LocalConfig {
    /// Path of the SQLite file inside `data_dir`.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("local-store.db")
    }
}

/// Hosted backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project URL. `None` keeps the store local-only.
    #[serde(default)]
    pub url: Option<String>,
    /// Public API key sent with every request.
    #[serde(default)]
    pub anon_key: Option<String>,
    /// Session token restored from a previous sign-in.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Development switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    /// Honour a `mock_session` entry in the local store.
    #[serde(default)]
    pub mock_session: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_quota_bytes() -> u64 {
    DEFAULT_QUOTA_BYTES
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}
