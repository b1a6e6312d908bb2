//! Structured logging utilities.
//!
//! - [`init_tracing`] installs the process subscriber
//! - [`OpTimer`] times storage operations
//! - [`NoticeLog`] buffers user-facing notices (degraded saves, reconciliation
//!   results) for the UI to drain; it is owned by
//!   [`AppContext`](crate::context::AppContext) rather than being global

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless;
/// the second call is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Operation timer for measuring and logging execution duration.
///
/// # Examples
///
/// ```rust,ignore
/// use vitality_store::logging::OpTimer;
///
/// let timer = OpTimer::new("data_service", "save_intake");
/// let result = service.save_intake(answers).await;
/// timer.finish_with_result(result.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    /// Creates a new operation timer and logs the start.
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::debug!(component, operation, "Operation started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Finishes the timer and logs the duration.
    pub fn finish(self) {
        tracing::debug!(
            component = self.component,
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    /// Finishes the timer with result-aware logging.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.elapsed_ms();
        match result {
            Ok(_) => {
                tracing::debug!(
                    component = self.component,
                    operation = self.operation,
                    duration_ms,
                    "Operation completed successfully"
                );
            }
            Err(e) => {
                tracing::error!(
                    component = self.component,
                    operation = self.operation,
                    duration_ms,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A message the UI should show as a non-blocking toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded buffer of notices. Oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct NoticeLog {
    entries: Arc<parking_lot::Mutex<VecDeque<Notice>>>,
    capacity: usize,
}

impl Default for NoticeLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl NoticeLog {
    pub const DEFAULT_CAPACITY: usize = 50;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Warning, message.into());
    }

    fn push(&self, level: NoticeLevel, message: String) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Notice {
            level,
            message,
            at: Utc::now(),
        });
    }

    /// Take every pending notice, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Notice> {
        self.entries.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_creation() {
        let timer = OpTimer::new("test_component", "test_operation");
        assert_eq!(timer.component, "test_component");
        assert_eq!(timer.operation, "test_operation");
        timer.finish();
    }

    #[test]
    fn test_op_timer_finish_with_result() {
        let ok: Result<i32, String> = Ok(42);
        OpTimer::new("test", "operation").finish_with_result(ok.as_ref());

        let err: Result<i32, String> = Err("test error".to_string());
        OpTimer::new("test", "operation").finish_with_result(err.as_ref());
    }

    #[test]
    fn test_notice_log_is_bounded() {
        let log = NoticeLog::new(2);
        log.info("one");
        log.warn("two");
        log.warn("three");

        let notices = log.drain();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].message, "two");
        assert_eq!(notices[1].level, NoticeLevel::Warning);
        assert!(log.is_empty());
    }

    #[test]
    fn test_init_tracing_twice() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
