//! # Controller Configuration
//!
//! Reconcile timing and retry bounds loaded from environment variables.

use super::env_var_or_default;
use crate::constants::*;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue while an external operation is in flight (seconds)
    pub creating_requeue_secs: u64,
    /// Resync interval for ready resources (seconds)
    pub sync_period_secs: u64,
    /// Consecutive observe failures before `Failed=True` is surfaced
    pub max_observe_failures: u32,
    /// Failed identity cleanups tolerated during deletion
    pub max_identity_cleanup_attempts: u32,
    pub error_backoff_min_secs: u64,
    pub error_backoff_max_secs: u64,
    /// Namespace to watch, all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            creating_requeue_secs: DEFAULT_CREATING_REQUEUE_SECS,
            sync_period_secs: DEFAULT_SYNC_PERIOD_SECS,
            max_observe_failures: DEFAULT_MAX_OBSERVE_FAILURES,
            max_identity_cleanup_attempts: DEFAULT_MAX_IDENTITY_CLEANUP_ATTEMPTS,
            error_backoff_min_secs: DEFAULT_ERROR_BACKOFF_MIN_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let error_backoff_min_secs = env_var_or_default("ERROR_BACKOFF_MIN_SECS", DEFAULT_ERROR_BACKOFF_MIN_SECS);
        Self {
            creating_requeue_secs: env_var_or_default("CREATING_REQUEUE_SECS", DEFAULT_CREATING_REQUEUE_SECS),
            sync_period_secs: env_var_or_default("SYNC_PERIOD_SECS", DEFAULT_SYNC_PERIOD_SECS),
            max_observe_failures: env_var_or_default("MAX_OBSERVE_FAILURES", DEFAULT_MAX_OBSERVE_FAILURES),
            max_identity_cleanup_attempts: env_var_or_default(
                "MAX_IDENTITY_CLEANUP_ATTEMPTS",
                DEFAULT_MAX_IDENTITY_CLEANUP_ATTEMPTS,
            ),
            error_backoff_min_secs,
            // max below min would make the backoff shrink
            error_backoff_max_secs: env_var_or_default("ERROR_BACKOFF_MAX_SECS", DEFAULT_ERROR_BACKOFF_MAX_SECS)
                .max(error_backoff_min_secs),
            watch_namespace: std::env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty()),
        }
    }

    pub fn creating_requeue(&self) -> Duration {
        Duration::from_secs(self.creating_requeue_secs)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }
}
