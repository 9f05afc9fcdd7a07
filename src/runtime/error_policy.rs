//! # Error Policy
//!
//! Error handling and backoff for the controller watch loops.
//!
//! Backoff is tracked per resource so one failing resource does not slow down
//! the others. Each controller owns its tracker, so resources of different
//! kinds sharing a name never share backoff. Conflicts are retried
//! immediately without consuming backoff.

use crate::constants;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::ReconcileError;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Backoff progress of one resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
    pub last_error: Instant,
}

impl BackoffState {
    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Instant::now();
    }
}

/// Entries idle for this many maximum backoffs are forgotten
const IDLE_BACKOFF_FACTOR: u64 = 4;

/// Per-resource backoff states keyed by `<namespace>/<name>`
#[derive(Debug)]
pub struct BackoffTracker {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record an error and return the delay in seconds with the error count
    pub fn next_delay(&self, key: &str) -> (u64, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let idle = Duration::from_secs(self.max_secs.saturating_mul(IDLE_BACKOFF_FACTOR));
                states.retain(|_, state| state.last_error.elapsed() < idle);
                let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
                    backoff: FibonacciBackoff::new(self.min_secs, self.max_secs),
                    error_count: 0,
                    last_error: Instant::now(),
                });
                state.increment_error();
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
            }
        }
    }

    /// Forget the backoff of a resource after a successful reconcile
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }

    /// Forget resources whose last error is older than `idle`, such as
    /// objects deleted while backing off
    pub fn prune_idle(&self, idle: Duration) {
        if let Ok(mut states) = self.states.lock() {
            states.retain(|_, state| state.last_error.elapsed() < idle);
        }
    }

    pub fn tracked(&self) -> usize {
        self.states.lock().map(|states| states.len()).unwrap_or_default()
    }
}

/// Decide how to requeue a resource whose reconcile failed
pub fn handle_reconciliation_error(kind: &str, key: &str, error: &ReconcileError, backoff: &BackoffTracker) -> Action {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind,
        resource.key = key,
        error = %error
    );
    let _error_guard = error_span.enter();

    if error.is_conflict() {
        info!("{} {} changed during reconcile, retrying immediately", kind, key);
        metrics::increment_requeues_total("conflict");
        return Action::requeue(Duration::ZERO);
    }

    error!("Reconciliation error for {} {}: {}", kind, key, error);
    metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = backoff.next_delay(key);
    let next_trigger_time = chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "Retrying {} {} in {}s (error count: {}, next retry at {})",
        kind,
        key,
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Kind of failure reported by a watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch or controller stream error by its message
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    if error.contains("401") || error.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410") || error.contains("too old resource version") || error.contains("Gone") {
        WatchErrorKind::Expired
    } else if error.contains("429") || error.contains("TooManyRequests") {
        WatchErrorKind::Throttled
    } else if error.contains("ObjectNotFound") || (error.contains("404") && error.contains("not found")) {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log a controller stream error at a level matching its kind
pub fn log_controller_error(kind: &str, error: &str) {
    match classify_watch_error(error) {
        WatchErrorKind::Unauthorized => {
            error!(
                "Watch for {} failed with 401 Unauthorized, check the controller's ClusterRole and ServiceAccount: {}",
                kind, error
            );
        }
        WatchErrorKind::Expired => {
            warn!("Watch for {} expired (410), it will restart: {}", kind, error);
        }
        WatchErrorKind::Throttled => {
            warn!("API server throttled the {} watch (429): {}", kind, error);
        }
        WatchErrorKind::NotFound => {
            warn!("{} not found (likely deleted), continuing watch", kind);
        }
        WatchErrorKind::Other => {
            // reconcile failures are already logged by the error policy
            tracing::debug!("{} controller stream error: {}", kind, error);
        }
    }
}
