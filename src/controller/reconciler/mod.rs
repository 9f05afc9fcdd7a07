//! # Provisioning Reconciler
//!
//! Non-blocking state machine driving one managed resource towards its
//! external counterpart. Every invocation re-reads the persisted status,
//! takes at most one step and returns a requeue decision:
//!
//! 1. deletion intent hands over to the finalization handler
//! 2. an in-flight operation is polled
//! 3. a missing external resource is created
//! 4. an existing external resource is observed, and credentials are
//!    published on its first observed readiness
//!
//! Status changes are written once at the end of a reconcile through the
//! store's optimistic-concurrency path. Auxiliary identity IDs are the one
//! exception: they are written as soon as the identity is complete, before
//! the primary resource is created from them. A conflict aborts the
//! reconcile so it is retried from scratch.

mod credentials;
mod finalizer;
mod provisioning;

use crate::config::ControllerConfig;
use crate::constants::FINALIZER;
use crate::crd::{HasSpec, HasStatus, ManagedStatus};
use crate::observability::metrics;
use crate::provider::{ProviderError, ProvisioningClient};
use crate::store::{ObjectKey, ObjectStore, SecretStore, StoreError};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, Instrument};

pub use credentials::{external_name, provisioning_secret_name};

/// Managed resource kinds the reconciler can drive
pub trait Managed:
    Resource<DynamicType = ()> + HasSpec + HasStatus + Clone + Debug + Send + Sync + 'static
{
}

impl<T> Managed for T where
    T: Resource<DynamicType = ()> + HasSpec + HasStatus + Clone + Debug + Send + Sync + 'static
{
}

/// Errors returned from a reconcile
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The object changed underneath us, retry the whole reconcile
    #[error("conflict updating {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to publish connection secret: {0}")]
    Publish(String),
    #[error("cleanup incomplete: {0}")]
    Cleanup(String),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_))
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(key) => ReconcileError::Conflict(key),
            other => ReconcileError::Store(other),
        }
    }
}

/// When the scheduler should invoke the reconciler again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Right away, without backoff
    Immediately,
    After(Duration),
    /// Only on the next change event
    Never,
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::Immediately => Action::requeue(Duration::ZERO),
            Requeue::After(after) => Action::requeue(after),
            Requeue::Never => Action::await_change(),
        }
    }
}

/// Reconciler for managed resources of kind `K`
pub struct ProvisioningReconciler<K> {
    store: Arc<dyn ObjectStore<K>>,
    provider: Arc<dyn ProvisioningClient<K>>,
    secrets: Arc<dyn SecretStore>,
    config: ControllerConfig,
}

impl<K> Debug for ProvisioningReconciler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K: Managed> ProvisioningReconciler<K> {
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        provider: Arc<dyn ProvisioningClient<K>>,
        secrets: Arc<dyn SecretStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            secrets,
            config,
        }
    }

    /// Single entry point: reconcile the managed resource identified by `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let span = tracing::span!(
            tracing::Level::INFO,
            "reconcile",
            resource.kind = %K::kind(&()),
            resource.name = %key.name,
            resource.namespace = key.namespace.as_deref().unwrap_or_default(),
        );
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = self.reconcile_inner(key).instrument(span).await;

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        result
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let Some(mut obj) = self.store.get(key).await? else {
            debug!("{} {} no longer exists", K::kind(&()), key);
            return Ok(Requeue::Never);
        };

        if obj.meta().deletion_timestamp.is_some() {
            if !has_finalizer(&obj) {
                return Ok(Requeue::Never);
            }
            let original = current_status(&obj);
            return match self.finalize(&mut obj).await {
                Ok(finalizer::Finalization::Complete) => {
                    self.remove_finalizer(obj).await?;
                    Ok(Requeue::Never)
                }
                Ok(finalizer::Finalization::Pending(requeue)) => {
                    self.persist_status(&obj, &original).await?;
                    Ok(requeue)
                }
                Err(e) => {
                    self.persist_status(&obj, &original).await?;
                    Err(e)
                }
            };
        }

        if !has_finalizer(&obj) {
            obj.finalizers_mut().push(FINALIZER.to_string());
            obj = self.store.update(&obj).await?;
            debug!("Added finalizer to {}", key);
        }

        let original = current_status(&obj);
        let outcome = self.provision(&mut obj).await;
        // partial progress (identity IDs, failure counters) is kept even when the step failed
        self.persist_status(&obj, &original).await?;
        outcome
    }

    /// Write the status if this reconcile changed it
    async fn persist_status(&self, obj: &K, original: &ManagedStatus) -> Result<(), ReconcileError> {
        if obj.managed_status().is_some_and(|status| status != original) {
            self.store.update_status(obj).await?;
        }
        Ok(())
    }

    async fn remove_finalizer(&self, mut obj: K) -> Result<(), ReconcileError> {
        obj.finalizers_mut().retain(|f| f != FINALIZER);
        self.store.update(&obj).await?;
        Ok(())
    }
}

fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

fn current_status<K: HasStatus>(obj: &K) -> ManagedStatus {
    obj.managed_status().cloned().unwrap_or_default()
}

/// Generation used to pin non-retryable failures
fn generation<K: Resource>(obj: &K) -> i64 {
    obj.meta().generation.unwrap_or_default()
}
