//! # Claim Binding Controller
//!
//! Binds an unbound claim to a managed resource created from its class, then
//! mirrors the managed resource's conditions back onto the claim and copies
//! the connection secret into the secret the claim asked for.
//!
//! The managed resource is owned by its claim, so deleting the claim lets the
//! garbage collector delete the managed resource, which in turn runs the
//! provisioning finalizer.

use super::{Binding, ClaimVariant, ManagedVariant, ResolveError, ResourceFamily};
use crate::config::ControllerConfig;
use crate::controller::reconciler::{ReconcileError, Requeue};
use crate::crd::{
    BindingPhase, ClaimFields, ClaimStatus, ConditionedStatus, KubernetesCluster, ManagedReference,
    ManagedStatus, MySQLInstance, PostgreSQLInstance,
};
use crate::observability::metrics;
use crate::store::{BindingStore, ObjectKey, ObjectStore, SecretStore};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Claim kinds handled by the binding controller
pub trait Claim:
    Resource<DynamicType = ()> + ClaimFields + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn into_variant(self) -> ClaimVariant;
}

impl Claim for PostgreSQLInstance {
    fn into_variant(self) -> ClaimVariant {
        ClaimVariant::Postgresql(self)
    }
}

impl Claim for MySQLInstance {
    fn into_variant(self) -> ClaimVariant {
        ClaimVariant::Mysql(self)
    }
}

impl Claim for KubernetesCluster {
    fn into_variant(self) -> ClaimVariant {
        ClaimVariant::Kubernetes(self)
    }
}

/// Namespace of the class a claim refers to
pub fn class_namespace<C: Claim>(claim: &C) -> String {
    claim
        .class_ref()
        .namespace
        .clone()
        .unwrap_or_else(|| claim.namespace().unwrap_or_default())
}

/// Verify a recorded reference still points at the claim's managed kind
pub fn check_reference(family: ResourceFamily, reference: &ManagedReference) -> Result<(), ResolveError> {
    let expected = family.managed_kind();
    if reference.kind == expected {
        Ok(())
    } else {
        Err(ResolveError::WrongKind {
            expected,
            found: reference.kind.clone(),
        })
    }
}

/// Claim status mirroring a bound managed resource
pub fn mirrored_status(managed: Option<&ManagedStatus>) -> ClaimStatus {
    ClaimStatus {
        binding_phase: BindingPhase::Bound,
        conditions: managed.map(|s| s.conditions.clone()).unwrap_or_default(),
        message: None,
    }
}

/// Claim status recording a problem, keeping previously mirrored conditions
pub fn failed_status(current: Option<&ClaimStatus>, reason: &str, message: &str) -> ClaimStatus {
    let current = current.cloned().unwrap_or_default();
    let mut conditioned = ConditionedStatus {
        conditions: current.conditions,
    };
    conditioned.set_failed(reason, message);
    ClaimStatus {
        binding_phase: current.binding_phase,
        conditions: conditioned.conditions,
        message: Some(message.to_string()),
    }
}

/// Binding controller for claims of kind `C`
pub struct ClaimBinder<C> {
    claims: Arc<dyn ObjectStore<C>>,
    resources: Arc<dyn BindingStore>,
    secrets: Arc<dyn SecretStore>,
    config: ControllerConfig,
}

impl<C> Debug for ClaimBinder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimBinder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Claim> ClaimBinder<C> {
    pub fn new(
        claims: Arc<dyn ObjectStore<C>>,
        resources: Arc<dyn BindingStore>,
        secrets: Arc<dyn SecretStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            claims,
            resources,
            secrets,
            config,
        }
    }

    /// Reconcile the claim identified by `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let span = tracing::span!(
            tracing::Level::INFO,
            "claim.reconcile",
            resource.name = %key.name,
            resource.namespace = key.namespace.as_deref().unwrap_or_default(),
            resource.kind = %C::kind(&())
        );
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = self.reconcile_inner(key).instrument(span).await;

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        result
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let Some(claim) = self.claims.get(key).await? else {
            debug!("{} {} no longer exists", C::kind(&()), key);
            return Ok(Requeue::Never);
        };
        if claim.meta().deletion_timestamp.is_some() {
            debug!("Claim {} is being deleted, managed resource follows via ownership", key);
            return Ok(Requeue::Never);
        }
        match claim.resource_ref().cloned() {
            None => self.bind(claim).await,
            Some(reference) => self.sync_bound(claim, &reference).await,
        }
    }

    async fn bind(&self, claim: C) -> Result<Requeue, ReconcileError> {
        let class_key = ObjectKey::namespaced(&class_namespace(&claim), &claim.class_ref().name);
        let Some(class) = self.resources.class(&class_key).await? else {
            let message = format!("resource class {class_key} not found");
            warn!("Cannot bind {}: {}", claim.name_any(), message);
            let status = failed_status(claim.claim_status(), "ClassNotFound", &message);
            self.write_status(claim, status).await?;
            return Ok(Requeue::After(self.config.sync_period()));
        };

        let desired = Binding::assemble(claim.clone().into_variant(), class, None)
            .and_then(|binding| binding.desired_managed());
        let desired = match desired {
            Ok(desired) => desired,
            Err(e) => {
                warn!("Cannot bind {}: {}", claim.name_any(), e);
                let status = failed_status(claim.claim_status(), e.reason(), &e.to_string());
                self.write_status(claim, status).await?;
                // only a change to the claim or class can fix this
                return Ok(Requeue::Never);
            }
        };

        // an earlier reconcile may have created it before failing to record the reference
        let outcome = self.resources.create_managed(&desired).await?;
        debug!(
            "{} {}/{}: {:?}",
            desired.family().managed_kind(),
            desired.namespace().unwrap_or_default(),
            desired.name(),
            outcome
        );

        let mut bound = claim;
        bound.set_resource_ref(desired.reference());
        let bound = self.claims.update(&bound).await?;
        let name = bound.name_any();
        self.write_status(bound, mirrored_status(desired.managed_status()))
            .await?;

        metrics::increment_claims_bound();
        info!(
            "Bound {} {} to {} {}",
            C::kind(&()),
            name,
            desired.family().managed_kind(),
            desired.name()
        );
        Ok(Requeue::After(self.config.creating_requeue()))
    }

    async fn sync_bound(&self, claim: C, reference: &ManagedReference) -> Result<Requeue, ReconcileError> {
        let family = claim.clone().into_variant().family();
        if let Err(e) = check_reference(family, reference) {
            warn!("Claim {} references the wrong kind: {}", claim.name_any(), e);
            let status = failed_status(claim.claim_status(), e.reason(), &e.to_string());
            self.write_status(claim, status).await?;
            return Ok(Requeue::Never);
        }

        let managed_key = ObjectKey::namespaced(&reference.namespace, &reference.name);
        let Some(managed) = self.resources.managed(family, &managed_key).await? else {
            let message = format!("{} {} not found", reference.kind, managed_key);
            warn!("Claim {}: {}", claim.name_any(), message);
            let status = failed_status(claim.claim_status(), "ManagedNotFound", &message);
            self.write_status(claim, status).await?;
            return Ok(Requeue::After(self.config.sync_period()));
        };

        let status = mirrored_status(managed.managed_status());
        let claim = if claim.claim_status() == Some(&status) {
            claim
        } else {
            self.write_status(claim, status).await?
        };

        if !managed.managed_status().is_some_and(ManagedStatus::is_ready) {
            return Ok(Requeue::After(self.config.creating_requeue()));
        }
        if !self.propagate_secret(&claim, &managed).await? {
            return Ok(Requeue::After(self.config.creating_requeue()));
        }
        Ok(Requeue::After(self.config.sync_period()))
    }

    /// Copy the managed connection secret into the claim's requested secret.
    /// Returns false when the source secret is not there yet.
    async fn propagate_secret(&self, claim: &C, managed: &ManagedVariant) -> Result<bool, ReconcileError> {
        let (Some(target), Some(source)) = (claim.write_connection_secret_to_ref(), managed.connection_secret_ref())
        else {
            return Ok(true);
        };
        let source_ns = managed.namespace().unwrap_or_default();
        let Some(data) = self.secrets.read(&source.name, &source_ns).await? else {
            debug!("Connection secret {}/{} not published yet", source_ns, source.name);
            return Ok(false);
        };
        let namespace = claim.namespace().unwrap_or_default();
        let outcome = self
            .secrets
            .write(&target.name, &namespace, data, claim.controller_owner_ref(&()))
            .await?;
        debug!(
            "Propagated connection secret to {}/{} ({:?})",
            namespace, target.name, outcome
        );
        Ok(true)
    }

    async fn write_status(&self, mut claim: C, status: ClaimStatus) -> Result<C, ReconcileError> {
        claim.set_claim_status(status);
        Ok(self.claims.update_status(&claim).await?)
    }
}
