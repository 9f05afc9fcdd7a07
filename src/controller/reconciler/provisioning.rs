//! # Provisioning Steps
//!
//! Create, poll and observe transitions of the state machine.

use super::{generation, Managed, ProvisioningReconciler, ReconcileError, Requeue};
use crate::crd::{Condition, ConditionStatus, ConditionType, ManagedStatus};
use crate::provider::{
    CreateRequest, ManagedIdentity, ObservedPhase, ObservedResource, OperationPoll, OperationToken,
    ProviderError,
};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

const REASON_CREATE_REJECTED: &str = "CreateRejected";
const REASON_IDENTITY_REJECTED: &str = "IdentityRejected";
const REASON_PROVIDER_FAILED: &str = "ProviderFailed";
pub(super) const REASON_OBSERVE_FAILED: &str = "ObserveFailed";

impl<K: Managed> ProvisioningReconciler<K> {
    pub(super) async fn provision(&self, obj: &mut K) -> Result<Requeue, ReconcileError> {
        if obj.managed_status().map(ManagedStatus::has_running_operation) == Some(true) {
            return self.poll(obj).await;
        }

        if obj.managed_status().is_none_or(|s| s.resource_name.is_empty()) {
            let name = super::external_name(obj);
            obj.managed_status_mut().resource_name = name;
        }

        match self.provider.observe(obj).await {
            Ok(Some(observed)) => self.on_observed(obj, observed).await,
            Ok(None) => self.begin_creation(obj).await,
            Err(e) => Err(self.on_observe_failure(obj, e)),
        }
    }

    /// Poll the in-flight operation recorded on the status
    pub(super) async fn poll_running_operation(&self, obj: &mut K) -> Result<OperationPoll, ReconcileError> {
        let token = OperationToken(obj.managed_status_mut().running_operation.clone());
        match self.provider.poll_operation(obj, &token).await {
            Ok(OperationPoll::InProgress) => Ok(OperationPoll::InProgress),
            Ok(done) => {
                if let OperationPoll::Failed(message) = &done {
                    warn!("Operation for {} finished unsuccessfully: {}", obj.name_any(), message);
                }
                obj.managed_status_mut().running_operation.clear();
                Ok(done)
            }
            Err(e) if e.is_retryable() => Err(e.into()),
            Err(e) => {
                // an unreadable token can never complete
                warn!("Discarding operation token for {}: {}", obj.name_any(), e);
                obj.managed_status_mut().running_operation.clear();
                Ok(OperationPoll::Failed(format!("operation could not be tracked: {e}")))
            }
        }
    }

    async fn poll(&self, obj: &mut K) -> Result<Requeue, ReconcileError> {
        match self.poll_running_operation(obj).await? {
            OperationPoll::InProgress => {
                debug!("⏳ Operation for {} still in progress", obj.name_any());
                Ok(Requeue::After(self.config.creating_requeue()))
            }
            OperationPoll::Succeeded => {
                info!("Operation for {} completed, observing", obj.name_any());
                Ok(Requeue::Immediately)
            }
            OperationPoll::Failed(message) => {
                // pinned so a create that left nothing behind is not reissued
                self.record_failure(obj, REASON_PROVIDER_FAILED, message);
                Ok(Requeue::Immediately)
            }
        }
    }

    async fn begin_creation(&self, obj: &mut K) -> Result<Requeue, ReconcileError> {
        let generation = generation(obj);
        if obj.managed_status().is_some_and(|s| s.failed_at(Some(generation))) {
            debug!(
                "Not retrying creation of {} at generation {} after a rejected request",
                obj.name_any(),
                generation
            );
            return Ok(Requeue::After(self.config.sync_period()));
        }

        let mut secret = self.load_or_generate_provisioning_secret(obj).await?;

        let mut identity = identity_from_status(obj.managed_status_mut());
        // a stored client secret only belongs to the application recorded on the status
        if identity.application_object_id.is_some() {
            identity.client_secret = secret.client_secret.clone();
        }

        if self.provider.requires_identity() && !identity.is_complete() {
            info!("Creating auxiliary identity for {}", obj.name_any());
            let result = self.provider.ensure_identity(obj, &mut identity).await;

            record_identity(obj.managed_status_mut(), &identity);
            if identity.client_secret != secret.client_secret {
                secret.client_secret = identity.client_secret.clone();
                self.store_provisioning_secret(obj, &secret).await?;
            }

            match result {
                Ok(()) => {
                    // identity IDs must be durable before anything references them
                    let stored = self.store.update_status(obj).await?;
                    obj.meta_mut().resource_version = stored.meta().resource_version.clone();
                }
                Err(e) if e.is_retryable() => {
                    warn!("Auxiliary identity for {} not ready yet: {}", obj.name_any(), e);
                    return Err(e.into());
                }
                Err(e) => return Ok(self.reject(obj, REASON_IDENTITY_REJECTED, &e)),
            }
        }

        let resource_name = obj.managed_status_mut().resource_name.clone();
        let request = CreateRequest {
            resource_name: &resource_name,
            secret: &secret,
            identity: &identity,
        };

        match self.provider.begin_create(obj, &request).await {
            Ok(token) => {
                info!("🔄 Started creating {} as {}", obj.name_any(), resource_name);
                let status = obj.managed_status_mut();
                status.running_operation = token.0;
                status.failure_generation = None;
                status.with_conditions(|c| {
                    c.set_creating();
                    if c.get(ConditionType::Ready).is_some() {
                        c.set(Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason("Creating"));
                    }
                    c.clear_failed();
                });
                Ok(Requeue::After(self.config.creating_requeue()))
            }
            Err(e) if e.is_retryable() => Err(e.into()),
            Err(e) => Ok(self.reject(obj, REASON_CREATE_REJECTED, &e)),
        }
    }

    /// Record a non-retryable rejection, pinned to the current generation
    fn reject(&self, obj: &mut K, reason: &str, err: &ProviderError) -> Requeue {
        warn!("❌ Provider rejected {}: {}", obj.name_any(), err);
        self.record_failure(obj, reason, err.to_string());
        Requeue::After(self.config.sync_period())
    }

    /// Set `Failed` and pin it to the current generation
    fn record_failure(&self, obj: &mut K, reason: &str, message: String) {
        let generation = generation(obj);
        let status = obj.managed_status_mut();
        status.failure_generation = Some(generation);
        status.with_conditions(|c| {
            if c.get(ConditionType::Ready).is_some() {
                c.set(Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason(reason));
            }
            c.set_failed(reason, message);
        });
    }

    async fn on_observed(&self, obj: &mut K, observed: ObservedResource) -> Result<Requeue, ReconcileError> {
        {
            let status = obj.managed_status_mut();
            status.state.clone_from(&observed.state);
            status.endpoint.clone_from(&observed.endpoint);
            status.provider_id.clone_from(&observed.provider_id);
            status.observe_failures = 0;
            let observe_failed = status
                .conditioned()
                .get(ConditionType::Failed)
                .is_some_and(|c| c.status == ConditionStatus::True && c.reason.as_deref() == Some(REASON_OBSERVE_FAILED));
            if observe_failed {
                status.with_conditions(|c| c.clear_failed());
            }
        }

        match &observed.phase {
            ObservedPhase::Ready => {
                if !obj.managed_status_mut().is_ready() {
                    // Ready only flips once the connection secret is written
                    self.publish(obj, &observed).await?;
                    let status = obj.managed_status_mut();
                    status.failure_generation = None;
                    status.with_conditions(|c| c.set_ready());
                    info!("✅ {} is ready at {}", obj.name_any(), observed.endpoint);
                }
                Ok(Requeue::After(self.config.sync_period()))
            }
            ObservedPhase::Provisioning => {
                debug!("⏳ {} is {}", obj.name_any(), observed.state);
                Ok(Requeue::After(self.config.creating_requeue()))
            }
            ObservedPhase::Failed(message) => {
                warn!("❌ Provider reports {} as failed: {}", obj.name_any(), message);
                let generation = generation(obj);
                let status = obj.managed_status_mut();
                status.failure_generation = Some(generation);
                status.with_conditions(|c| {
                    c.set(Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason(REASON_PROVIDER_FAILED));
                    c.set_failed(REASON_PROVIDER_FAILED, message.clone());
                });
                Ok(Requeue::After(self.config.sync_period()))
            }
        }
    }

    /// Count a failed observation and surface it once the bound is reached
    fn on_observe_failure(&self, obj: &mut K, err: ProviderError) -> ReconcileError {
        let max = self.config.max_observe_failures;
        let name = obj.name_any();
        let status = obj.managed_status_mut();
        status.observe_failures = status.observe_failures.saturating_add(1);
        warn!(
            "Failed to observe {} ({}/{}): {}",
            name, status.observe_failures, max, err
        );
        if status.observe_failures >= max {
            let message = format!("{} consecutive observe failures: {}", status.observe_failures, err);
            status.with_conditions(|c| c.set_failed(REASON_OBSERVE_FAILED, message));
        }
        err.into()
    }
}

pub(super) fn identity_from_status(status: &ManagedStatus) -> ManagedIdentity {
    ManagedIdentity {
        application_object_id: status.application_object_id.clone(),
        application_id: status.application_id.clone(),
        service_principal_id: status.service_principal_id.clone(),
        client_secret: None,
    }
}

fn record_identity(status: &mut ManagedStatus, identity: &ManagedIdentity) {
    status.application_object_id.clone_from(&identity.application_object_id);
    status.application_id.clone_from(&identity.application_id);
    status.service_principal_id.clone_from(&identity.service_principal_id);
}
