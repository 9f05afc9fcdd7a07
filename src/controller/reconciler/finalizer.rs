//! # Finalization Handler
//!
//! Tears down the external resource and its auxiliary identity before the
//! finalizer is released. Delete operations are tracked with the same
//! operation token as creates.

use super::provisioning::identity_from_status;
use super::{Managed, ProvisioningReconciler, ReconcileError, Requeue};
use crate::crd::ReclaimPolicy;
use crate::provider::OperationPoll;
use kube::ResourceExt;
use tracing::{info, warn};

/// Outcome of a finalization step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Finalization {
    /// External cleanup is confirmed, the finalizer can go
    Complete,
    Pending(Requeue),
}

impl<K: Managed> ProvisioningReconciler<K> {
    pub(super) async fn finalize(&self, obj: &mut K) -> Result<Finalization, ReconcileError> {
        let name = obj.name_any();

        if obj.reclaim_policy() == ReclaimPolicy::Retain {
            info!("Retaining external resource for {}, releasing finalizer", name);
            return Ok(Finalization::Complete);
        }

        self.cleanup_identity(obj).await;

        if obj.managed_status_mut().has_running_operation() {
            if self.poll_running_operation(obj).await? == OperationPoll::InProgress {
                info!("⏳ Waiting for in-flight operation on {} before deleting", name);
                obj.managed_status_mut().with_conditions(|c| {
                    if !c.is_true(crate::crd::ConditionType::Deleting) {
                        c.set_deleting(None);
                    }
                });
                return Ok(Finalization::Pending(Requeue::After(self.config.creating_requeue())));
            }
        }

        let status = obj.managed_status_mut();
        if status.provider_id.is_empty() && !status.creation_attempted() {
            info!("{} was never created externally, releasing finalizer", name);
            return self.release_if_identity_cleaned(obj);
        }

        match self.provider.observe(obj).await? {
            None => {
                info!("✅ External resource for {} is gone", name);
                self.release_if_identity_cleaned(obj)
            }
            Some(_) => match self.provider.begin_delete(obj).await? {
                Some(token) => {
                    info!("🔄 Started deleting external resource for {}", name);
                    let status = obj.managed_status_mut();
                    status.running_operation = token.0;
                    status.with_conditions(|c| c.set_deleting(None));
                    Ok(Finalization::Pending(Requeue::After(self.config.creating_requeue())))
                }
                None => self.release_if_identity_cleaned(obj),
            },
        }
    }

    /// Best-effort removal of recorded identity objects
    async fn cleanup_identity(&self, obj: &mut K) {
        let status = obj.managed_status_mut();
        if !status.has_identity() {
            return;
        }
        let identity = identity_from_status(status);
        match self.provider.delete_identity(obj, &identity).await {
            Ok(()) => {
                let status = obj.managed_status_mut();
                status.application_object_id = None;
                status.application_id = None;
                status.service_principal_id = None;
                status.identity_cleanup_attempts = 0;
            }
            Err(e) => {
                let max = self.config.max_identity_cleanup_attempts;
                let name = obj.name_any();
                let status = obj.managed_status_mut();
                status.identity_cleanup_attempts = status.identity_cleanup_attempts.saturating_add(1);
                let message = format!(
                    "identity cleanup failed (attempt {}/{}): {}",
                    status.identity_cleanup_attempts, max, e
                );
                warn!("{}: {}", name, message);
                status.with_conditions(|c| c.set_deleting(Some(message)));
            }
        }
    }

    /// Finish teardown unless identity objects are still recorded and retries remain
    fn release_if_identity_cleaned(&self, obj: &mut K) -> Result<Finalization, ReconcileError> {
        let max = self.config.max_identity_cleanup_attempts;
        let name = obj.name_any();
        let status = obj.managed_status_mut();
        if !status.has_identity() {
            return Ok(Finalization::Complete);
        }
        if status.identity_cleanup_attempts >= max {
            warn!(
                "Giving up identity cleanup for {} after {} attempts, orphaned application {:?} and service principal {:?}",
                name,
                status.identity_cleanup_attempts,
                status.application_object_id,
                status.service_principal_id
            );
            return Ok(Finalization::Complete);
        }
        Err(ReconcileError::Cleanup(format!(
            "auxiliary identity of {name} not yet deleted"
        )))
    }
}
