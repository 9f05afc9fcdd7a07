//! Finalization: external teardown before the finalizer is released

use super::fakes::*;
use resource_claim_controller::config::ControllerConfig;
use resource_claim_controller::controller::reconciler::{ReconcileError, Requeue};
use resource_claim_controller::crd::{ConditionType, ManagedStatus, ReclaimPolicy};
use resource_claim_controller::provider::{ObservedPhase, OperationPoll, ProviderError};

fn ready_status() -> ManagedStatus {
    let mut status = ManagedStatus {
        resource_name: "postgresqlserver-orders-4a7e2c1b".to_string(),
        provider_id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.DBforPostgreSQL/flexibleServers/orders-db"
            .to_string(),
        state: "Ready".to_string(),
        endpoint: "host:5432".to_string(),
        ..Default::default()
    };
    status.with_conditions(|c| {
        c.set_creating();
        c.set_ready();
    });
    status
}

#[tokio::test]
async fn test_delete_waits_for_operation_then_releases_finalizer() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), ready_status()),
        MockProvisioner::default(),
    );
    h.store.mark_deleted(&h.key);
    h.provider
        .on_observe(Ok(Some(observed(ObservedPhase::Ready, "host:5432"))))
        .on_delete(Ok(Some("tok-del")))
        .on_poll(Ok(OperationPoll::Succeeded))
        .on_observe(Ok(None));

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().creating_requeue()));
    let status = h.status();
    assert_eq!(status.running_operation, "tok-del");
    assert!(status.conditioned().is_true(ConditionType::Deleting));
    assert!(!status.is_ready());
    assert!(h.object().is_some(), "finalizer must hold the object while deleting");

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Never);
    assert!(h.object().is_none());
    assert_eq!(Calls::get(&h.provider.calls.delete), 1);
    assert_eq!(Calls::get(&h.provider.calls.observe), 2);
}

#[tokio::test]
async fn test_delete_of_already_gone_resource_completes() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), ready_status()),
        MockProvisioner::default(),
    );
    h.store.mark_deleted(&h.key);
    h.provider.on_observe(Ok(None));

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_none());
    assert_eq!(Calls::get(&h.provider.calls.delete), 0);
}

#[tokio::test]
async fn test_delete_waits_for_inflight_create() {
    let mut status = ready_status();
    status.running_operation = "tok-create".to_string();
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), status),
        MockProvisioner::default(),
    );
    h.store.mark_deleted(&h.key);
    h.provider.on_poll(Ok(OperationPoll::InProgress));

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().creating_requeue()));
    assert_eq!(h.status().running_operation, "tok-create");
    assert!(h.status().conditioned().is_true(ConditionType::Deleting));
    assert_eq!(Calls::get(&h.provider.calls.delete), 0);
    assert!(h.object().is_some());
}

#[tokio::test]
async fn test_retain_policy_skips_external_delete() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Retain), ready_status()),
        MockProvisioner::default(),
    );
    h.store.mark_deleted(&h.key);

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_none());
    assert_eq!(Calls::get(&h.provider.calls.observe), 0);
    assert_eq!(Calls::get(&h.provider.calls.delete), 0);
}

#[tokio::test]
async fn test_never_created_resource_releases_immediately() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), ManagedStatus::default()),
        MockProvisioner::default(),
    );
    h.store.mark_deleted(&h.key);

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_none());
    assert_eq!(Calls::get(&h.provider.calls.observe), 0);
}

#[tokio::test]
async fn test_deleted_object_without_finalizer_is_ignored() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.store.modify(&h.key, |obj| {
        obj.metadata.finalizers = Some(vec!["other.example.io/keep".to_string()]);
    });
    h.store.mark_deleted(&h.key);

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_some());
    assert_eq!(Calls::get(&h.provider.calls.observe), 0);
}

fn identity_status() -> ManagedStatus {
    ManagedStatus {
        resource_name: "akscluster-team-a-7c0ffee0".to_string(),
        application_object_id: Some("app-object-1".to_string()),
        application_id: Some("app-client-1".to_string()),
        service_principal_id: Some("sp-1".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_identity_cleanup_retries_then_succeeds() {
    let h = Harness::new(existing(aks_cluster(), identity_status()), MockProvisioner::with_identity());
    h.store.mark_deleted(&h.key);
    h.provider
        .fail_identity_delete(ProviderError::Transient("graph throttled".to_string()));

    let err = h.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cleanup(_)));
    let status = h.status();
    assert_eq!(status.identity_cleanup_attempts, 1);
    assert!(status.has_identity());
    assert!(status.conditioned().is_true(ConditionType::Deleting));

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_none());
    assert_eq!(Calls::get(&h.provider.calls.delete_identity), 2);
}

#[tokio::test]
async fn test_identity_cleanup_gives_up_after_bound() {
    let config = ControllerConfig {
        max_identity_cleanup_attempts: 2,
        ..Default::default()
    };
    let h = Harness::with_config(
        existing(aks_cluster(), identity_status()),
        MockProvisioner::with_identity(),
        config,
    );
    h.store.mark_deleted(&h.key);
    h.provider
        .fail_identity_delete(ProviderError::Transient("graph unavailable".to_string()))
        .fail_identity_delete(ProviderError::Transient("graph unavailable".to_string()));

    assert!(h.reconcile().await.is_err());
    assert!(h.object().is_some());

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);
    assert!(h.object().is_none());
}
