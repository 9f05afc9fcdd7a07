//! Rejections, conflicts and partial failures

use super::fakes::*;
use resource_claim_controller::config::ControllerConfig;
use resource_claim_controller::constants::PROVISIONING_SECRET_SUFFIX;
use resource_claim_controller::controller::reconciler::{ReconcileError, Requeue};
use resource_claim_controller::crd::{ConditionStatus, ConditionType, ManagedStatus, ReclaimPolicy};
use resource_claim_controller::provider::{ObservedPhase, OperationPoll, ProviderError};

fn failed_reason(status: &ManagedStatus) -> Option<String> {
    status
        .conditioned()
        .get(ConditionType::Failed)
        .filter(|c| c.status == ConditionStatus::True)
        .and_then(|c| c.reason.clone())
}

#[tokio::test]
async fn test_rejected_create_is_not_retried_until_spec_changes() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.provider
        .on_create(Err(ProviderError::Rejected("invalid SKU Standard_D2ds_v4".to_string())));

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().sync_period()));
    let status = h.status();
    assert_eq!(status.failure_generation, Some(1));
    assert_eq!(failed_reason(&status).as_deref(), Some("CreateRejected"));
    assert!(!status.has_running_operation());

    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.create), 1);

    h.store.modify(&h.key, |obj| {
        obj.spec.server.sku_name = "Standard_D4ds_v4".to_string();
        obj.metadata.generation = Some(2);
    });
    h.reconcile().await.unwrap();

    assert_eq!(Calls::get(&h.provider.calls.create), 2);
    let status = h.status();
    assert_eq!(status.running_operation, "tok-default");
    assert_eq!(status.failure_generation, None);
    assert_eq!(failed_reason(&status), None);
}

#[tokio::test]
async fn test_transient_create_failure_is_returned_for_backoff() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.provider
        .on_create(Err(ProviderError::Transient("429 Too Many Requests".to_string())));

    let err = h.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Provider(ProviderError::Transient(_))));
    assert_eq!(h.status().failure_generation, None);

    h.reconcile().await.unwrap();
    assert_eq!(h.status().running_operation, "tok-default");
}

#[tokio::test]
async fn test_conflict_on_finalizer_write_skips_provider() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.store.inject_conflicts(1);

    let err = h.reconcile().await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(Calls::get(&h.provider.calls.observe), 0);
    assert_eq!(Calls::get(&h.provider.calls.create), 0);

    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.create), 1);
}

#[tokio::test]
async fn test_conflict_on_status_write_persists_nothing() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), ManagedStatus::default()),
        MockProvisioner::default(),
    );
    h.provider.on_create(Ok("tok-1")).on_create(Ok("tok-2"));
    h.store.inject_conflicts(1);

    let err = h.reconcile().await.unwrap_err();
    assert!(err.is_conflict());
    assert!(!h.status().has_running_operation());

    h.reconcile().await.unwrap();
    assert_eq!(h.status().running_operation, "tok-2");
}

#[tokio::test]
async fn test_partial_identity_is_recorded_and_reused() {
    let h = Harness::new(aks_cluster(), MockProvisioner::with_identity());
    h.provider
        .fail_identity(ProviderError::Transient("service principal not yet replicated".to_string()));

    let err = h.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Provider(_)));
    let status = h.status();
    assert_eq!(status.application_object_id.as_deref(), Some("app-object-1"));
    assert_eq!(status.service_principal_id, None);
    assert_eq!(Calls::get(&h.provider.calls.create), 0);

    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.applications_created), 1);
    assert_eq!(Calls::get(&h.provider.calls.create), 1);
    assert_eq!(h.status().service_principal_id.as_deref(), Some("sp-1"));
    let provisioning = h
        .secrets
        .get(&format!("akscluster-team-a{PROVISIONING_SECRET_SUFFIX}"))
        .unwrap();
    assert_eq!(provisioning.get("clientSecret").unwrap(), b"client-secret-1");
}

#[tokio::test]
async fn test_rejected_identity_pins_failure() {
    let h = Harness::new(aks_cluster(), MockProvisioner::with_identity());
    h.provider
        .fail_identity(ProviderError::Rejected("insufficient directory privileges".to_string()));

    h.reconcile().await.unwrap();
    let status = h.status();
    assert_eq!(failed_reason(&status).as_deref(), Some("IdentityRejected"));
    assert_eq!(status.failure_generation, Some(1));
    assert_eq!(Calls::get(&h.provider.calls.create), 0);
}

#[tokio::test]
async fn test_credential_failure_defers_ready() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.provider
        .on_create(Ok("tok-1"))
        .on_poll(Ok(OperationPoll::Succeeded));
    h.reconcile().await.unwrap();
    h.reconcile().await.unwrap();

    h.provider
        .fail_credentials(ProviderError::Transient("server restarting".to_string()))
        .on_observe(Ok(Some(observed(ObservedPhase::Ready, "host:5432"))))
        .on_observe(Ok(Some(observed(ObservedPhase::Ready, "host:5432"))));

    let err = h.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Publish(_)));
    assert!(!h.status().is_ready());
    assert!(h.secrets.get(CLAIM_UID).is_none());

    h.reconcile().await.unwrap();
    assert!(h.status().is_ready());
    assert!(h.secrets.get(CLAIM_UID).is_some());
}

fn ready_status() -> ManagedStatus {
    let mut status = ManagedStatus {
        resource_name: "postgresqlserver-orders-4a7e2c1b".to_string(),
        provider_id: "orders-db".to_string(),
        ..Default::default()
    };
    status.with_conditions(|c| {
        c.set_creating();
        c.set_ready();
    });
    status
}

#[tokio::test]
async fn test_observe_failures_surface_after_bound() {
    let config = ControllerConfig {
        max_observe_failures: 3,
        ..Default::default()
    };
    let h = Harness::with_config(
        existing(postgres(ReclaimPolicy::Delete), ready_status()),
        MockProvisioner::default(),
        config,
    );
    for _ in 0..3 {
        h.provider
            .on_observe(Err(ProviderError::Transient("connection reset".to_string())));
    }
    h.provider
        .on_observe(Ok(Some(observed(ObservedPhase::Ready, "host:5432"))));

    assert!(h.reconcile().await.is_err());
    assert!(h.reconcile().await.is_err());
    assert_eq!(h.status().observe_failures, 2);
    assert_eq!(failed_reason(&h.status()), None);

    assert!(h.reconcile().await.is_err());
    assert_eq!(failed_reason(&h.status()).as_deref(), Some("ObserveFailed"));

    h.reconcile().await.unwrap();
    let status = h.status();
    assert_eq!(status.observe_failures, 0);
    assert_eq!(failed_reason(&status), None);
    assert!(status.is_ready());
}

#[tokio::test]
async fn test_provider_failure_blocks_recreate_at_same_generation() {
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), ready_status()),
        MockProvisioner::default(),
    );
    h.provider
        .on_observe(Ok(Some(observed(ObservedPhase::Failed("server disabled".to_string()), ""))));

    h.reconcile().await.unwrap();
    let status = h.status();
    assert!(!status.is_ready());
    assert_eq!(failed_reason(&status).as_deref(), Some("ProviderFailed"));
    assert_eq!(status.failure_generation, Some(1));

    // gone at the provider, but not recreated without a spec change
    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.create), 0);
}

#[tokio::test]
async fn test_unreadable_token_is_discarded() {
    let mut status = ready_status();
    status.running_operation = "not-a-token".to_string();
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), status),
        MockProvisioner::default(),
    );
    h.provider
        .on_poll(Err(ProviderError::Rejected("malformed operation token".to_string())));

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Immediately);
    let status = h.status();
    assert!(!status.has_running_operation());
    assert_eq!(failed_reason(&status).as_deref(), Some("ProviderFailed"));
    assert!(!status.is_ready());

    // the provider knows nothing about it and creation stays pinned
    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.create), 0);
}

#[tokio::test]
async fn test_failed_create_operation_is_not_reissued() {
    let h = Harness::new(postgres(ReclaimPolicy::Delete), MockProvisioner::default());
    h.provider
        .on_observe(Ok(None))
        .on_create(Ok("tok-1"))
        .on_poll(Ok(OperationPoll::Failed("QuotaExceeded: vCore limit reached".to_string())));

    h.reconcile().await.unwrap();
    assert_eq!(h.reconcile().await.unwrap(), Requeue::Immediately);
    let status = h.status();
    assert_eq!(failed_reason(&status).as_deref(), Some("ProviderFailed"));
    assert_eq!(status.failure_generation, Some(1));

    // nothing exists at the provider, yet the same spec is not submitted again
    assert_eq!(
        h.reconcile().await.unwrap(),
        Requeue::After(ControllerConfig::default().sync_period())
    );
    assert_eq!(Calls::get(&h.provider.calls.create), 1);

    h.store.modify(&h.key, |obj| {
        obj.spec.server.sku_name = "Standard_D4ds_v4".to_string();
        obj.metadata.generation = Some(2);
    });
    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.create), 2);
    assert_eq!(h.status().failure_generation, None);
}

#[tokio::test]
async fn test_conflict_after_identity_creation_never_reuses_orphaned_secret() {
    let h = Harness::new(
        existing(aks_cluster(), ManagedStatus::default()),
        MockProvisioner::with_identity(),
    );
    // both the early identity write and the closing status write are refused
    h.store.inject_conflicts(2);

    let err = h.reconcile().await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.status().application_object_id, None);
    assert_eq!(Calls::get(&h.provider.calls.create), 0);

    h.reconcile().await.unwrap();
    assert_eq!(Calls::get(&h.provider.calls.applications_created), 2);
    assert_eq!(Calls::get(&h.provider.calls.secrets_without_application), 0);
    assert_eq!(Calls::get(&h.provider.calls.create), 1);
    let status = h.status();
    assert_eq!(status.application_object_id.as_deref(), Some("app-object-2"));
    let provisioning = h
        .secrets
        .get(&format!("akscluster-team-a{PROVISIONING_SECRET_SUFFIX}"))
        .unwrap();
    assert_eq!(provisioning.get("clientSecret").unwrap(), b"client-secret-2");
}

#[tokio::test]
async fn test_transient_poll_failure_keeps_token() {
    let mut status = ready_status();
    status.running_operation = "tok-1".to_string();
    let h = Harness::new(
        existing(postgres(ReclaimPolicy::Delete), status),
        MockProvisioner::default(),
    );
    h.provider
        .on_poll(Err(ProviderError::Transient("503 Service Unavailable".to_string())));

    assert!(h.reconcile().await.is_err());
    assert_eq!(h.status().running_operation, "tok-1");
}
