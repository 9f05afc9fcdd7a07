//! Claim binding against in-memory claims, classes and managed resources

use super::fakes::*;
use resource_claim_controller::config::ControllerConfig;
use resource_claim_controller::controller::binding::ManagedVariant;
use resource_claim_controller::controller::reconciler::Requeue;
use resource_claim_controller::crd::{
    BindingPhase, ClaimFields, ClaimStatus, ConditionStatus, ConditionType, ConditionedStatus, HasStatus,
    ManagedStatus, PostgreSQLInstance,
};
use resource_claim_controller::store::{ObjectKey, SecretData, SecretStore};

fn managed_key() -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, &format!("postgresqlserver-{CLAIM_UID}"))
}

fn conditioned(status: &ClaimStatus) -> ConditionedStatus {
    ConditionedStatus {
        conditions: status.conditions.clone(),
    }
}

fn failed_reason(claim: &PostgreSQLInstance) -> Option<String> {
    claim
        .claim_status()
        .map(conditioned)?
        .get(ConditionType::Failed)
        .filter(|c| c.status == ConditionStatus::True)
        .and_then(|c| c.reason.clone())
}

fn bound_harness() -> ClaimHarness<PostgreSQLInstance> {
    let h = ClaimHarness::new(orders_claim());
    h.resources
        .add_class(postgres_class(&standard_postgres_parameters()));
    h
}

#[tokio::test]
async fn test_unbound_claim_creates_managed_resource_once() {
    let h = bound_harness();

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().creating_requeue()));

    let Some(ManagedVariant::Postgresql(server)) = h.resources.managed_at(&managed_key()) else {
        panic!("expected a PostgresqlServer");
    };
    assert_eq!(server.spec.server.version, "13");
    assert_eq!(server.spec.server.sku_name, "Standard_D2ds_v4");
    assert_eq!(
        server.spec.write_connection_secret_to_reference.map(|s| s.name).as_deref(),
        Some(CLAIM_UID)
    );

    let claim = h.claim();
    let reference = claim.resource_ref().cloned().unwrap();
    assert_eq!(reference.kind, "PostgresqlServer");
    assert_eq!(reference.name, format!("postgresqlserver-{CLAIM_UID}"));
    assert_eq!(reference.namespace, NAMESPACE);
    assert_eq!(claim.claim_status().unwrap().binding_phase, BindingPhase::Bound);

    // bound claims only mirror from now on
    h.reconcile().await.unwrap();
    assert_eq!(h.resources.managed_created.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_class_parameters_fail_the_claim() {
    let h = ClaimHarness::new(orders_claim());
    let without_sku: Vec<_> = standard_postgres_parameters()
        .into_iter()
        .filter(|(k, _)| *k != "skuName")
        .collect();
    h.resources.add_class(postgres_class(&without_sku));

    assert_eq!(h.reconcile().await.unwrap(), Requeue::Never);

    let claim = h.claim();
    assert_eq!(failed_reason(&claim).as_deref(), Some("InvalidParameters"));
    assert!(claim.resource_ref().is_none());
    assert!(claim.claim_status().unwrap().message.as_deref().unwrap().contains("skuName"));
    assert!(h.resources.managed_at(&managed_key()).is_none());
}

#[tokio::test]
async fn test_missing_class_is_retried_later() {
    let h = ClaimHarness::new(orders_claim());

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().sync_period()));
    let claim = h.claim();
    assert_eq!(failed_reason(&claim).as_deref(), Some("ClassNotFound"));
    assert_eq!(claim.claim_status().unwrap().binding_phase, BindingPhase::Unbound);

    h.resources
        .add_class(postgres_class(&standard_postgres_parameters()));
    h.reconcile().await.unwrap();
    assert!(h.claim().resource_ref().is_some());
}

#[tokio::test]
async fn test_ready_managed_resource_propagates_connection_secret() {
    let h = bound_harness();
    h.reconcile().await.unwrap();

    // not ready yet: nothing to copy
    assert_eq!(
        h.reconcile().await.unwrap(),
        Requeue::After(ControllerConfig::default().creating_requeue())
    );
    assert!(h.secrets.get("orders-db-connection").is_none());

    let Some(ManagedVariant::Postgresql(mut server)) = h.resources.managed_at(&managed_key()) else {
        panic!("expected a PostgresqlServer");
    };
    let mut status = ManagedStatus::default();
    status.with_conditions(|c| {
        c.set_creating();
        c.set_ready();
    });
    *server.managed_status_mut() = status;
    h.resources.put_managed(ManagedVariant::Postgresql(server));

    let published: SecretData = [
        ("endpoint".to_string(), b"orders-db.postgres.database.azure.com".to_vec()),
        ("username".to_string(), b"sqladmin".to_vec()),
    ]
    .into_iter()
    .collect();
    h.secrets
        .write(CLAIM_UID, NAMESPACE, published.clone(), None)
        .await
        .unwrap();

    let requeue = h.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::After(ControllerConfig::default().sync_period()));
    assert_eq!(h.secrets.get("orders-db-connection"), Some(published));

    let status = h.claim().claim_status().cloned().unwrap();
    assert_eq!(status.binding_phase, BindingPhase::Bound);
    assert!(conditioned(&status).is_true(ConditionType::Ready));
}
