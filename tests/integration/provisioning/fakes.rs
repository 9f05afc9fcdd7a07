//! In-memory collaborators for driving the reconciler without a cluster or cloud.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use resource_claim_controller::config::ControllerConfig;
use resource_claim_controller::controller::binding::claim_reconciler::{Claim, ClaimBinder};
use resource_claim_controller::controller::binding::{ManagedVariant, ResourceFamily};
use resource_claim_controller::controller::reconciler::{Managed, ProvisioningReconciler, ReconcileError, Requeue};
use resource_claim_controller::crd::{
    AksCluster, AksClusterSpec, ClassReference, ManagedStatus, PostgreSQLInstance, PostgreSQLInstanceSpec,
    PostgresqlServer, PostgresqlServerSpec, ProviderReference, ReclaimPolicy, ResourceClass, ResourceClassSpec,
    SecretReference, SqlServerParameters,
};
use resource_claim_controller::provider::{
    ConnectionDetails, CreateRequest, ManagedIdentity, ObservedPhase, ObservedResource, OperationPoll,
    OperationToken, ProviderError, ProvisioningClient, ProvisioningSecret,
};
use resource_claim_controller::store::{
    BindingStore, ObjectKey, ObjectStore, SecretData, SecretStore, StoreError, WriteOutcome,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

pub const NAMESPACE: &str = "orders";
pub const CLAIM_UID: &str = "9d3f5a70-1111-2222-3333-444455556666";

/// Take `field` from `source` and everything else from `target`
fn with_field<K: Serialize + DeserializeOwned>(target: &K, field: &str, source: &K) -> K {
    let mut value = serde_json::to_value(target).unwrap();
    let source = serde_json::to_value(source).unwrap();
    let object = value.as_object_mut().unwrap();
    match source.get(field) {
        Some(v) if !v.is_null() => {
            object.insert(field.to_string(), v.clone());
        }
        _ => {
            object.remove(field);
        }
    }
    serde_json::from_value(value).unwrap()
}

fn bump_resource_version<K: Resource>(obj: &mut K) {
    let next = obj
        .meta()
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or_default()
        + 1;
    obj.meta_mut().resource_version = Some(next.to_string());
}

/// Object store with resourceVersion checks and status subresource semantics
pub struct InMemoryStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    pending_conflicts: AtomicU32,
    status_writes: AtomicU32,
}

impl<K> InMemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn with(mut obj: K) -> Arc<Self> {
        obj.meta_mut().resource_version = Some("1".to_string());
        let mut objects = HashMap::new();
        objects.insert(ObjectKey::of(&obj), obj);
        Arc::new(Self {
            objects: Mutex::new(objects),
            pending_conflicts: AtomicU32::new(0),
            status_writes: AtomicU32::new(0),
        })
    }

    pub fn current(&self, key: &ObjectKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Fail the next `count` writes with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn status_writes(&self) -> u32 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Apply an out-of-band change, as a user editing the object would
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).unwrap();
        f(obj);
        bump_resource_version(obj);
    }

    /// Request deletion; the object stays until its finalizers are gone
    pub fn mark_deleted(&self, key: &ObjectKey) {
        self.modify(key, |obj| {
            obj.meta_mut().deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2026-10-15T09:00:00Z")).unwrap());
        });
    }

    fn check_write(&self, key: &ObjectKey, obj: &K, current: &K) -> Result<(), StoreError> {
        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || obj.resource_version() != current.resource_version() {
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for InMemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.current(key))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.check_write(&key, obj, &current)?;

        let mut updated = with_field(obj, "status", &current);
        updated.meta_mut().deletion_timestamp = current.meta().deletion_timestamp.clone();
        bump_resource_version(&mut updated);

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.check_write(&key, obj, &current)?;

        let mut updated = with_field(&current, "status", obj);
        bump_resource_version(&mut updated);
        objects.insert(key, updated.clone());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

/// Secret store counting effective writes
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<(String, String), SecretData>>,
    writes: AtomicU32,
}

impl InMemorySecretStore {
    pub fn get(&self, name: &str) -> Option<SecretData> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn read(&self, name: &str, namespace: &str) -> Result<Option<SecretData>, StoreError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn write(
        &self,
        name: &str,
        namespace: &str,
        data: SecretData,
        _owner: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>,
    ) -> Result<WriteOutcome, StoreError> {
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let outcome = match secrets.get(&key) {
            Some(existing) if *existing == data => return Ok(WriteOutcome::Unchanged),
            Some(_) => WriteOutcome::Updated,
            None => WriteOutcome::Created,
        };
        secrets.insert(key, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

/// Call counters of the scripted provider
#[derive(Debug, Default)]
pub struct Calls {
    pub create: AtomicU32,
    pub poll: AtomicU32,
    pub observe: AtomicU32,
    pub delete: AtomicU32,
    pub ensure_identity: AtomicU32,
    pub applications_created: AtomicU32,
    /// `ensure_identity` handed a client secret but no application to own it
    pub secrets_without_application: AtomicU32,
    pub delete_identity: AtomicU32,
    pub credentials: AtomicU32,
}

impl Calls {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

/// Provider answering from scripted queues, with benign defaults once a queue is empty
#[derive(Default)]
pub struct MockProvisioner {
    pub requires_identity: bool,
    creates: Mutex<VecDeque<Result<OperationToken, ProviderError>>>,
    polls: Mutex<VecDeque<Result<OperationPoll, ProviderError>>>,
    observations: Mutex<VecDeque<Result<Option<ObservedResource>, ProviderError>>>,
    deletes: Mutex<VecDeque<Result<Option<OperationToken>, ProviderError>>>,
    identity_failures: Mutex<VecDeque<ProviderError>>,
    identity_delete_failures: Mutex<VecDeque<ProviderError>>,
    credential_failures: Mutex<VecDeque<ProviderError>>,
    pub calls: Calls,
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap().pop_front()
}

impl MockProvisioner {
    pub fn with_identity() -> Self {
        Self {
            requires_identity: true,
            ..Default::default()
        }
    }

    pub fn on_create(&self, result: Result<&str, ProviderError>) -> &Self {
        self.creates
            .lock()
            .unwrap()
            .push_back(result.map(|t| OperationToken(t.to_string())));
        self
    }

    pub fn on_poll(&self, result: Result<OperationPoll, ProviderError>) -> &Self {
        self.polls.lock().unwrap().push_back(result);
        self
    }

    pub fn on_observe(&self, result: Result<Option<ObservedResource>, ProviderError>) -> &Self {
        self.observations.lock().unwrap().push_back(result);
        self
    }

    pub fn on_delete(&self, result: Result<Option<&str>, ProviderError>) -> &Self {
        self.deletes
            .lock()
            .unwrap()
            .push_back(result.map(|t| t.map(|t| OperationToken(t.to_string()))));
        self
    }

    /// Fail identity creation right after the application was created
    pub fn fail_identity(&self, err: ProviderError) -> &Self {
        self.identity_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_identity_delete(&self, err: ProviderError) -> &Self {
        self.identity_delete_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_credentials(&self, err: ProviderError) -> &Self {
        self.credential_failures.lock().unwrap().push_back(err);
        self
    }
}

#[async_trait]
impl<K: Managed> ProvisioningClient<K> for MockProvisioner {
    fn requires_identity(&self) -> bool {
        self.requires_identity
    }

    async fn ensure_identity(&self, _obj: &K, identity: &mut ManagedIdentity) -> Result<(), ProviderError> {
        self.calls.ensure_identity.fetch_add(1, Ordering::SeqCst);
        if identity.application_object_id.is_none() {
            if identity.client_secret.is_some() {
                self.calls.secrets_without_application.fetch_add(1, Ordering::SeqCst);
            }
            let n = self.calls.applications_created.fetch_add(1, Ordering::SeqCst) + 1;
            identity.application_object_id = Some(format!("app-object-{n}"));
            identity.application_id = Some(format!("app-client-{n}"));
        }
        if let Some(err) = pop(&self.identity_failures) {
            return Err(err);
        }
        if identity.client_secret.is_none() {
            let n = Calls::get(&self.calls.applications_created);
            identity.client_secret = Some(Zeroizing::new(format!("client-secret-{n}")));
        }
        if identity.service_principal_id.is_none() {
            identity.service_principal_id = Some("sp-1".to_string());
        }
        Ok(())
    }

    async fn begin_create(&self, _obj: &K, _request: &CreateRequest<'_>) -> Result<OperationToken, ProviderError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        pop(&self.creates).unwrap_or_else(|| Ok(OperationToken("tok-default".to_string())))
    }

    async fn poll_operation(&self, _obj: &K, _token: &OperationToken) -> Result<OperationPoll, ProviderError> {
        self.calls.poll.fetch_add(1, Ordering::SeqCst);
        pop(&self.polls).unwrap_or(Ok(OperationPoll::Succeeded))
    }

    async fn observe(&self, _obj: &K) -> Result<Option<ObservedResource>, ProviderError> {
        self.calls.observe.fetch_add(1, Ordering::SeqCst);
        pop(&self.observations).unwrap_or(Ok(None))
    }

    async fn begin_delete(&self, _obj: &K) -> Result<Option<OperationToken>, ProviderError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        pop(&self.deletes).unwrap_or(Ok(None))
    }

    async fn delete_identity(&self, _obj: &K, _identity: &ManagedIdentity) -> Result<(), ProviderError> {
        self.calls.delete_identity.fetch_add(1, Ordering::SeqCst);
        pop(&self.identity_delete_failures).map_or(Ok(()), Err)
    }

    async fn credentials(
        &self,
        _obj: &K,
        observed: &ObservedResource,
        secret: &ProvisioningSecret,
    ) -> Result<ConnectionDetails, ProviderError> {
        self.calls.credentials.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = pop(&self.credential_failures) {
            return Err(err);
        }
        Ok(ConnectionDetails {
            endpoint: observed.endpoint.clone(),
            username: Some("sqladmin".to_string()),
            password: Some(Zeroizing::new(secret.admin_password.to_string())),
            ..Default::default()
        })
    }
}

pub fn observed(phase: ObservedPhase, endpoint: &str) -> ObservedResource {
    ObservedResource {
        provider_id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.DBforPostgreSQL/flexibleServers/orders-db"
            .to_string(),
        state: match &phase {
            ObservedPhase::Ready => "Ready".to_string(),
            ObservedPhase::Provisioning => "Starting".to_string(),
            ObservedPhase::Failed(_) => "Disabled".to_string(),
        },
        endpoint: endpoint.to_string(),
        phase,
    }
}

pub fn postgres(reclaim_policy: ReclaimPolicy) -> PostgresqlServer {
    let mut obj = PostgresqlServer::new(
        "postgresqlserver-orders",
        PostgresqlServerSpec {
            server: SqlServerParameters {
                admin_login_name: "sqladmin".to_string(),
                resource_group_name: "group-westeurope".to_string(),
                location: "westeurope".to_string(),
                version: "13".to_string(),
                sku_name: "Standard_D2ds_v4".to_string(),
                sku_tier: "GeneralPurpose".to_string(),
                storage_gb: 32,
                backup_retention_days: 7,
                geo_redundant_backup: false,
            },
            write_connection_secret_to_reference: Some(SecretReference {
                name: CLAIM_UID.to_string(),
            }),
            provider_reference: ProviderReference {
                name: "azure".to_string(),
                namespace: None,
            },
            reclaim_policy,
        },
    );
    stamp(&mut obj.metadata, "4a7e2c1b-aaaa-bbbb-cccc-000000000001");
    obj
}

pub fn aks_cluster() -> AksCluster {
    let mut obj = AksCluster::new(
        "akscluster-team-a",
        AksClusterSpec {
            resource_group_name: "group-westeurope".to_string(),
            location: "westeurope".to_string(),
            version: "1.29".to_string(),
            node_count: 1,
            node_vm_size: "Standard_D2s_v3".to_string(),
            dns_name_prefix: "team-a".to_string(),
            disable_rbac: false,
            write_connection_secret_to_reference: Some(SecretReference {
                name: CLAIM_UID.to_string(),
            }),
            provider_reference: ProviderReference {
                name: "azure".to_string(),
                namespace: None,
            },
            reclaim_policy: ReclaimPolicy::Delete,
        },
    );
    stamp(&mut obj.metadata, "7c0ffee0-aaaa-bbbb-cccc-000000000002");
    obj
}

fn stamp(metadata: &mut kube::api::ObjectMeta, uid: &str) {
    metadata.namespace = Some(NAMESPACE.to_string());
    metadata.uid = Some(uid.to_string());
    metadata.generation = Some(1);
}

/// Add the finalizer and a status, as if earlier reconciles had run
pub fn existing<K: Managed>(mut obj: K, status: ManagedStatus) -> K {
    obj.finalizers_mut()
        .push(resource_claim_controller::constants::FINALIZER.to_string());
    *obj.managed_status_mut() = status;
    obj
}

/// Reconciler wired to the in-memory collaborators
pub struct Harness<K> {
    pub store: Arc<InMemoryStore<K>>,
    pub provider: Arc<MockProvisioner>,
    pub secrets: Arc<InMemorySecretStore>,
    pub reconciler: ProvisioningReconciler<K>,
    pub key: ObjectKey,
}

impl<K> Harness<K>
where
    K: Managed + Serialize + DeserializeOwned,
{
    pub fn new(obj: K, provider: MockProvisioner) -> Self {
        Self::with_config(obj, provider, ControllerConfig::default())
    }

    pub fn with_config(obj: K, provider: MockProvisioner, config: ControllerConfig) -> Self {
        let key = ObjectKey::of(&obj);
        let store = InMemoryStore::with(obj);
        let provider = Arc::new(provider);
        let secrets = Arc::new(InMemorySecretStore::default());
        let reconciler = ProvisioningReconciler::new(
            Arc::clone(&store) as Arc<dyn ObjectStore<K>>,
            Arc::clone(&provider) as Arc<dyn ProvisioningClient<K>>,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            config,
        );
        Self {
            store,
            provider,
            secrets,
            reconciler,
            key,
        }
    }

    pub async fn reconcile(&self) -> Result<Requeue, ReconcileError> {
        self.reconciler.reconcile(&self.key).await
    }

    pub fn object(&self) -> Option<K> {
        self.store.current(&self.key)
    }

    pub fn status(&self) -> ManagedStatus {
        self.object()
            .and_then(|obj| obj.managed_status().cloned())
            .unwrap_or_default()
    }
}

/// Classes and managed resources for the binding controller
#[derive(Default)]
pub struct InMemoryBindingStore {
    classes: Mutex<HashMap<ObjectKey, ResourceClass>>,
    managed: Mutex<HashMap<ObjectKey, ManagedVariant>>,
    pub managed_created: AtomicU32,
}

fn managed_key(managed: &ManagedVariant) -> ObjectKey {
    ObjectKey::new(managed.namespace().as_deref(), &managed.name())
}

impl InMemoryBindingStore {
    pub fn add_class(&self, class: ResourceClass) {
        self.classes.lock().unwrap().insert(ObjectKey::of(&class), class);
    }

    /// Replace a managed resource, as its own controller would after provisioning
    pub fn put_managed(&self, managed: ManagedVariant) {
        self.managed.lock().unwrap().insert(managed_key(&managed), managed);
    }

    pub fn managed_at(&self, key: &ObjectKey) -> Option<ManagedVariant> {
        self.managed.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BindingStore for InMemoryBindingStore {
    async fn class(&self, key: &ObjectKey) -> Result<Option<ResourceClass>, StoreError> {
        Ok(self.classes.lock().unwrap().get(key).cloned())
    }

    async fn managed(&self, family: ResourceFamily, key: &ObjectKey) -> Result<Option<ManagedVariant>, StoreError> {
        Ok(self.managed_at(key).filter(|m| m.family() == family))
    }

    async fn create_managed(&self, managed: &ManagedVariant) -> Result<WriteOutcome, StoreError> {
        let mut objects = self.managed.lock().unwrap();
        let key = managed_key(managed);
        if objects.contains_key(&key) {
            return Ok(WriteOutcome::Unchanged);
        }
        objects.insert(key, managed.clone());
        self.managed_created.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Created)
    }
}

pub const CLASS_NAMESPACE: &str = "provisioning-system";

/// Claim for a PostgreSQL 13 server through the standard class
pub fn orders_claim() -> PostgreSQLInstance {
    let mut claim = PostgreSQLInstance::new(
        "orders-db",
        PostgreSQLInstanceSpec {
            class_ref: ClassReference {
                name: "standard-postgresql".to_string(),
                namespace: Some(CLASS_NAMESPACE.to_string()),
            },
            engine_version: Some("13".to_string()),
            write_connection_secret_to_ref: Some(SecretReference {
                name: "orders-db-connection".to_string(),
            }),
            resource_ref: None,
        },
    );
    claim.metadata.namespace = Some(NAMESPACE.to_string());
    claim.metadata.uid = Some(CLAIM_UID.to_string());
    claim
}

pub fn postgres_class(parameters: &[(&str, &str)]) -> ResourceClass {
    let mut class = ResourceClass::new(
        "standard-postgresql",
        ResourceClassSpec {
            provisioner: ResourceFamily::Postgresql.provisioner(),
            provider_ref: ProviderReference {
                name: "azure".to_string(),
                namespace: Some(CLASS_NAMESPACE.to_string()),
            },
            reclaim_policy: ReclaimPolicy::Delete,
            parameters: parameters
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        },
    );
    class.metadata.namespace = Some(CLASS_NAMESPACE.to_string());
    class
}

pub fn standard_postgres_parameters() -> Vec<(&'static str, &'static str)> {
    vec![
        ("resourceGroupName", "group-westeurope"),
        ("location", "westeurope"),
        ("version", "13"),
        ("skuName", "Standard_D2ds_v4"),
    ]
}

/// Claim binder wired to the in-memory collaborators
pub struct ClaimHarness<C> {
    pub claims: Arc<InMemoryStore<C>>,
    pub resources: Arc<InMemoryBindingStore>,
    pub secrets: Arc<InMemorySecretStore>,
    pub binder: ClaimBinder<C>,
    pub key: ObjectKey,
}

impl<C: Claim> ClaimHarness<C> {
    pub fn new(claim: C) -> Self {
        let key = ObjectKey::of(&claim);
        let claims = InMemoryStore::with(claim);
        let resources = Arc::new(InMemoryBindingStore::default());
        let secrets = Arc::new(InMemorySecretStore::default());
        let binder = ClaimBinder::new(
            Arc::clone(&claims) as Arc<dyn ObjectStore<C>>,
            Arc::clone(&resources) as Arc<dyn BindingStore>,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            ControllerConfig::default(),
        );
        Self {
            claims,
            resources,
            secrets,
            binder,
            key,
        }
    }

    pub async fn reconcile(&self) -> Result<Requeue, ReconcileError> {
        self.binder.reconcile(&self.key).await
    }

    pub fn claim(&self) -> C {
        self.claims.current(&self.key).unwrap()
    }
}
