//! # Kubernetes Stores
//!
//! [`ObjectStore`], [`BindingStore`] and [`SecretStore`] backed by the
//! Kubernetes API.

use super::{BindingStore, ObjectKey, ObjectStore, SecretData, SecretStore, StoreError, WriteOutcome};
use crate::constants::FIELD_MANAGER;
use crate::controller::binding::{ManagedVariant, ResourceFamily};
use crate::crd::{AksCluster, MysqlServer, PostgresqlServer, ResourceClass};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

fn map_kube_error(key: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict(key.to_string()),
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(key.to_string()),
        e => StoreError::Other(format!("{key}: {e}")),
    }
}

/// Object store over namespaced custom resources
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        self.api(key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(&key.to_string(), e))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        // replace carries the resourceVersion we read, so a stale object yields 409
        self.api(key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(&key.to_string(), e))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let value = serde_json::to_value(obj).map_err(|e| StoreError::Other(e.to_string()))?;
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        self.api(key.namespace.as_deref())
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(&key.to_string(), e))
    }
}

/// Classes and managed resources for the binding controller
#[derive(Clone)]
pub struct KubeBindingStore {
    client: Client,
}

impl Debug for KubeBindingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBindingStore").finish_non_exhaustive()
    }
}

impl KubeBindingStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
    {
        KubeStore::<K>::new(self.client.clone()).get(key).await
    }

    async fn create<K>(&self, obj: &K) -> Result<WriteOutcome, StoreError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
    {
        let key = ObjectKey::of(obj);
        let api: Api<K> = Api::namespaced(self.client.clone(), key.namespace.as_deref().unwrap_or_default());
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(WriteOutcome::Created),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                debug!("{} {} already exists", K::kind(&()), key);
                Ok(WriteOutcome::Unchanged)
            }
            Err(e) => Err(map_kube_error(&key.to_string(), e)),
        }
    }
}

#[async_trait]
impl BindingStore for KubeBindingStore {
    async fn class(&self, key: &ObjectKey) -> Result<Option<ResourceClass>, StoreError> {
        self.get::<ResourceClass>(key).await
    }

    async fn managed(&self, family: ResourceFamily, key: &ObjectKey) -> Result<Option<ManagedVariant>, StoreError> {
        let managed = match family {
            ResourceFamily::Postgresql => self.get::<PostgresqlServer>(key).await?.map(ManagedVariant::Postgresql),
            ResourceFamily::Mysql => self.get::<MysqlServer>(key).await?.map(ManagedVariant::Mysql),
            ResourceFamily::Kubernetes => self.get::<AksCluster>(key).await?.map(ManagedVariant::Aks),
        };
        Ok(managed)
    }

    async fn create_managed(&self, managed: &ManagedVariant) -> Result<WriteOutcome, StoreError> {
        match managed {
            ManagedVariant::Postgresql(obj) => self.create(obj).await,
            ManagedVariant::Mysql(obj) => self.create(obj).await,
            ManagedVariant::Aks(obj) => self.create(obj).await,
        }
    }
}

/// Secret store over core/v1 Secrets
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_plain(data: Option<&std::collections::BTreeMap<String, ByteString>>) -> SecretData {
    data.map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default()
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn read(&self, name: &str, namespace: &str) -> Result<Option<SecretData>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(&format!("{namespace}/{name}"), e))?;
        Ok(secret.map(|s| to_plain(s.data.as_ref())))
    }

    async fn write(
        &self,
        name: &str,
        namespace: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<WriteOutcome, StoreError> {
        let key = format!("{namespace}/{name}");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let encoded = data
            .into_iter()
            .map(|(k, v)| (k, ByteString(v)))
            .collect::<std::collections::BTreeMap<_, _>>();

        match api.get_opt(name).await.map_err(|e| map_kube_error(&key, e))? {
            Some(existing) => {
                if existing.data.as_ref() == Some(&encoded) {
                    debug!("Secret {} unchanged, skipping write", key);
                    return Ok(WriteOutcome::Unchanged);
                }
                let patch = serde_json::json!({
                    "metadata": { "resourceVersion": existing.resource_version() },
                    "data": encoded,
                });
                api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
                    .await
                    .map_err(|e| map_kube_error(&key, e))?;
                Ok(WriteOutcome::Updated)
            }
            None => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        owner_references: owner.map(|o| vec![o]),
                        labels: Some(
                            [(
                                "app.kubernetes.io/managed-by".to_string(),
                                FIELD_MANAGER.to_string(),
                            )]
                            .into(),
                        ),
                        ..Default::default()
                    },
                    data: Some(encoded),
                    type_: Some("Opaque".to_string()),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &secret)
                    .await
                    .map_err(|e| map_kube_error(&key, e))?;
                Ok(WriteOutcome::Created)
            }
        }
    }
}
