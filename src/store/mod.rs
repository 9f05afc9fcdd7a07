//! # Stores
//!
//! Narrow interfaces over the declarative object store and secret storage.
//! The provisioning state machine and the claim binding controller only talk
//! to these traits, so they can be driven in tests by in-memory
//! implementations.

pub mod kubernetes;

use crate::controller::binding::{ManagedVariant, ResourceFamily};
use crate::crd::ResourceClass;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::fmt;

pub use kubernetes::{KubeBindingStore, KubeSecretStore, KubeStore};

/// Secret payload keyed by data key
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Namespaced identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    /// Build the key of an existing object
    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object changed since it was read
    #[error("conflict updating {0}: object was modified")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store error: {0}")]
    Other(String),
}

/// Result of a secret write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Stored data already matched, nothing was written
    Unchanged,
}

/// Optimistic-concurrency access to objects of kind `K`
///
/// Updates carry the resource version of the object passed in and fail with
/// [`StoreError::Conflict`] when it is stale.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// Persist metadata (finalizers) and spec
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Persist the status subresource
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;
}

/// Class lookup and managed resource access for the binding controller
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn class(&self, key: &ObjectKey) -> Result<Option<ResourceClass>, StoreError>;

    async fn managed(&self, family: ResourceFamily, key: &ObjectKey) -> Result<Option<ManagedVariant>, StoreError>;

    /// Create a managed resource. An existing object of the same name is left
    /// untouched and reported as [`WriteOutcome::Unchanged`].
    async fn create_managed(&self, managed: &ManagedVariant) -> Result<WriteOutcome, StoreError>;
}

/// Durable secret storage with create-or-update semantics
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, name: &str, namespace: &str) -> Result<Option<SecretData>, StoreError>;

    /// Create or update a secret. Identical data is not rewritten.
    async fn write(
        &self,
        name: &str,
        namespace: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<WriteOutcome, StoreError>;
}
