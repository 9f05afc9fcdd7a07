//! # Azure Provider
//!
//! Provisions Azure resources through the Resource Manager and Microsoft Graph
//! REST APIs:
//!
//! - [`aks`] AKS managed clusters, with an application and service principal
//!   created through [`graph`] before the cluster
//! - [`sql`] PostgreSQL and MySQL flexible servers
//!
//! Long-running ARM calls return an [`http::AsyncOperation`] which is stored
//! on the managed resource as its operation token.

pub mod aks;
pub mod auth;
pub mod graph;
pub mod http;
pub mod kubeconfig;
pub mod sql;

pub use aks::AksClient;
pub use auth::{ProviderDirectory, ResolvedProvider};
pub use sql::FlexibleServerClient;

use crate::config::AzureConfig;
use crate::controller::reconciler::Managed;
use crate::provider::ProviderError;
use http::AzureHttp;
use kube::ResourceExt;
use std::time::Duration;

/// Shared state of the Azure clients
#[derive(Debug)]
pub struct AzureContext {
    pub http: AzureHttp,
    pub directory: ProviderDirectory,
    pub config: AzureConfig,
}

/// Subscription and ARM token for one reconcile step
#[derive(Debug)]
pub struct ArmSession {
    pub subscription_id: String,
    pub token: String,
}

impl AzureContext {
    pub fn new(client: kube::Client, config: AzureConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: AzureHttp::new(Duration::from_secs(config.http_timeout_secs))?,
            directory: ProviderDirectory::new(client, config.mock_credentials),
            config,
        })
    }

    /// Resolve the provider referenced by `obj`
    pub async fn provider_for<K: Managed>(&self, obj: &K) -> Result<ResolvedProvider, ProviderError> {
        let namespace = obj.namespace().unwrap_or_default();
        self.directory.resolve(obj.provider_ref(), &namespace).await
    }

    pub async fn arm_session<K: Managed>(&self, obj: &K) -> Result<ArmSession, ProviderError> {
        let provider = self.provider_for(obj).await?;
        let token = auth::bearer_token(provider.credential.as_ref(), auth::ARM_SCOPE).await?;
        Ok(ArmSession {
            subscription_id: provider.subscription_id,
            token,
        })
    }

    /// Full ARM URL for a resource path
    pub fn arm_url(&self, path: &str, api_version: &str) -> String {
        arm_url(&self.config.resource_manager_endpoint, path, api_version)
    }
}

fn arm_url(endpoint: &str, path: &str, api_version: &str) -> String {
    format!("{endpoint}{path}?api-version={api_version}")
}

/// ARM path of a resource in a resource group
pub fn resource_path(
    subscription_id: &str,
    resource_group: &str,
    resource_provider: &str,
    resource_type: &str,
    name: &str,
) -> String {
    format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/{resource_provider}/{resource_type}/{name}"
    )
}

/// External name recorded on the status, falling back to the object name
pub(crate) fn recorded_name<K: Managed>(obj: &K) -> String {
    obj.managed_status()
        .map(|s| s.resource_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| crate::controller::reconciler::external_name(obj))
}
