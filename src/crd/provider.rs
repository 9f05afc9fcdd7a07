//! # Provider
//!
//! Cloud account configuration referenced by resource classes and managed resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provider Custom Resource Definition
///
/// Holds the Azure subscription and authentication mode used to provision
/// the managed resources that reference it.
///
/// # Example
///
/// ```yaml
/// apiVersion: provisioning.microscaler.io/v1alpha1
/// kind: Provider
/// metadata:
///   name: azure-provider
///   namespace: provisioning-system
/// spec:
///   subscriptionId: 00000000-0000-0000-0000-000000000000
///   auth:
///     authType: WorkloadIdentity
///     clientId: 11111111-1111-1111-1111-111111111111
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Provider",
    group = "provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Azure subscription that owns provisioned resources
    pub subscription_id: String,
    /// Azure AD tenant (informational, credentials resolve it themselves)
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Azure authentication configuration. If not specified, defaults to Managed Identity.
    #[serde(default)]
    pub auth: Option<AzureAuthConfig>,
}

/// Azure authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "authType")]
pub enum AzureAuthConfig {
    /// Use Workload Identity for authentication
    /// Requires AKS cluster with Workload Identity enabled
    #[serde(rename_all = "camelCase")]
    WorkloadIdentity {
        /// Azure service principal client ID
        client_id: String,
    },
}
