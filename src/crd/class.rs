//! # ResourceClass
//!
//! Operator-facing policy that claims bind to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ResourceClass Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: provisioning.microscaler.io/v1alpha1
/// kind: ResourceClass
/// metadata:
///   name: standard-postgresql
///   namespace: provisioning-system
/// provisioner: postgresqlserver.database.azure.provisioning.microscaler.io/v1alpha1
/// providerRef:
///   name: azure-provider
///   namespace: provisioning-system
/// reclaimPolicy: Delete
/// parameters:
///   resourceGroupName: group-westeurope
///   location: westeurope
///   version: "13"
///   skuName: Standard_D2ds_v4
///   skuTier: GeneralPurpose
///   storageGB: "128"
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ResourceClass",
    group = "provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    shortname = "rc",
    printcolumn = r#"{"name":"Provisioner", "type":"string", "jsonPath":".spec.provisioner"}, {"name":"Reclaim", "type":"string", "jsonPath":".spec.reclaimPolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClassSpec {
    /// Managed kind this class provisions, as `<kind>.<group>/<version>` in lower case
    pub provisioner: String,
    /// Provider holding the cloud credentials
    pub provider_ref: ProviderReference,
    /// What happens to the external resource when the managed resource is deleted
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    /// Provider-specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Whether the external resource outlives its managed resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ReclaimPolicy {
    /// Delete the external resource together with the managed resource
    #[default]
    Delete,
    /// Keep the external resource
    Retain,
}

/// Reference to a `Provider` resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReference {
    pub name: String,
    /// Defaults to the namespace of the referencing resource
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to a Secret in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
}
