//! # Resource Claims
//!
//! Tenant-facing requests for a logical resource. A claim names a class and,
//! once bound, references the managed resource provisioned for it.

use crate::crd::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a `ResourceClass`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassReference {
    pub name: String,
    /// Defaults to the claim's namespace
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to the managed resource bound to a claim
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Binding phase of a claim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BindingPhase {
    #[default]
    Unbound,
    Bound,
}

/// Status shared by all claim kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(default)]
    pub binding_phase: BindingPhase,
    /// Conditions mirrored from the bound managed resource
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Human-readable description of the last binding problem
    #[serde(default)]
    pub message: Option<String>,
}

/// PostgreSQLInstance Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: database.provisioning.microscaler.io/v1alpha1
/// kind: PostgreSQLInstance
/// metadata:
///   name: orders-db
///   namespace: orders
/// spec:
///   classRef:
///     name: standard-postgresql
///     namespace: provisioning-system
///   engineVersion: "13"
///   writeConnectionSecretToRef:
///     name: orders-db-connection
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PostgreSQLInstance",
    group = "database.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ClaimStatus",
    shortname = "pginstance",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.bindingPhase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgreSQLInstanceSpec {
    pub class_ref: ClassReference,
    /// Requested engine version; empty accepts the class default
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Secret the connection details are copied to once ready
    #[serde(default)]
    pub write_connection_secret_to_ref: Option<crate::crd::SecretReference>,
    /// Set by the controller when bound
    #[serde(default)]
    pub resource_ref: Option<ManagedReference>,
}

/// MySQLInstance Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MySQLInstance",
    group = "database.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ClaimStatus",
    shortname = "mysqlinstance",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.bindingPhase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLInstanceSpec {
    pub class_ref: ClassReference,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub write_connection_secret_to_ref: Option<crate::crd::SecretReference>,
    #[serde(default)]
    pub resource_ref: Option<ManagedReference>,
}

/// KubernetesCluster Custom Resource Definition
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "KubernetesCluster",
    group = "compute.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ClaimStatus",
    shortname = "kcluster",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.bindingPhase"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterSpec {
    pub class_ref: ClassReference,
    /// Requested Kubernetes version; empty accepts the class default
    #[serde(default)]
    pub cluster_version: Option<String>,
    #[serde(default)]
    pub write_connection_secret_to_ref: Option<crate::crd::SecretReference>,
    #[serde(default)]
    pub resource_ref: Option<ManagedReference>,
}

/// Access to the fields every claim carries
pub trait ClaimFields {
    fn class_ref(&self) -> &ClassReference;
    /// Requested version, empty when the class default is accepted
    fn requested_version(&self) -> &str;
    fn resource_ref(&self) -> Option<&ManagedReference>;
    fn set_resource_ref(&mut self, reference: ManagedReference);
    fn write_connection_secret_to_ref(&self) -> Option<&crate::crd::SecretReference>;
    fn claim_status(&self) -> Option<&ClaimStatus>;
    fn set_claim_status(&mut self, status: ClaimStatus);
}

macro_rules! claim_fields {
    ($kind:ty, $version:ident) => {
        impl ClaimFields for $kind {
            fn class_ref(&self) -> &ClassReference {
                &self.spec.class_ref
            }

            fn requested_version(&self) -> &str {
                self.spec.$version.as_deref().unwrap_or_default()
            }

            fn resource_ref(&self) -> Option<&ManagedReference> {
                self.spec.resource_ref.as_ref()
            }

            fn set_resource_ref(&mut self, reference: ManagedReference) {
                self.spec.resource_ref = Some(reference);
            }

            fn write_connection_secret_to_ref(&self) -> Option<&crate::crd::SecretReference> {
                self.spec.write_connection_secret_to_ref.as_ref()
            }

            fn claim_status(&self) -> Option<&ClaimStatus> {
                self.status.as_ref()
            }

            fn set_claim_status(&mut self, status: ClaimStatus) {
                self.status = Some(status);
            }
        }
    };
}

claim_fields!(PostgreSQLInstance, engine_version);
claim_fields!(MySQLInstance, engine_version);
claim_fields!(KubernetesCluster, cluster_version);
