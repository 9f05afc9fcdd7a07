//! # Managed Resources
//!
//! CRD types representing external Azure resources, and the capability traits
//! the provisioning state machine is generic over.

use crate::crd::class::{ProviderReference, ReclaimPolicy, SecretReference};
use crate::crd::status::ManagedStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Access to the fields every managed spec carries
pub trait HasSpec {
    /// Secret the connection details are published to
    fn connection_secret_ref(&self) -> Option<&SecretReference>;
    /// Provider holding the cloud credentials
    fn provider_ref(&self) -> &ProviderReference;
    fn reclaim_policy(&self) -> ReclaimPolicy;
}

/// Access to the shared provisioning status
pub trait HasStatus {
    fn managed_status(&self) -> Option<&ManagedStatus>;
    /// Mutable status, created empty on first access
    fn managed_status_mut(&mut self) -> &mut ManagedStatus;
}

/// Azure Database flexible server parameters shared by PostgreSQL and MySQL
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlServerParameters {
    /// Administrator login name
    pub admin_login_name: String,
    pub resource_group_name: String,
    pub location: String,
    /// Engine version (e.g. "13" for PostgreSQL, "8.0.21" for MySQL)
    pub version: String,
    /// SKU name (e.g. "Standard_D2ds_v4")
    pub sku_name: String,
    /// SKU tier: Burstable, GeneralPurpose or MemoryOptimized
    pub sku_tier: String,
    pub storage_gb: i32,
    pub backup_retention_days: i32,
    #[serde(default)]
    pub geo_redundant_backup: bool,
}

/// PostgresqlServer Custom Resource Definition
///
/// Azure Database for PostgreSQL flexible server.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PostgresqlServer",
    group = "database.azure.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ManagedStatus",
    shortname = "pgserver",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Endpoint", "type":"string", "jsonPath":".status.endpoint"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlServerSpec {
    pub server: SqlServerParameters,
    #[serde(default)]
    pub write_connection_secret_to_reference: Option<SecretReference>,
    pub provider_reference: ProviderReference,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

/// MysqlServer Custom Resource Definition
///
/// Azure Database for MySQL flexible server.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MysqlServer",
    group = "database.azure.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ManagedStatus",
    shortname = "mysqlserver",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Endpoint", "type":"string", "jsonPath":".status.endpoint"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MysqlServerSpec {
    pub server: SqlServerParameters,
    #[serde(default)]
    pub write_connection_secret_to_reference: Option<SecretReference>,
    pub provider_reference: ProviderReference,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

/// AksCluster Custom Resource Definition
///
/// Azure Kubernetes Service managed cluster. Provisioning creates an Azure AD
/// application and service principal for the cluster before the cluster itself.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "AksCluster",
    group = "compute.azure.provisioning.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "ManagedStatus",
    shortname = "aks",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".status.resourceName"}, {"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AksClusterSpec {
    pub resource_group_name: String,
    pub location: String,
    /// Kubernetes version
    pub version: String,
    pub node_count: i32,
    pub node_vm_size: String,
    pub dns_name_prefix: String,
    #[serde(default)]
    pub disable_rbac: bool,
    #[serde(default)]
    pub write_connection_secret_to_reference: Option<SecretReference>,
    pub provider_reference: ProviderReference,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

macro_rules! managed_resource {
    ($kind:ty) => {
        impl HasSpec for $kind {
            fn connection_secret_ref(&self) -> Option<&SecretReference> {
                self.spec.write_connection_secret_to_reference.as_ref()
            }

            fn provider_ref(&self) -> &ProviderReference {
                &self.spec.provider_reference
            }

            fn reclaim_policy(&self) -> ReclaimPolicy {
                self.spec.reclaim_policy
            }
        }

        impl HasStatus for $kind {
            fn managed_status(&self) -> Option<&ManagedStatus> {
                self.status.as_ref()
            }

            fn managed_status_mut(&mut self) -> &mut ManagedStatus {
                self.status.get_or_insert_with(ManagedStatus::default)
            }
        }
    };
}

managed_resource!(PostgresqlServer);
managed_resource!(MysqlServer);
managed_resource!(AksCluster);

/// Database engine of a flexible server kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlEngine {
    Postgresql,
    Mysql,
}

impl SqlEngine {
    /// Azure resource provider namespace
    pub fn resource_provider(&self) -> &'static str {
        match self {
            SqlEngine::Postgresql => "Microsoft.DBforPostgreSQL",
            SqlEngine::Mysql => "Microsoft.DBforMySQL",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            SqlEngine::Postgresql => "2022-12-01",
            SqlEngine::Mysql => "2021-05-01",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            SqlEngine::Postgresql => 5432,
            SqlEngine::Mysql => 3306,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlEngine::Postgresql => "postgresql",
            SqlEngine::Mysql => "mysql",
        }
    }
}

/// Managed kinds backed by a flexible server
pub trait SqlServer {
    const ENGINE: SqlEngine;
    fn server(&self) -> &SqlServerParameters;
}

impl SqlServer for PostgresqlServer {
    const ENGINE: SqlEngine = SqlEngine::Postgresql;

    fn server(&self) -> &SqlServerParameters {
        &self.spec.server
    }
}

impl SqlServer for MysqlServer {
    const ENGINE: SqlEngine = SqlEngine::Mysql;

    fn server(&self) -> &SqlServerParameters {
        &self.spec.server
    }
}

/// Provisioner string identifying a managed kind, as used by `ResourceClass.provisioner`
pub fn provisioner_of<K>() -> String
where
    K: kube::Resource<DynamicType = ()>,
{
    format!(
        "{}.{}/{}",
        K::kind(&()).to_lowercase(),
        K::group(&()),
        K::version(&())
    )
}
