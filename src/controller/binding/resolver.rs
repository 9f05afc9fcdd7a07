//! # Spec Resolver
//!
//! Pure mapping from a claim and its class to the desired spec of the managed
//! resource. Calling it twice with the same inputs yields the same spec.

use super::{resolve_version, ClaimVariant, DesiredSpec, ResolveError};
use crate::crd::{
    AksClusterSpec, MysqlServerSpec, PostgresqlServerSpec, ResourceClassSpec, SecretReference,
    SqlServerParameters,
};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

const DEFAULT_ADMIN_LOGIN: &str = "sqladmin";
const DEFAULT_SKU_TIER: &str = "GeneralPurpose";
const DEFAULT_STORAGE_GB: i32 = 32;
const DEFAULT_BACKUP_RETENTION_DAYS: i32 = 7;
const DEFAULT_NODE_COUNT: i32 = 1;
const DEFAULT_NODE_VM_SIZE: &str = "Standard_D2s_v3";

/// Typed view over the free-form class parameters
struct Parameters<'a>(&'a BTreeMap<String, String>);

impl Parameters<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ResolveError> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| ResolveError::InvalidParameters(format!("missing required parameter '{key}'")))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ResolveError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse::<T>().map_err(|e| {
                ResolveError::InvalidParameters(format!("parameter '{key}' has invalid value '{raw}': {e}"))
            }),
            None => Ok(default),
        }
    }
}

/// Resolve the desired managed spec for a claim bound to a class.
///
/// The connection secret is named after the claim UID; provider reference and
/// reclaim policy are copied from the class.
pub fn resolve(claim: &ClaimVariant, class: &ResourceClassSpec) -> Result<DesiredSpec, ResolveError> {
    let params = Parameters(&class.parameters);
    let version = resolve_version(
        params.get("version").unwrap_or_default(),
        claim.fields().requested_version(),
    )?;
    let connection_secret = Some(SecretReference { name: claim.uid()? });

    let spec = match claim {
        ClaimVariant::Postgresql(_) => DesiredSpec::Postgresql(PostgresqlServerSpec {
            server: sql_parameters(&params, version)?,
            write_connection_secret_to_reference: connection_secret,
            provider_reference: class.provider_ref.clone(),
            reclaim_policy: class.reclaim_policy,
        }),
        ClaimVariant::Mysql(_) => DesiredSpec::Mysql(MysqlServerSpec {
            server: sql_parameters(&params, version)?,
            write_connection_secret_to_reference: connection_secret,
            provider_reference: class.provider_ref.clone(),
            reclaim_policy: class.reclaim_policy,
        }),
        ClaimVariant::Kubernetes(_) => {
            let node_count = params.parse_or("nodeCount", DEFAULT_NODE_COUNT)?;
            if node_count < 1 {
                return Err(ResolveError::InvalidParameters(format!(
                    "nodeCount must be at least 1, got {node_count}"
                )));
            }
            DesiredSpec::Aks(AksClusterSpec {
                resource_group_name: params.required("resourceGroupName")?,
                location: params.required("location")?,
                version,
                node_count,
                node_vm_size: params.string_or("nodeVMSize", DEFAULT_NODE_VM_SIZE),
                dns_name_prefix: params.string_or("dnsNamePrefix", &claim.name()),
                disable_rbac: params.parse_or("disableRBAC", false)?,
                write_connection_secret_to_reference: connection_secret,
                provider_reference: class.provider_ref.clone(),
                reclaim_policy: class.reclaim_policy,
            })
        }
    };
    Ok(spec)
}

fn sql_parameters(params: &Parameters<'_>, version: String) -> Result<SqlServerParameters, ResolveError> {
    if version.is_empty() {
        return Err(ResolveError::InvalidParameters(
            "an engine version is required from the class or the claim".to_string(),
        ));
    }
    let storage_gb = params.parse_or("storageGB", DEFAULT_STORAGE_GB)?;
    if storage_gb <= 0 {
        return Err(ResolveError::InvalidParameters(format!(
            "storageGB must be positive, got {storage_gb}"
        )));
    }
    Ok(SqlServerParameters {
        admin_login_name: params.string_or("adminLoginName", DEFAULT_ADMIN_LOGIN),
        resource_group_name: params.required("resourceGroupName")?,
        location: params.required("location")?,
        version,
        sku_name: params.required("skuName")?,
        sku_tier: params.string_or("skuTier", DEFAULT_SKU_TIER),
        storage_gb,
        backup_retention_days: params.parse_or("backupRetentionDays", DEFAULT_BACKUP_RETENTION_DAYS)?,
        geo_redundant_backup: params.parse_or("geoRedundantBackup", false)?,
    })
}
