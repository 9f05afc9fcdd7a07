//! # Credential Publisher
//!
//! Generated provisioning credentials and the connection secret written once a
//! managed resource first becomes ready.

use super::{Managed, ProvisioningReconciler, ReconcileError};
use crate::constants::{
    EXTERNAL_NAME_UID_PREFIX_LEN, PROVISIONING_ADMIN_PASSWORD_KEY, PROVISIONING_CLIENT_SECRET_KEY,
    PROVISIONING_SECRET_SUFFIX,
};
use crate::observability::metrics;
use crate::provider::{ObservedResource, ProvisioningSecret};
use crate::store::{SecretData, WriteOutcome};
use kube::ResourceExt;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// External resource name: `<name>-<uid prefix>`
pub fn external_name<K: Managed>(obj: &K) -> String {
    let name = obj.name_any();
    match obj.uid() {
        Some(uid) if !uid.is_empty() => {
            let prefix: String = uid.chars().take(EXTERNAL_NAME_UID_PREFIX_LEN).collect();
            format!("{name}-{prefix}")
        }
        _ => name,
    }
}

/// Name of the secret holding generated credentials for a managed resource
pub fn provisioning_secret_name<K: Managed>(obj: &K) -> String {
    format!("{}{}", obj.name_any(), PROVISIONING_SECRET_SUFFIX)
}

fn generate_password() -> Zeroizing<String> {
    // lower case hex, upper case hex and digits satisfy Azure's complexity rules
    let lower = uuid::Uuid::new_v4().simple().to_string();
    let upper = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    Zeroizing::new(format!("{lower}{upper}"))
}

fn parse_provisioning_secret(data: &SecretData) -> Option<ProvisioningSecret> {
    let admin_password = data
        .get(PROVISIONING_ADMIN_PASSWORD_KEY)
        .and_then(|v| String::from_utf8(v.clone()).ok())
        .filter(|v| !v.is_empty())?;
    let client_secret = data
        .get(PROVISIONING_CLIENT_SECRET_KEY)
        .and_then(|v| String::from_utf8(v.clone()).ok())
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new);
    Some(ProvisioningSecret {
        admin_password: Zeroizing::new(admin_password),
        client_secret,
    })
}

impl<K: Managed> ProvisioningReconciler<K> {
    async fn read_provisioning_secret(&self, obj: &K) -> Result<Option<ProvisioningSecret>, ReconcileError> {
        let namespace = obj.namespace().unwrap_or_default();
        let data = self
            .secrets
            .read(&provisioning_secret_name(obj), &namespace)
            .await?;
        Ok(data.as_ref().and_then(parse_provisioning_secret))
    }

    /// Load the generated credentials, creating them on first use
    pub(super) async fn load_or_generate_provisioning_secret(
        &self,
        obj: &K,
    ) -> Result<ProvisioningSecret, ReconcileError> {
        if let Some(secret) = self.read_provisioning_secret(obj).await? {
            return Ok(secret);
        }
        let secret = ProvisioningSecret {
            admin_password: generate_password(),
            client_secret: None,
        };
        self.store_provisioning_secret(obj, &secret).await?;
        debug!("Generated provisioning credentials for {}", obj.name_any());
        Ok(secret)
    }

    pub(super) async fn store_provisioning_secret(
        &self,
        obj: &K,
        secret: &ProvisioningSecret,
    ) -> Result<(), ReconcileError> {
        let mut data = SecretData::new();
        data.insert(
            PROVISIONING_ADMIN_PASSWORD_KEY.to_string(),
            secret.admin_password.as_bytes().to_vec(),
        );
        if let Some(client_secret) = &secret.client_secret {
            data.insert(
                PROVISIONING_CLIENT_SECRET_KEY.to_string(),
                client_secret.as_bytes().to_vec(),
            );
        }
        self.secrets
            .write(
                &provisioning_secret_name(obj),
                &obj.namespace().unwrap_or_default(),
                data,
                obj.controller_owner_ref(&()),
            )
            .await?;
        Ok(())
    }

    /// Fetch connection material and write the connection secret.
    ///
    /// Writing identical data again leaves the stored secret untouched.
    pub(super) async fn publish(&self, obj: &K, observed: &ObservedResource) -> Result<(), ReconcileError> {
        let Some(secret_ref) = obj.connection_secret_ref() else {
            debug!("{} has no connection secret reference, nothing to publish", obj.name_any());
            return Ok(());
        };
        let provisioning = self.read_provisioning_secret(obj).await?.ok_or_else(|| {
            ReconcileError::Publish(format!(
                "provisioning secret {} is missing",
                provisioning_secret_name(obj)
            ))
        })?;

        let details = self
            .provider
            .credentials(obj, observed, &provisioning)
            .await
            .map_err(|e| ReconcileError::Publish(e.to_string()))?;

        let namespace = obj.namespace().unwrap_or_default();
        let outcome = self
            .secrets
            .write(
                &secret_ref.name,
                &namespace,
                details.into_secret_data(),
                obj.controller_owner_ref(&()),
            )
            .await?;

        if outcome != WriteOutcome::Unchanged {
            metrics::increment_connection_secrets_published();
        }
        info!(
            "Published connection secret {}/{} for {} ({:?})",
            namespace,
            secret_ref.name,
            obj.name_any(),
            outcome
        );
        Ok(())
    }
}
