//! # Flexible Servers
//!
//! Azure Database for PostgreSQL and MySQL flexible servers. Both engines
//! share the same ARM shape and differ in resource provider, API version and
//! port.

use super::http::AsyncOperation;
use super::{recorded_name, resource_path, AzureContext};
use crate::controller::reconciler::Managed;
use crate::crd::{SqlEngine, SqlServer, SqlServerParameters};
use crate::provider::{
    ConnectionDetails, CreateRequest, ObservedPhase, ObservedResource, OperationPoll,
    OperationToken, ProviderError, ProvisioningClient, ProvisioningSecret,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

const RESOURCE_TYPE: &str = "flexibleServers";

/// Provisioning client for flexible server kinds
pub struct FlexibleServerClient<K> {
    ctx: Arc<AzureContext>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for FlexibleServerClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexibleServerClient").finish_non_exhaustive()
    }
}

impl<K: Managed + SqlServer> FlexibleServerClient<K> {
    pub fn new(ctx: Arc<AzureContext>) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    fn provider_label() -> String {
        format!("azure-{}", K::ENGINE.as_str())
    }

    async fn server_url(&self, obj: &K, suffix: &str) -> Result<(String, String), ProviderError> {
        let session = self.ctx.arm_session(obj).await?;
        let path = resource_path(
            &session.subscription_id,
            &obj.server().resource_group_name,
            K::ENGINE.resource_provider(),
            RESOURCE_TYPE,
            &recorded_name(obj),
        );
        Ok((
            self.ctx.arm_url(&format!("{path}{suffix}"), K::ENGINE.api_version()),
            session.token,
        ))
    }
}

/// Request body for creating a flexible server
pub fn server_body(params: &SqlServerParameters, admin_password: &str) -> Value {
    json!({
        "location": params.location,
        "sku": {
            "name": params.sku_name,
            "tier": params.sku_tier,
        },
        "properties": {
            "administratorLogin": params.admin_login_name,
            "administratorLoginPassword": admin_password,
            "version": params.version,
            "storage": { "storageSizeGB": params.storage_gb },
            "backup": {
                "backupRetentionDays": params.backup_retention_days,
                "geoRedundantBackup": if params.geo_redundant_backup { "Enabled" } else { "Disabled" },
            },
            "createMode": "Default",
        },
    })
}

/// Map a flexible server GET body to its observed state
pub fn observed_server(engine: SqlEngine, body: &Value) -> ObservedResource {
    let str_at = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let state = str_at("/properties/state");
    let phase = match state.as_str() {
        "Ready" => ObservedPhase::Ready,
        "Disabled" => ObservedPhase::Failed(format!("{} server is disabled", engine.as_str())),
        _ => ObservedPhase::Provisioning,
    };
    let fqdn = str_at("/properties/fullyQualifiedDomainName");
    ObservedResource {
        provider_id: str_at("/id"),
        state,
        endpoint: if fqdn.is_empty() {
            fqdn
        } else {
            format!("{fqdn}:{}", engine.port())
        },
        phase,
    }
}

#[async_trait]
impl<K: Managed + SqlServer> ProvisioningClient<K> for FlexibleServerClient<K> {
    async fn begin_create(&self, obj: &K, request: &CreateRequest<'_>) -> Result<OperationToken, ProviderError> {
        let body = server_body(obj.server(), &request.secret.admin_password);
        let (url, token) = self.server_url(obj, "").await?;
        let reply = self
            .ctx
            .http
            .send(&Self::provider_label(), "create_server", Method::PUT, &url, &token, Some(&body))
            .await?;
        info!(
            "Started creating {} server {}",
            K::ENGINE.as_str(),
            request.resource_name
        );
        AsyncOperation::from_reply(&reply).encode()
    }

    async fn poll_operation(&self, obj: &K, token: &OperationToken) -> Result<OperationPoll, ProviderError> {
        let operation = AsyncOperation::decode(token)?;
        let session = self.ctx.arm_session(obj).await?;
        operation
            .poll(&self.ctx.http, &Self::provider_label(), &session.token)
            .await
    }

    async fn observe(&self, obj: &K) -> Result<Option<ObservedResource>, ProviderError> {
        let (url, token) = self.server_url(obj, "").await?;
        let reply = self
            .ctx
            .http
            .send(&Self::provider_label(), "get_server", Method::GET, &url, &token, None)
            .await?;
        if reply.is_not_found() {
            return Ok(None);
        }
        Ok(Some(observed_server(K::ENGINE, &reply.body)))
    }

    async fn begin_delete(&self, obj: &K) -> Result<Option<OperationToken>, ProviderError> {
        let (url, token) = self.server_url(obj, "").await?;
        let reply = self
            .ctx
            .http
            .send(&Self::provider_label(), "delete_server", Method::DELETE, &url, &token, None)
            .await?;
        if reply.is_not_found() || reply.status == StatusCode::NO_CONTENT {
            debug!("{} server {} is already gone", K::ENGINE.as_str(), recorded_name(obj));
            return Ok(None);
        }
        AsyncOperation::from_reply(&reply).encode().map(Some)
    }

    async fn credentials(
        &self,
        obj: &K,
        observed: &ObservedResource,
        secret: &ProvisioningSecret,
    ) -> Result<ConnectionDetails, ProviderError> {
        if observed.endpoint.is_empty() {
            return Err(ProviderError::Transient(format!(
                "{} server {} has no endpoint yet",
                K::ENGINE.as_str(),
                recorded_name(obj)
            )));
        }
        Ok(ConnectionDetails {
            endpoint: observed.endpoint.clone(),
            username: Some(obj.server().admin_login_name.clone()),
            password: Some(Zeroizing::new(secret.admin_password.to_string())),
            ..Default::default()
        })
    }
}
