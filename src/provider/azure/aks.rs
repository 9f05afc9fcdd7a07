//! # AKS Managed Clusters
//!
//! Creates the cluster's Azure AD application, client secret and service
//! principal through Graph, then the managed cluster through ARM. Connection
//! details come from the cluster admin kubeconfig.

use super::graph::GraphClient;
use super::http::AsyncOperation;
use super::{kubeconfig, recorded_name, resource_path, AzureContext};
use crate::crd::{AksCluster, AksClusterSpec};
use crate::provider::{
    ConnectionDetails, CreateRequest, ManagedIdentity, ObservedPhase, ObservedResource,
    OperationPoll, OperationToken, ProviderError, ProvisioningClient, ProvisioningSecret,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const PROVIDER: &str = "azure-aks";
const RESOURCE_PROVIDER: &str = "Microsoft.ContainerService";
const RESOURCE_TYPE: &str = "managedClusters";
const API_VERSION: &str = "2023-08-01";
const AGENT_POOL_NAME: &str = "agentpool";

/// Provisioning client for [`AksCluster`]
#[derive(Debug, Clone)]
pub struct AksClient {
    ctx: Arc<AzureContext>,
}

impl AksClient {
    pub fn new(ctx: Arc<AzureContext>) -> Self {
        Self { ctx }
    }

    async fn cluster_url(&self, obj: &AksCluster) -> Result<(String, String), ProviderError> {
        let session = self.ctx.arm_session(obj).await?;
        let path = resource_path(
            &session.subscription_id,
            &obj.spec.resource_group_name,
            RESOURCE_PROVIDER,
            RESOURCE_TYPE,
            &recorded_name(obj),
        );
        Ok((self.ctx.arm_url(&path, API_VERSION), session.token))
    }
}

/// Request body for creating a managed cluster
pub fn cluster_body(spec: &AksClusterSpec, identity: &ManagedIdentity) -> Result<Value, ProviderError> {
    let (Some(client_id), Some(secret)) = (&identity.application_id, &identity.client_secret) else {
        return Err(ProviderError::Transient(
            "cluster service principal is not ready yet".to_string(),
        ));
    };

    let mut properties = json!({
        "dnsPrefix": spec.dns_name_prefix,
        "enableRBAC": !spec.disable_rbac,
        "agentPoolProfiles": [{
            "name": AGENT_POOL_NAME,
            "count": spec.node_count,
            "vmSize": spec.node_vm_size,
            "mode": "System",
            "osType": "Linux",
        }],
        "servicePrincipalProfile": {
            "clientId": client_id,
            "secret": secret.as_str(),
        },
    });
    if !spec.version.is_empty() {
        properties["kubernetesVersion"] = json!(spec.version);
    }

    Ok(json!({
        "location": spec.location,
        "properties": properties,
    }))
}

/// Map a managed cluster GET body to its observed state
pub fn observed_cluster(body: &Value) -> ObservedResource {
    let str_at = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let state = str_at("/properties/provisioningState");
    let phase = match state.as_str() {
        "Succeeded" => ObservedPhase::Ready,
        "Failed" | "Canceled" => ObservedPhase::Failed(format!("managed cluster provisioning state is {state}")),
        _ => ObservedPhase::Provisioning,
    };
    ObservedResource {
        provider_id: str_at("/id"),
        state,
        endpoint: str_at("/properties/fqdn"),
        phase,
    }
}

/// ARM may not see a freshly created service principal yet
pub fn retry_unreplicated_principal(err: ProviderError) -> ProviderError {
    match err {
        ProviderError::Rejected(msg)
            if msg.contains("ServicePrincipalNotFound") || msg.contains("not found in Active Directory") =>
        {
            ProviderError::Transient(msg)
        }
        other => other,
    }
}

/// Decode the first kubeconfig of a `listClusterAdminCredential` reply
pub fn admin_kubeconfig(body: &Value) -> Result<Vec<u8>, ProviderError> {
    let encoded = body
        .pointer("/kubeconfigs/0/value")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Transient("cluster admin credentials are not available yet".to_string()))?;
    general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::Rejected(format!("cluster admin kubeconfig is not valid base64: {e}")))
}

#[async_trait]
impl ProvisioningClient<AksCluster> for AksClient {
    fn requires_identity(&self) -> bool {
        true
    }

    async fn ensure_identity(&self, obj: &AksCluster, identity: &mut ManagedIdentity) -> Result<(), ProviderError> {
        let provider = self.ctx.provider_for(obj).await?;
        let graph = GraphClient::connect(
            &self.ctx.http,
            &self.ctx.config.graph_endpoint,
            provider.credential.as_ref(),
        )
        .await?;

        let object_id = match &identity.application_object_id {
            Some(id) => id.clone(),
            None => {
                let application = graph.create_application(&recorded_name(obj)).await?;
                identity.application_object_id = Some(application.object_id.clone());
                identity.application_id = Some(application.app_id);
                application.object_id
            }
        };
        let app_id = identity
            .application_id
            .clone()
            .ok_or_else(|| ProviderError::Rejected(format!("application {object_id} has no recorded appId")))?;

        if identity.client_secret.is_none() {
            identity.client_secret = Some(graph.add_password(&object_id).await?);
        }
        if identity.service_principal_id.is_none() {
            identity.service_principal_id = Some(graph.create_service_principal(&app_id).await?);
        }
        Ok(())
    }

    async fn begin_create(&self, obj: &AksCluster, request: &CreateRequest<'_>) -> Result<OperationToken, ProviderError> {
        let body = cluster_body(&obj.spec, request.identity)?;
        let (url, token) = self.cluster_url(obj).await?;
        let reply = self
            .ctx
            .http
            .send(PROVIDER, "create_cluster", Method::PUT, &url, &token, Some(&body))
            .await
            .map_err(retry_unreplicated_principal)?;
        info!("Started creating managed cluster {}", request.resource_name);
        AsyncOperation::from_reply(&reply).encode()
    }

    async fn poll_operation(&self, obj: &AksCluster, token: &OperationToken) -> Result<OperationPoll, ProviderError> {
        let operation = AsyncOperation::decode(token)?;
        let session = self.ctx.arm_session(obj).await?;
        operation.poll(&self.ctx.http, PROVIDER, &session.token).await
    }

    async fn observe(&self, obj: &AksCluster) -> Result<Option<ObservedResource>, ProviderError> {
        let (url, token) = self.cluster_url(obj).await?;
        let reply = self
            .ctx
            .http
            .send(PROVIDER, "get_cluster", Method::GET, &url, &token, None)
            .await?;
        if reply.is_not_found() {
            return Ok(None);
        }
        Ok(Some(observed_cluster(&reply.body)))
    }

    async fn begin_delete(&self, obj: &AksCluster) -> Result<Option<OperationToken>, ProviderError> {
        let (url, token) = self.cluster_url(obj).await?;
        let reply = self
            .ctx
            .http
            .send(PROVIDER, "delete_cluster", Method::DELETE, &url, &token, None)
            .await?;
        if reply.is_not_found() || reply.status == StatusCode::NO_CONTENT {
            debug!("Managed cluster {} is already gone", recorded_name(obj));
            return Ok(None);
        }
        AsyncOperation::from_reply(&reply).encode().map(Some)
    }

    async fn delete_identity(&self, obj: &AksCluster, identity: &ManagedIdentity) -> Result<(), ProviderError> {
        let provider = self.ctx.provider_for(obj).await?;
        let graph = GraphClient::connect(
            &self.ctx.http,
            &self.ctx.config.graph_endpoint,
            provider.credential.as_ref(),
        )
        .await?;
        if let Some(id) = &identity.service_principal_id {
            graph.delete_service_principal(id).await?;
        }
        if let Some(id) = &identity.application_object_id {
            graph.delete_application(id).await?;
        }
        Ok(())
    }

    async fn credentials(
        &self,
        obj: &AksCluster,
        _observed: &ObservedResource,
        _secret: &ProvisioningSecret,
    ) -> Result<ConnectionDetails, ProviderError> {
        let session = self.ctx.arm_session(obj).await?;
        let path = format!(
            "{}/listClusterAdminCredential",
            resource_path(
                &session.subscription_id,
                &obj.spec.resource_group_name,
                RESOURCE_PROVIDER,
                RESOURCE_TYPE,
                &recorded_name(obj),
            )
        );
        let url = self.ctx.arm_url(&path, API_VERSION);
        let reply = self
            .ctx
            .http
            .send(PROVIDER, "list_admin_credential", Method::POST, &url, &session.token, None)
            .await?;
        let access = kubeconfig::parse(&admin_kubeconfig(&reply.body)?)?;
        Ok(ConnectionDetails {
            endpoint: access.server,
            username: None,
            password: None,
            cluster_ca: access.cluster_ca,
            client_cert: access.client_cert,
            client_key: access.client_key,
        })
    }
}
