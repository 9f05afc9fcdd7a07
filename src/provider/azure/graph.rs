//! # Microsoft Graph
//!
//! Application and service principal management for AKS cluster identities.

use super::auth::{bearer_token, GRAPH_SCOPE};
use super::http::{AzureHttp, HttpReply};
use crate::provider::ProviderError;
use azure_core::credentials::TokenCredential;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use zeroize::Zeroizing;

const GRAPH_PROVIDER: &str = "azure-graph";

/// Graph API client bound to one credential
pub struct GraphClient<'a> {
    http: &'a AzureHttp,
    endpoint: &'a str,
    token: String,
}

impl std::fmt::Debug for GraphClient<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Created application identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub object_id: String,
    pub app_id: String,
}

fn required_str(body: &Value, field: &str, what: &str) -> Result<String, ProviderError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Transient(format!("{what} response has no {field}")))
}

impl<'a> GraphClient<'a> {
    pub async fn connect(
        http: &'a AzureHttp,
        endpoint: &'a str,
        credential: &dyn TokenCredential,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http,
            endpoint,
            token: bearer_token(credential, GRAPH_SCOPE).await?,
        })
    }

    async fn call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<HttpReply, ProviderError> {
        let url = format!("{}/v1.0{}", self.endpoint, path);
        self.http
            .send(GRAPH_PROVIDER, operation, method, &url, &self.token, body)
            .await
    }

    pub async fn create_application(&self, display_name: &str) -> Result<Application, ProviderError> {
        let body = json!({ "displayName": display_name });
        let reply = self
            .call("create_application", Method::POST, "/applications", Some(&body))
            .await?;
        let application = Application {
            object_id: required_str(&reply.body, "id", "application")?,
            app_id: required_str(&reply.body, "appId", "application")?,
        };
        info!(
            "Created application {} (appId {})",
            application.object_id, application.app_id
        );
        Ok(application)
    }

    /// Add a client secret; Graph returns the secret text only once
    pub async fn add_password(&self, object_id: &str) -> Result<Zeroizing<String>, ProviderError> {
        let body = json!({ "passwordCredential": { "displayName": "resource-claim-controller" } });
        let reply = self
            .call(
                "add_password",
                Method::POST,
                &format!("/applications/{object_id}/addPassword"),
                Some(&body),
            )
            .await?;
        required_str(&reply.body, "secretText", "addPassword").map(Zeroizing::new)
    }

    pub async fn create_service_principal(&self, app_id: &str) -> Result<String, ProviderError> {
        let body = json!({ "appId": app_id });
        let reply = self
            .call(
                "create_service_principal",
                Method::POST,
                "/servicePrincipals",
                Some(&body),
            )
            .await
            .map_err(|e| match e {
                // directory replication lag right after the application was created
                ProviderError::Rejected(msg) if msg.contains("does not reference a valid application") => {
                    ProviderError::Transient(msg)
                }
                other => other,
            })?;
        let id = required_str(&reply.body, "id", "service principal")?;
        info!("Created service principal {} for appId {}", id, app_id);
        Ok(id)
    }

    /// Delete an application; its service principal goes with it
    pub async fn delete_application(&self, object_id: &str) -> Result<(), ProviderError> {
        let reply = self
            .call(
                "delete_application",
                Method::DELETE,
                &format!("/applications/{object_id}"),
                None,
            )
            .await?;
        if reply.is_not_found() {
            debug!("Application {} already deleted", object_id);
        }
        Ok(())
    }

    pub async fn delete_service_principal(&self, id: &str) -> Result<(), ProviderError> {
        let reply = self
            .call(
                "delete_service_principal",
                Method::DELETE,
                &format!("/servicePrincipals/{id}"),
                None,
            )
            .await?;
        if reply.is_not_found() {
            debug!("Service principal {} already deleted", id);
        }
        Ok(())
    }
}
