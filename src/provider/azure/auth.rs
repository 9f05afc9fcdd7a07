//! # Azure Authentication
//!
//! Resolves `Provider` resources into a subscription and token credential,
//! including a mock credential for local runs against mock servers.

use crate::crd::{AzureAuthConfig, Provider, ProviderReference, ProviderSpec};
use crate::provider::ProviderError;
use anyhow::{Context, Result};
use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use kube::Api;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// OAuth scope for Azure Resource Manager
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// OAuth scope for Microsoft Graph
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Mock TokenCredential returning a dummy token without real Azure authentication
#[derive(Debug)]
pub struct MockTokenCredential;

#[async_trait::async_trait]
impl TokenCredential for MockTokenCredential {
    async fn get_token(
        &self,
        _scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        use typespec_client_core::time::{Duration, OffsetDateTime};

        Ok(AccessToken::new(
            Secret::new("test-token".to_string()),
            OffsetDateTime::now_utc() + Duration::seconds(3600),
        ))
    }
}

/// Create an Azure credential for a provider
/// Supports Workload Identity and Managed Identity
pub fn create_credential(spec: &ProviderSpec, mock: bool) -> Result<Arc<dyn TokenCredential>> {
    if mock {
        debug!("Mock credentials enabled: using fixed Azure token");
        return Ok(Arc::new(MockTokenCredential));
    }
    let credential: Arc<dyn TokenCredential> = match &spec.auth {
        Some(AzureAuthConfig::WorkloadIdentity { client_id }) => {
            info!(
                "Using Azure Workload Identity authentication with client ID: {}",
                client_id
            );
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: Some(client_id.clone()),
                ..Default::default()
            };
            WorkloadIdentityCredential::new(Some(options))
                .context("Failed to create WorkloadIdentityCredential")?
        }
        None => {
            info!("No auth configuration specified, using Managed Identity");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        }
    };
    Ok(credential)
}

/// Fetch a bearer token for `scope`
pub async fn bearer_token(credential: &dyn TokenCredential, scope: &str) -> Result<String, ProviderError> {
    let token = credential
        .get_token(&[scope], Some(TokenRequestOptions::default()))
        .await
        .map_err(|e| ProviderError::Transient(format!("failed to acquire Azure token for {scope}: {e}")))?;
    Ok(token.token.secret().to_string())
}

/// Subscription and credential of a resolved `Provider`
pub struct ResolvedProvider {
    pub subscription_id: String,
    pub credential: Arc<dyn TokenCredential>,
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

/// Looks up `Provider` resources and caches their credentials
pub struct ProviderDirectory {
    client: kube::Client,
    mock_credentials: bool,
    /// Keyed by `<namespace>/<name>` and the serialized auth block
    credentials: RwLock<HashMap<(String, String), Arc<dyn TokenCredential>>>,
}

impl std::fmt::Debug for ProviderDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDirectory")
            .field("mock_credentials", &self.mock_credentials)
            .finish_non_exhaustive()
    }
}

impl ProviderDirectory {
    pub fn new(client: kube::Client, mock_credentials: bool) -> Self {
        Self {
            client,
            mock_credentials,
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a provider reference, defaulting to `namespace` when the reference has none
    pub async fn resolve(
        &self,
        reference: &ProviderReference,
        namespace: &str,
    ) -> Result<ResolvedProvider, ProviderError> {
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);
        let api: Api<Provider> = Api::namespaced(self.client.clone(), namespace);
        let provider = api
            .get_opt(&reference.name)
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read provider {namespace}/{}: {e}", reference.name)))?
            // may be created after the resource that references it
            .ok_or_else(|| ProviderError::Transient(format!("provider {namespace}/{} not found", reference.name)))?;

        let auth_key = serde_json::to_string(&provider.spec.auth).unwrap_or_default();
        let cache_key = (format!("{namespace}/{}", reference.name), auth_key);

        if let Some(credential) = self.credentials.read().await.get(&cache_key) {
            return Ok(ResolvedProvider {
                subscription_id: provider.spec.subscription_id.clone(),
                credential: Arc::clone(credential),
            });
        }

        let credential = create_credential(&provider.spec, self.mock_credentials)
            .map_err(|e| ProviderError::Rejected(format!("{e:#}")))?;
        self.credentials
            .write()
            .await
            .insert(cache_key, Arc::clone(&credential));

        Ok(ResolvedProvider {
            subscription_id: provider.spec.subscription_id,
            credential,
        })
    }
}
