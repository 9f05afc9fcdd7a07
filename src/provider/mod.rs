//! # Provisioning Providers
//!
//! Contract between the provisioning state machine and a cloud provider.
//!
//! The state machine never blocks on an external operation. It starts one,
//! persists the returned [`OperationToken`] on the managed resource, and polls
//! it on later reconciles. Each provider decides what a token contains through
//! its own [`OperationCodec`].

pub mod azure;

use crate::constants::{
    CONNECTION_CLIENT_CERT_KEY, CONNECTION_CLIENT_KEY_KEY, CONNECTION_CLUSTER_CA_KEY,
    CONNECTION_ENDPOINT_KEY, CONNECTION_PASSWORD_KEY, CONNECTION_USERNAME_KEY,
};
use crate::store::SecretData;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use zeroize::Zeroizing;

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, throttling or a hiccup worth retrying with backoff
    #[error("transient provider error: {0}")]
    Transient(String),
    /// The provider refused the request; retrying the same input will not help
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Opaque, string-serialized handle of an in-flight external operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationToken(pub String);

impl OperationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode/decode pair between a provider's operation handle and its token
pub trait OperationCodec {
    type Handle;

    fn encode(&self, handle: &Self::Handle) -> Result<OperationToken, ProviderError>;
    fn decode(&self, token: &OperationToken) -> Result<Self::Handle, ProviderError>;
}

/// Codec storing the handle as base64-encoded JSON
pub struct JsonOperationCodec<H> {
    _handle: PhantomData<fn() -> H>,
}

impl<H> Default for JsonOperationCodec<H> {
    fn default() -> Self {
        Self {
            _handle: PhantomData,
        }
    }
}

impl<H> fmt::Debug for JsonOperationCodec<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonOperationCodec")
    }
}

impl<H: Serialize + DeserializeOwned> OperationCodec for JsonOperationCodec<H> {
    type Handle = H;

    fn encode(&self, handle: &H) -> Result<OperationToken, ProviderError> {
        let json = serde_json::to_vec(handle)
            .map_err(|e| ProviderError::Rejected(format!("failed to encode operation: {e}")))?;
        Ok(OperationToken(general_purpose::STANDARD.encode(json)))
    }

    fn decode(&self, token: &OperationToken) -> Result<H, ProviderError> {
        let json = general_purpose::STANDARD
            .decode(token.as_str())
            .map_err(|e| ProviderError::Rejected(format!("malformed operation token: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| ProviderError::Rejected(format!("malformed operation token: {e}")))
    }
}

/// Phase of an observed external resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedPhase {
    Provisioning,
    Ready,
    /// Provider reported a terminal failure
    Failed(String),
}

/// Live state of an external resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResource {
    pub provider_id: String,
    /// Provider's own state string
    pub state: String,
    pub endpoint: String,
    pub phase: ObservedPhase,
}

/// Result of polling an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPoll {
    InProgress,
    Succeeded,
    /// Operation finished unsuccessfully with the provider's message
    Failed(String),
}

/// Auxiliary identity objects created before the primary resource
///
/// Fields are filled one by one so a partially created identity is recorded
/// even when a later step fails.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub application_object_id: Option<String>,
    pub application_id: Option<String>,
    pub service_principal_id: Option<String>,
    pub client_secret: Option<Zeroizing<String>>,
}

impl fmt::Debug for ManagedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIdentity")
            .field("application_object_id", &self.application_object_id)
            .field("application_id", &self.application_id)
            .field("service_principal_id", &self.service_principal_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ManagedIdentity {
    pub fn is_complete(&self) -> bool {
        self.application_object_id.is_some()
            && self.application_id.is_some()
            && self.service_principal_id.is_some()
            && self.client_secret.is_some()
    }
}

/// Generated credentials kept in the provisioning secret
#[derive(Clone)]
pub struct ProvisioningSecret {
    pub admin_password: Zeroizing<String>,
    pub client_secret: Option<Zeroizing<String>>,
}

impl fmt::Debug for ProvisioningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProvisioningSecret { .. }")
    }
}

/// Inputs to an external create call
#[derive(Debug)]
pub struct CreateRequest<'a> {
    /// External resource name
    pub resource_name: &'a str,
    pub secret: &'a ProvisioningSecret,
    pub identity: &'a ManagedIdentity,
}

/// Connection material published once a resource is ready
#[derive(Clone, Default)]
pub struct ConnectionDetails {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub cluster_ca: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ConnectionDetails {
    /// Secret data using the connection key contract
    pub fn into_secret_data(self) -> SecretData {
        let mut data = SecretData::new();
        data.insert(CONNECTION_ENDPOINT_KEY.to_string(), self.endpoint.into_bytes());
        if let Some(username) = self.username {
            data.insert(CONNECTION_USERNAME_KEY.to_string(), username.into_bytes());
        }
        if let Some(password) = self.password {
            data.insert(CONNECTION_PASSWORD_KEY.to_string(), password.as_bytes().to_vec());
        }
        if let Some(ca) = self.cluster_ca {
            data.insert(CONNECTION_CLUSTER_CA_KEY.to_string(), ca);
        }
        if let Some(cert) = self.client_cert {
            data.insert(CONNECTION_CLIENT_CERT_KEY.to_string(), cert);
        }
        if let Some(key) = self.client_key {
            data.insert(CONNECTION_CLIENT_KEY_KEY.to_string(), key.to_vec());
        }
        data
    }
}

/// Cloud operations the provisioning state machine needs for kind `K`
#[async_trait]
pub trait ProvisioningClient<K>: Send + Sync {
    /// Whether [`ProvisioningClient::ensure_identity`] must succeed before create
    fn requires_identity(&self) -> bool {
        false
    }

    /// Create any missing auxiliary identity objects, filling `identity` in place
    async fn ensure_identity(&self, _obj: &K, _identity: &mut ManagedIdentity) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Start creating the external resource
    async fn begin_create(&self, obj: &K, request: &CreateRequest<'_>) -> Result<OperationToken, ProviderError>;

    async fn poll_operation(&self, obj: &K, token: &OperationToken) -> Result<OperationPoll, ProviderError>;

    /// Fetch live state, `None` when the external resource does not exist
    async fn observe(&self, obj: &K) -> Result<Option<ObservedResource>, ProviderError>;

    /// Start deleting the external resource, `None` when it is already gone
    async fn begin_delete(&self, obj: &K) -> Result<Option<OperationToken>, ProviderError>;

    /// Remove auxiliary identity objects recorded for `obj`
    async fn delete_identity(&self, _obj: &K, _identity: &ManagedIdentity) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn credentials(
        &self,
        obj: &K,
        observed: &ObservedResource,
        secret: &ProvisioningSecret,
    ) -> Result<ConnectionDetails, ProviderError>;
}
