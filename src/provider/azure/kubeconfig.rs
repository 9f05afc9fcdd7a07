//! # Kubeconfig Parsing
//!
//! Extracts the endpoint and certificate material from the admin kubeconfig
//! returned by AKS.

use crate::provider::ProviderError;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use zeroize::Zeroizing;

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
}

/// Connection material from a kubeconfig
pub struct ClusterAccess {
    pub server: String,
    pub cluster_ca: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for ClusterAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAccess")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

fn decode_field(value: Option<&String>, field: &str) -> Result<Option<Vec<u8>>, ProviderError> {
    value
        .map(|v| {
            general_purpose::STANDARD
                .decode(v.trim())
                .map_err(|e| ProviderError::Rejected(format!("kubeconfig {field} is not valid base64: {e}")))
        })
        .transpose()
}

/// Parse the first cluster and user of a kubeconfig document
pub fn parse(document: &[u8]) -> Result<ClusterAccess, ProviderError> {
    let config: Kubeconfig = serde_yaml::from_slice(document)
        .map_err(|e| ProviderError::Rejected(format!("invalid kubeconfig: {e}")))?;
    let cluster = config
        .clusters
        .first()
        .map(|c| &c.cluster)
        .ok_or_else(|| ProviderError::Rejected("kubeconfig has no clusters".to_string()))?;
    let user = config.users.first().map(|u| &u.user);

    Ok(ClusterAccess {
        server: cluster.server.clone(),
        cluster_ca: decode_field(cluster.certificate_authority_data.as_ref(), "certificate-authority-data")?,
        client_cert: decode_field(
            user.and_then(|u| u.client_certificate_data.as_ref()),
            "client-certificate-data",
        )?,
        client_key: decode_field(user.and_then(|u| u.client_key_data.as_ref()), "client-key-data")?
            .map(Zeroizing::new),
    })
}
