//! # Azure Configuration
//!
//! Azure endpoints and authentication switches loaded from environment variables.

use super::env_var_or_default;
use crate::constants::*;

/// Azure endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    /// Azure Resource Manager base URL
    pub resource_manager_endpoint: String,
    /// Microsoft Graph base URL
    pub graph_endpoint: String,
    /// Use a fixed token instead of real Azure credentials (mock servers, local runs)
    pub mock_credentials: bool,
    /// HTTP timeout for Azure REST calls (seconds)
    pub http_timeout_secs: u64,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            resource_manager_endpoint: DEFAULT_AZURE_RESOURCE_MANAGER_ENDPOINT.to_string(),
            graph_endpoint: DEFAULT_AZURE_GRAPH_ENDPOINT.to_string(),
            mock_credentials: false,
            http_timeout_secs: DEFAULT_AZURE_HTTP_TIMEOUT_SECS,
        }
    }
}

impl AzureConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            resource_manager_endpoint: env_var_or_default(
                "AZURE_RESOURCE_MANAGER_ENDPOINT",
                DEFAULT_AZURE_RESOURCE_MANAGER_ENDPOINT.to_string(),
            )
            .trim_end_matches('/')
            .to_string(),
            graph_endpoint: env_var_or_default("AZURE_GRAPH_ENDPOINT", DEFAULT_AZURE_GRAPH_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            mock_credentials: std::env::var("AZURE_MOCK_CREDENTIALS").is_ok(),
            http_timeout_secs: env_var_or_default("AZURE_HTTP_TIMEOUT_SECS", DEFAULT_AZURE_HTTP_TIMEOUT_SECS),
        }
    }
}
