//! # Configuration
//!
//! Controller and server configuration loaded from environment variables.
//!
//! All configuration has defaults. Environment variables are usually populated
//! from a ConfigMap with `envFrom` in the deployment.

mod azure;
mod controller;
mod server;

pub use azure::AzureConfig;
pub use controller::ControllerConfig;
pub use server::ServerConfig;

/// Load configuration from environment variables with defaults
pub fn load_config() -> (ControllerConfig, ServerConfig) {
    (ControllerConfig::from_env(), ServerConfig::from_env())
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
