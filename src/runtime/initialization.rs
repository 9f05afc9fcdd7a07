//! # Initialization
//!
//! Controller start-up: rustls provider, tracing, metrics, the probe server
//! and the Kubernetes client.

use crate::config::{load_config, AzureConfig, ControllerConfig, ServerConfig};
use crate::controller::server::{start_server, ServerState};
use crate::observability;
use crate::provider::azure::AzureContext;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub azure: Arc<AzureContext>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("azure", &self.azure)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // must happen before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_claim_controller=info".into()),
        )
        .init();

    info!("Starting Resource Claim Controller v{}", env!("CARGO_PKG_VERSION"));

    let (config, server_config) = load_config();
    info!(
        "Configuration: creating requeue {}s, sync period {}s, watch namespace {}",
        config.creating_requeue_secs,
        config.sync_period_secs,
        config.watch_namespace.as_deref().unwrap_or("<all>")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = server_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_config, &server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let azure_config = AzureConfig::from_env();
    if azure_config.mock_credentials {
        info!("AZURE_MOCK_CREDENTIALS set, Azure calls use a fixed token");
    }
    let azure = Arc::new(AzureContext::new(client.clone(), azure_config).context("Failed to set up Azure clients")?);

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        config,
        azure,
        server_state,
    })
}

/// Wait for the HTTP server to bind before reconciling anything
async fn wait_for_server_ready(
    server_config: &ServerConfig,
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(server_config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
