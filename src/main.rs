//! # Resource Claim Controller
//!
//! Binds tenant resource claims to operator-defined classes and provisions the
//! backing Azure resources asynchronously.
//!
//! ## Overview
//!
//! 1. **Claim binding** - a `PostgreSQLInstance`, `MySQLInstance` or
//!    `KubernetesCluster` claim is resolved against its `ResourceClass` into a
//!    managed resource owned by the claim
//! 2. **Provisioning** - each managed resource is driven through a
//!    non-blocking state machine that starts, polls and observes Azure
//!    operations across reconciles
//! 3. **Connection secrets** - once ready, connection details are published
//!    and copied into the secret the claim asked for
//! 4. **Finalization** - deleting a managed resource tears down the external
//!    resource unless its reclaim policy is `Retain`

use anyhow::Result;
use resource_claim_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.config, init.azure, init.server_state).await
}
