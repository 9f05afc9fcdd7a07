//! # RCCTL CLI
//!
//! Command-line interface for the Resource Claim Controller.
//!
//! ## Usage
//!
//! ```bash
//! # List managed PostgreSQL servers in all namespaces
//! rcctl list --kind postgresql
//!
//! # Show status of an AKS cluster
//! rcctl status --kind aks --namespace team-a --name akscluster-4a7e2c1b
//!
//! # Trigger reconciliation of a MySQL server
//! rcctl reconcile --kind mysql --namespace orders --name mysqlserver-9f1c
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use resource_claim_controller::constants::{FIELD_MANAGER, RECONCILE_ANNOTATION};
use resource_claim_controller::controller::reconciler::Managed;
use resource_claim_controller::crd::{AksCluster, ConditionStatus, ConditionType, MysqlServer, PostgresqlServer};
use serde::de::DeserializeOwned;
use serde_json::json;

/// Resource Claim Controller CLI
#[derive(Parser)]
#[command(name = "rcctl")]
#[command(about = "Resource Claim Controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to all namespaces for list, "default" otherwise)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

/// Managed resource kind
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Postgresql,
    Mysql,
    Aks,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger reconciliation of a managed resource
    Reconcile {
        #[arg(short, long, value_enum)]
        kind: Kind,
        #[arg(long)]
        name: String,
    },
    /// List managed resources
    List {
        #[arg(short, long, value_enum)]
        kind: Kind,
    },
    /// Show provisioning status of a managed resource
    Status {
        #[arg(short, long, value_enum)]
        kind: Kind,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rcctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let namespace = cli.namespace;

    match cli.command {
        Commands::Reconcile { kind, name } => match kind {
            Kind::Postgresql => reconcile_command::<PostgresqlServer>(client, &name, namespace).await,
            Kind::Mysql => reconcile_command::<MysqlServer>(client, &name, namespace).await,
            Kind::Aks => reconcile_command::<AksCluster>(client, &name, namespace).await,
        },
        Commands::List { kind } => match kind {
            Kind::Postgresql => list_command::<PostgresqlServer>(client, namespace).await,
            Kind::Mysql => list_command::<MysqlServer>(client, namespace).await,
            Kind::Aks => list_command::<AksCluster>(client, namespace).await,
        },
        Commands::Status { kind, name } => match kind {
            Kind::Postgresql => status_command::<PostgresqlServer>(client, &name, namespace).await,
            Kind::Mysql => status_command::<MysqlServer>(client, &name, namespace).await,
            Kind::Aks => status_command::<AksCluster>(client, &name, namespace).await,
        },
    }
}

/// Trigger reconciliation by updating an annotation; any change wakes the controller
async fn reconcile_command<K>(client: Client, name: &str, namespace: Option<String>) -> Result<()>
where
    K: Managed + DeserializeOwned + Resource<Scope = NamespaceResourceScope>,
{
    let ns = namespace.as_deref().unwrap_or("default");
    let kind = K::kind(&());
    println!("Triggering reconciliation for {kind} '{ns}/{name}'...");

    let api: Api<K> = Api::namespaced(client, ns);
    let timestamp = chrono::Utc::now().to_rfc3339();
    let patch = json!({
        "metadata": {
            "annotations": { (RECONCILE_ANNOTATION): timestamp }
        }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to trigger reconciliation for {kind} '{ns}/{name}'"))?;

    println!("Reconciliation triggered");
    println!("   Resource: {ns}/{name}");
    println!("   Timestamp: {timestamp}");
    Ok(())
}

fn ready_column<K: Managed>(obj: &K) -> &'static str {
    let Some(status) = obj.managed_status() else {
        return "Unknown";
    };
    let conditions = status.conditioned();
    if conditions.is(ConditionType::Ready, ConditionStatus::True) {
        "True"
    } else if conditions.is_true(ConditionType::Failed) {
        "Failed"
    } else if status.has_running_operation() {
        "Pending"
    } else {
        "False"
    }
}

async fn list_command<K>(client: Client, namespace: Option<String>) -> Result<()>
where
    K: Managed + DeserializeOwned + Resource<Scope = NamespaceResourceScope>,
{
    let kind = K::kind(&());
    let api: Api<K> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let items = api
        .list(&ListParams::default())
        .await
        .with_context(|| format!("Failed to list {kind} resources"))?
        .items;

    if items.is_empty() {
        println!("No {kind} resources found.");
        return Ok(());
    }

    println!("\n{:<45} {:<20} {:<10} {:<15} ENDPOINT", "NAME", "NAMESPACE", "READY", "STATE");
    println!("{}", "-".repeat(110));
    for item in &items {
        let status = item.managed_status();
        println!(
            "{:<45} {:<20} {:<10} {:<15} {}",
            item.name_any(),
            item.namespace().unwrap_or_default(),
            ready_column(item),
            status.map(|s| s.state.as_str()).filter(|s| !s.is_empty()).unwrap_or("-"),
            status.map(|s| s.endpoint.as_str()).filter(|s| !s.is_empty()).unwrap_or("-"),
        );
    }
    Ok(())
}

async fn status_command<K>(client: Client, name: &str, namespace: Option<String>) -> Result<()>
where
    K: Managed + DeserializeOwned + Resource<Scope = NamespaceResourceScope>,
{
    let ns = namespace.as_deref().unwrap_or("default");
    let kind = K::kind(&());
    let api: Api<K> = Api::namespaced(client, ns);
    let obj = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get {kind} '{ns}/{name}'"))?;

    println!("Status for {kind} '{ns}/{name}':\n");
    println!("Metadata:");
    if let Some(generation) = obj.meta().generation {
        println!("  Generation: {generation}");
    }
    println!("  Reclaim Policy: {:?}", obj.reclaim_policy());
    if obj.meta().deletion_timestamp.is_some() {
        println!("  Deleting: true");
    }

    let Some(status) = obj.managed_status() else {
        println!("\nStatus: No status available (resource may not have been reconciled yet)");
        return Ok(());
    };

    println!("\nStatus:");
    let field = |label: &str, value: &str| {
        if !value.is_empty() {
            println!("  {label}: {value}");
        }
    };
    field("External Name", &status.resource_name);
    field("Provider ID", &status.provider_id);
    field("State", &status.state);
    field("Endpoint", &status.endpoint);
    field("Running Operation", if status.has_running_operation() { "yes" } else { "" });
    if let Some(app_id) = &status.application_id {
        println!("  Application ID: {app_id}");
    }
    if let Some(sp) = &status.service_principal_id {
        println!("  Service Principal: {sp}");
    }
    if let Some(generation) = status.failure_generation {
        println!("  Failed At Generation: {generation}");
    }

    if !status.conditions.is_empty() {
        println!("\nConditions:");
        for condition in &status.conditions {
            println!("  {}: {:?}", condition.r#type, condition.status);
            if let Some(reason) = &condition.reason {
                println!("    Reason: {reason}");
            }
            if let Some(message) = &condition.message {
                println!("    Message: {message}");
            }
            if let Some(time) = &condition.last_transition_time {
                println!("    Last Transition: {time}");
            }
        }
    }
    Ok(())
}
