//! # Watch Loop
//!
//! One `kube-runtime` controller per managed kind and per claim kind, all
//! running concurrently until a shutdown signal arrives. Claim controllers
//! also watch the managed kind they own so status changes propagate back.

use super::error_policy::{handle_reconciliation_error, log_controller_error, BackoffTracker};
use crate::config::ControllerConfig;
use crate::controller::binding::claim_reconciler::{Claim, ClaimBinder};
use crate::controller::reconciler::{Managed, ProvisioningReconciler, ReconcileError, Requeue};
use crate::controller::server::ServerState;
use crate::crd::{
    AksCluster, KubernetesCluster, MySQLInstance, MysqlServer, PostgreSQLInstance, PostgresqlServer,
};
use crate::observability::metrics;
use crate::provider::azure::{AksClient, AzureContext, FlexibleServerClient};
use crate::provider::ProvisioningClient;
use crate::store::{BindingStore, KubeBindingStore, KubeSecretStore, KubeStore, ObjectKey, SecretStore};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Controller};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn record_requeue(requeue: Requeue) {
    match requeue {
        Requeue::Immediately => metrics::increment_requeues_total("immediate"),
        Requeue::After(_) => metrics::increment_requeues_total("scheduled"),
        Requeue::Never => {}
    }
}

struct ManagedContext<K> {
    reconciler: ProvisioningReconciler<K>,
    backoff: BackoffTracker,
}

async fn reconcile_managed<K: Managed>(obj: Arc<K>, ctx: Arc<ManagedContext<K>>) -> Result<Action, ReconcileError> {
    let key = ObjectKey::of(obj.as_ref());
    let requeue = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key.to_string());
    record_requeue(requeue);
    Ok(requeue.into())
}

fn managed_error_policy<K: Managed>(obj: Arc<K>, error: &ReconcileError, ctx: Arc<ManagedContext<K>>) -> Action {
    let key = ObjectKey::of(obj.as_ref()).to_string();
    handle_reconciliation_error(&K::kind(&()), &key, error, &ctx.backoff)
}

async fn run_managed_controller<K>(
    client: Client,
    config: ControllerConfig,
    provider: Arc<dyn ProvisioningClient<K>>,
    secrets: Arc<dyn SecretStore>,
) where
    K: Managed + DeserializeOwned + serde::Serialize + Resource<Scope = NamespaceResourceScope>,
{
    let kind = K::kind(&()).to_string();
    let ctx = Arc::new(ManagedContext {
        backoff: BackoffTracker::new(config.error_backoff_min_secs, config.error_backoff_max_secs),
        reconciler: ProvisioningReconciler::new(
            Arc::new(KubeStore::<K>::new(client.clone())),
            provider,
            secrets,
            config.clone(),
        ),
    });
    info!("Starting {} controller", kind);
    Controller::new(api::<K>(&client, config.watch_namespace.as_deref()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_managed::<K>, managed_error_policy::<K>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                    Err(e) => log_controller_error(&kind, &e.to_string()),
                }
            }
        })
        .await;
    info!("{} controller stopped", kind);
}

struct ClaimContext<C> {
    binder: ClaimBinder<C>,
    backoff: BackoffTracker,
}

async fn reconcile_claim<C: Claim>(claim: Arc<C>, ctx: Arc<ClaimContext<C>>) -> Result<Action, ReconcileError> {
    let key = ObjectKey::of(claim.as_ref());
    let requeue = ctx.binder.reconcile(&key).await?;
    ctx.backoff.reset(&key.to_string());
    record_requeue(requeue);
    Ok(requeue.into())
}

fn claim_error_policy<C: Claim>(claim: Arc<C>, error: &ReconcileError, ctx: Arc<ClaimContext<C>>) -> Action {
    let key = ObjectKey::of(claim.as_ref()).to_string();
    handle_reconciliation_error(&C::kind(&()), &key, error, &ctx.backoff)
}

async fn run_claim_controller<C, M>(
    client: Client,
    config: ControllerConfig,
    resources: Arc<dyn BindingStore>,
    secrets: Arc<dyn SecretStore>,
) where
    C: Claim + Resource<Scope = NamespaceResourceScope>,
    M: Managed + DeserializeOwned + Resource<Scope = NamespaceResourceScope>,
{
    let kind = C::kind(&()).to_string();
    let namespace = config.watch_namespace.clone();
    let ctx = Arc::new(ClaimContext {
        backoff: BackoffTracker::new(config.error_backoff_min_secs, config.error_backoff_max_secs),
        binder: ClaimBinder::new(Arc::new(KubeStore::<C>::new(client.clone())), resources, secrets, config),
    });
    info!("Starting {} binding controller", kind);
    Controller::new(api::<C>(&client, namespace.as_deref()), watcher::Config::default())
        .owns(api::<M>(&client, namespace.as_deref()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_claim::<C>, claim_error_policy::<C>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                    Err(e) => log_controller_error(&kind, &e.to_string()),
                }
            }
        })
        .await;
    info!("{} binding controller stopped", kind);
}

/// Run every controller until shutdown
pub async fn run_watch_loop(
    client: Client,
    config: ControllerConfig,
    azure: Arc<AzureContext>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let secrets: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(client.clone()));
    let resources: Arc<dyn BindingStore> = Arc::new(KubeBindingStore::new(client.clone()));

    tokio::join!(
        run_managed_controller::<PostgresqlServer>(
            client.clone(),
            config.clone(),
            Arc::new(FlexibleServerClient::<PostgresqlServer>::new(Arc::clone(&azure))),
            Arc::clone(&secrets),
        ),
        run_managed_controller::<MysqlServer>(
            client.clone(),
            config.clone(),
            Arc::new(FlexibleServerClient::<MysqlServer>::new(Arc::clone(&azure))),
            Arc::clone(&secrets),
        ),
        run_managed_controller::<AksCluster>(
            client.clone(),
            config.clone(),
            Arc::new(AksClient::new(Arc::clone(&azure))),
            Arc::clone(&secrets),
        ),
        run_claim_controller::<PostgreSQLInstance, PostgresqlServer>(
            client.clone(),
            config.clone(),
            Arc::clone(&resources),
            Arc::clone(&secrets),
        ),
        run_claim_controller::<MySQLInstance, MysqlServer>(
            client.clone(),
            config.clone(),
            Arc::clone(&resources),
            Arc::clone(&secrets),
        ),
        run_claim_controller::<KubernetesCluster, AksCluster>(
            client.clone(),
            config.clone(),
            Arc::clone(&resources),
            Arc::clone(&secrets),
        ),
    );

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("All controllers stopped");
    Ok(())
}
