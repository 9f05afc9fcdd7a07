//! # Constants
//!
//! Shared names and default values.

/// Field manager and `app.kubernetes.io/managed-by` value
pub const FIELD_MANAGER: &str = "resource-claim-controller";

/// Finalizer blocking removal of a managed resource until external teardown completes
pub const FINALIZER: &str = "provisioning.microscaler.io/finalizer";

/// Label on managed resources naming the claim they were created for
pub const CLAIM_NAME_LABEL: &str = "provisioning.microscaler.io/claim-name";

/// Annotation bumped by `rcctl reconcile` to force a reconcile
pub const RECONCILE_ANNOTATION: &str = "provisioning.microscaler.io/reconcile";

// Connection secret keys
pub const CONNECTION_ENDPOINT_KEY: &str = "endpoint";
pub const CONNECTION_USERNAME_KEY: &str = "username";
pub const CONNECTION_PASSWORD_KEY: &str = "password";
pub const CONNECTION_CLUSTER_CA_KEY: &str = "clusterCA";
pub const CONNECTION_CLIENT_CERT_KEY: &str = "clientCert";
pub const CONNECTION_CLIENT_KEY_KEY: &str = "clientKey";

// Provisioning secret (generated credentials), named `<managed-name>-provisioning`
pub const PROVISIONING_SECRET_SUFFIX: &str = "-provisioning";
pub const PROVISIONING_ADMIN_PASSWORD_KEY: &str = "adminPassword";
pub const PROVISIONING_CLIENT_SECRET_KEY: &str = "clientSecret";

/// Length of the UID prefix appended to external resource names
pub const EXTERNAL_NAME_UID_PREFIX_LEN: usize = 8;

/// Default requeue while an external create or delete is in flight (seconds)
pub const DEFAULT_CREATING_REQUEUE_SECS: u64 = 15;

/// Default resync interval for ready resources (seconds)
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 60;

/// Consecutive observe failures before `Failed=True` is surfaced
pub const DEFAULT_MAX_OBSERVE_FAILURES: u32 = 10;

/// Failed identity cleanups tolerated before the finalizer is released anyway
pub const DEFAULT_MAX_IDENTITY_CLEANUP_ATTEMPTS: u32 = 5;

/// Error backoff bounds (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Fallback requeue when backoff state is unavailable (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default metrics/probe server port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// How long to wait for the HTTP server to come up (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Readiness poll interval during server startup (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Azure Resource Manager endpoint
pub const DEFAULT_AZURE_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";

/// Microsoft Graph endpoint
pub const DEFAULT_AZURE_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com";

/// HTTP timeout for Azure REST calls (seconds)
pub const DEFAULT_AZURE_HTTP_TIMEOUT_SECS: u64 = 30;
