//! # Managed Resource Status
//!
//! Observed state shared by every managed resource kind.

use crate::crd::condition::{ConditionType, ConditionedStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a managed resource
///
/// Persisted on the resource so that provisioning survives controller restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedStatus {
    /// Conditions in insertion order
    #[serde(default)]
    pub conditions: Vec<crate::crd::Condition>,
    /// Opaque token of the in-flight external create/delete operation
    /// Empty when no operation is running
    #[serde(default)]
    pub running_operation: String,
    /// External name of the cluster or server
    #[serde(default)]
    pub resource_name: String,
    /// Provider-assigned identifier, set once the resource has been observed
    #[serde(default)]
    pub provider_id: String,
    /// Connection endpoint reported by the provider
    #[serde(default)]
    pub endpoint: String,
    /// Provider's own provisioning state string
    #[serde(default)]
    pub state: String,
    /// Object ID of the auxiliary application identity
    #[serde(default)]
    pub application_object_id: Option<String>,
    /// Client (application) ID of the auxiliary application identity
    #[serde(default)]
    pub application_id: Option<String>,
    /// Object ID of the auxiliary service principal
    #[serde(default)]
    pub service_principal_id: Option<String>,
    /// Generation at which a non-retryable failure was recorded
    /// Provisioning is not retried until the spec generation moves past it
    #[serde(default)]
    pub failure_generation: Option<i64>,
    /// Consecutive failed observations of an existing resource
    #[serde(default)]
    pub observe_failures: u32,
    /// Failed attempts to remove auxiliary identity objects during deletion
    #[serde(default)]
    pub identity_cleanup_attempts: u32,
}

impl ManagedStatus {
    /// View the conditions as a [`ConditionedStatus`]
    pub fn conditioned(&self) -> ConditionedStatus {
        ConditionedStatus {
            conditions: self.conditions.clone(),
        }
    }

    /// Apply a mutation to the conditions
    pub fn with_conditions(&mut self, f: impl FnOnce(&mut ConditionedStatus)) {
        let mut conditioned = ConditionedStatus {
            conditions: std::mem::take(&mut self.conditions),
        };
        f(&mut conditioned);
        self.conditions = conditioned.conditions;
    }

    pub fn is_ready(&self) -> bool {
        self.conditioned().is_true(ConditionType::Ready)
    }

    pub fn has_running_operation(&self) -> bool {
        !self.running_operation.is_empty()
    }

    /// Any auxiliary identity object still recorded
    pub fn has_identity(&self) -> bool {
        self.application_object_id.is_some() || self.service_principal_id.is_some()
    }

    /// True when a create call was ever issued for this resource
    pub fn creation_attempted(&self) -> bool {
        self.conditioned().get(ConditionType::Creating).is_some()
    }

    /// Non-retryable failure recorded for the given generation
    pub fn failed_at(&self, generation: Option<i64>) -> bool {
        self.failure_generation.is_some() && self.failure_generation == generation
    }
}
