//! # Conditions
//!
//! Ordered condition records shared by managed resources and claims.
//!
//! A condition type appears at most once. Setting an existing type updates it
//! in place; setting a new type appends it. The list is never re-ordered, so
//! consumers diffing condition history see a stable sequence.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Facet of resource health tracked by a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// External resource is being created
    Creating,
    /// External resource is ready and connection details are published
    Ready,
    /// External resource is being torn down
    Deleting,
    /// Provisioning failed
    Failed,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Creating => "Creating",
            ConditionType::Ready => "Ready",
            ConditionType::Deleting => "Deleting",
            ConditionType::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a condition (True, False, Unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition represents one facet of a resource's state
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Last time the status changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(r#type: ConditionType, status: ConditionStatus) -> Self {
        Self {
            r#type,
            status,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Ordered set of conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionedStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    /// Get the condition of the given type, if present
    pub fn get(&self, r#type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// True when the condition of the given type is present with the given status
    pub fn is(&self, r#type: ConditionType, status: ConditionStatus) -> bool {
        self.get(r#type).is_some_and(|c| c.status == status)
    }

    pub fn is_true(&self, r#type: ConditionType) -> bool {
        self.is(r#type, ConditionStatus::True)
    }

    /// Set a condition, updating it in place or appending it.
    ///
    /// The transition time only moves when the status actually changes.
    pub fn set(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.status = condition.status;
                existing.reason = condition.reason;
                existing.message = condition.message;
            }
            None => self.conditions.push(condition),
        }
    }

    pub fn set_creating(&mut self) {
        self.set(Condition::new(ConditionType::Creating, ConditionStatus::True).with_reason("CreationStarted"));
    }

    /// Creation finished and the resource is usable
    pub fn set_ready(&mut self) {
        if self.get(ConditionType::Creating).is_some() {
            self.set(
                Condition::new(ConditionType::Creating, ConditionStatus::False)
                    .with_reason("CreationCompleted"),
            );
        }
        self.set(Condition::new(ConditionType::Ready, ConditionStatus::True).with_reason("Available"));
        if self.get(ConditionType::Failed).is_some() {
            self.set(Condition::new(ConditionType::Failed, ConditionStatus::False));
        }
    }

    pub fn set_deleting(&mut self, message: Option<String>) {
        let mut deleting =
            Condition::new(ConditionType::Deleting, ConditionStatus::True).with_reason("DeletionStarted");
        deleting.message = message;
        self.set(deleting);
        if self.get(ConditionType::Ready).is_some() {
            self.set(Condition::new(ConditionType::Ready, ConditionStatus::False).with_reason("Deleting"));
        }
    }

    pub fn set_failed(&mut self, reason: &str, message: impl Into<String>) {
        self.set(
            Condition::new(ConditionType::Failed, ConditionStatus::True)
                .with_reason(reason)
                .with_message(message),
        );
    }

    /// Clear a previously recorded failure, if any
    pub fn clear_failed(&mut self) {
        if self.is_true(ConditionType::Failed) {
            self.set(Condition::new(ConditionType::Failed, ConditionStatus::False));
        }
    }
}
