//! Owner status reporting
//!
//! Every goharbor.io kind shares the same status block: the generation the
//! operator last acted on, the identity of the operator that wrote it and a
//! list of typed conditions.

use crate::config::{OPERATOR_GIT_COMMIT, OPERATOR_NAME, OPERATOR_VERSION};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Work is ongoing on the owner
pub const CONDITION_IN_PROGRESS: &str = "InProgress";
/// The owner cannot converge until its spec or the operator changes
pub const CONDITION_FAILED: &str = "Failed";
/// HarborCluster cache backend is ready
pub const CONDITION_CACHE_READY: &str = "CacheReady";
/// HarborCluster database backend is ready
pub const CONDITION_DATABASE_READY: &str = "DatabaseReady";
/// HarborCluster storage backend is ready
pub const CONDITION_STORAGE_READY: &str = "StorageReady";
/// HarborCluster Harbor service is ready
pub const CONDITION_SERVICE_READY: &str = "ServiceReady";
/// HarborCluster configuration was accepted
pub const CONDITION_CONFIGURATION_READY: &str = "ConfigurationReady";

/// Reason set on `InProgress` when the operator sees a new generation
pub const REASON_NEW_GENERATION: &str = "newGeneration";
/// Reason set when everything converged
pub const REASON_READY: &str = "ready";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

/// A status condition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (`InProgress`, `Failed`, ...)
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Identity of the operator that last wrote the status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default)]
    pub controller_name: String,
    #[serde(default)]
    pub controller_version: String,
    #[serde(default)]
    pub controller_git_commit: String,
}

impl OperatorStatus {
    /// Identity of this binary
    pub fn current() -> Self {
        Self {
            controller_name: OPERATOR_NAME.to_string(),
            controller_version: OPERATOR_VERSION.to_string(),
            controller_git_commit: OPERATOR_GIT_COMMIT.to_string(),
        }
    }
}

/// Status block shared by every goharbor.io kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Generation the operator last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Operator identity
    #[serde(default)]
    pub operator: OperatorStatus,

    /// Current replica count of the main workload, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ComponentStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Whether the given condition is `True`
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Replace or append a condition
    pub fn update_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: Option<&str>,
        message: Option<&str>,
    ) {
        update_condition(&mut self.conditions, condition_type, status, reason, message);
    }

    /// Healthy means converged on the given generation with nothing pending
    pub fn is_healthy(&self, generation: Option<i64>) -> bool {
        !self.is_true(CONDITION_IN_PROGRESS)
            && !self.is_true(CONDITION_FAILED)
            && self.observed_generation == generation
    }
}

/// Replace the entry with a matching type or append a new one.
///
/// `lastTransitionTime` only moves when the status value changes, so
/// writing the same condition twice leaves the list untouched.
pub fn update_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: Option<&str>,
    message: Option<&str>,
) {
    let reason = reason.map(str::to_string);
    let message = message.map(str::to_string);

    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(Utc::now().to_rfc3339());
            }
            existing.reason = reason;
            existing.message = message;
        }
        None => conditions.push(Condition {
            condition_type: condition_type.to_string(),
            status,
            reason,
            message,
            last_transition_time: Some(Utc::now().to_rfc3339()),
        }),
    }
}
