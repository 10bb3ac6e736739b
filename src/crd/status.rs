//! # Konfiguration Status
//!
//! Status types for tracking reconciliation state, conditions and the
//! snapshot of the last successfully applied resource set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type of the readiness condition
pub const CONDITION_READY: &str = "Ready";

/// Condition reasons surfaced on the Ready condition
pub mod reasons {
    pub const PROGRESSING: &str = "Progressing";
    pub const RECONCILIATION_SUCCEEDED: &str = "ReconciliationSucceeded";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    pub const DEPENDENCY_CYCLE: &str = "DependencyCycle";
    pub const TIMEOUT: &str = "Timeout";
    pub const PRUNE_FAILED: &str = "PruneFailed";
    pub const RENDER_FAILED: &str = "RenderFailed";
    pub const APPLY_FAILED: &str = "ApplyFailed";
    pub const INVALID_SPEC: &str = "InvalidSpec";
}

/// Status of the Konfiguration resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonfigurationStatus {
    /// Last Konfiguration generation the controller acted on
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Revision of the last fully successful apply. Set only on success.
    #[serde(default)]
    pub last_applied_revision: Option<String>,
    /// Revision of the last attempt, whatever its outcome
    #[serde(default)]
    pub last_attempted_revision: Option<String>,
    /// Terminal result of the last attempt
    #[serde(default)]
    pub last_attempt_result: Option<AttemptResult>,
    /// Last handled value of the `kubecfg.io/reconcile-requested-at` annotation
    #[serde(default)]
    pub last_handled_reconcile_at: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Record of the last fully successful apply+prune cycle
    #[serde(default)]
    pub snapshot: Option<Snapshot>,
    /// Failed garbage-collection attempts while the Konfiguration is being deleted
    #[serde(default)]
    pub cleanup_attempts: Option<u32>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Next scheduled reconciliation time (RFC3339)
    #[serde(default)]
    pub next_reconcile_time: Option<String>,
}

impl KonfigurationStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    /// Insert or replace a condition.
    ///
    /// `lastTransitionTime` is carried over from the existing condition of the
    /// same type unless its status changes.
    pub fn set_condition(&mut self, mut condition: Condition, now: DateTime<Utc>) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.clone()
                } else {
                    now.to_rfc3339()
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = now.to_rfc3339();
                self.conditions.push(condition);
            }
        }
    }
}

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
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

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Message describing the condition
    #[serde(default)]
    pub message: String,
    /// Last time the status changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: String,
    /// Generation the condition was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Ready condition; the transition time is filled in by `set_condition`
    pub fn ready(
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: CONDITION_READY.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: String::new(),
            observed_generation,
        }
    }
}

/// Terminal result of one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum AttemptResult {
    Success,
    TransientFailure,
    FatalFailure,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::Success => "success",
            AttemptResult::TransientFailure => "transient_failure",
            AttemptResult::FatalFailure => "fatal_failure",
        }
    }
}

/// Record of the last fully successful apply+prune cycle
///
/// `resources` is the authoritative, ordered record used for garbage
/// collection and three-way diffs. `entries` is its namespace → kind → names
/// projection for external tooling.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Content hash of the manifest set that produced this snapshot
    pub checksum: String,
    /// Namespace → kind → applied object names. Cluster-scoped objects are
    /// listed under the empty namespace.
    #[serde(default)]
    pub entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Applied objects in manifest order
    #[serde(default)]
    pub resources: Vec<SnapshotResource>,
}

/// One applied object in a snapshot
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    /// Compact JSON of the configuration last applied for this object
    #[serde(default)]
    pub applied: Option<String>,
}
