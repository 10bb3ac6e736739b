//! # Status Tracker
//!
//! Builds the status written at the end of an attempt. The attempt works on
//! its own copy; the result is committed in one write, and only when its
//! content differs from the current status.

use crate::controller::reconciler::diff;
use crate::controller::reconciler::store::UnitStore;
use crate::controller::reconciler::types::StoreError;
use crate::crd::{
    AttemptResult, Condition, ConditionStatus, Konfiguration, KonfigurationStatus, Snapshot,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct StatusTracker {
    status: KonfigurationStatus,
    generation: Option<i64>,
    now: DateTime<Utc>,
}

impl StatusTracker {
    pub fn new(unit: &Konfiguration, now: DateTime<Utc>) -> Self {
        Self {
            status: unit.status.clone().unwrap_or_default(),
            generation: unit.generation(),
            now,
        }
    }

    pub fn current(&self) -> &KonfigurationStatus {
        &self.status
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.status.snapshot.as_ref()
    }

    /// Record an attempt on `revision`. Always advances.
    pub fn attempted(&mut self, revision: &str, handled_trigger: Option<&str>) -> &mut Self {
        self.status.last_attempted_revision = Some(revision.to_string());
        self.status.observed_generation = self.generation;
        if let Some(trigger) = handled_trigger {
            self.status.last_handled_reconcile_at = Some(trigger.to_string());
        }
        self
    }

    /// Record a fully successful apply+prune cycle
    pub fn succeeded(&mut self, revision: &str, snapshot: Snapshot) -> &mut Self {
        self.status.last_applied_revision = Some(revision.to_string());
        self.status.snapshot = Some(snapshot);
        self.status.last_attempt_result = Some(AttemptResult::Success);
        self
    }

    pub fn result(&mut self, result: AttemptResult) -> &mut Self {
        self.status.last_attempt_result = Some(result);
        self
    }

    pub fn ready(
        &mut self,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> &mut Self {
        let condition = Condition::ready(status, reason, message, self.generation);
        self.status.set_condition(condition, self.now);
        self
    }

    /// Replace the snapshot outside of a successful cycle (deletion cleanup)
    pub fn replace_snapshot(&mut self, snapshot: Option<Snapshot>) -> &mut Self {
        self.status.snapshot = snapshot;
        self
    }

    pub fn cleanup_attempts(&mut self, attempts: Option<u32>) -> &mut Self {
        self.status.cleanup_attempts = attempts;
        self
    }

    /// Stamp reconcile times and return the finished status
    pub fn finish(mut self, requeue_after: Duration) -> KonfigurationStatus {
        self.status.last_reconcile_time = Some(self.now.to_rfc3339());
        self.status.next_reconcile_time = chrono::Duration::from_std(requeue_after)
            .ok()
            .and_then(|delay| self.now.checked_add_signed(delay))
            .map(|at| at.to_rfc3339());
        self.status
    }
}

/// Whether two statuses differ in anything besides the reconcile timestamps
pub fn differs(current: Option<&KonfigurationStatus>, next: &KonfigurationStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    let strip = |status: &KonfigurationStatus| KonfigurationStatus {
        last_reconcile_time: None,
        next_reconcile_time: None,
        ..status.clone()
    };
    strip(current) != strip(next)
}

/// Merge patch replacing `current` with `next`
///
/// Members dropped from `next` (snapshot entries, cleared fields) are sent as
/// `null` so the server does not merge them back in.
pub fn status_patch(
    current: Option<&KonfigurationStatus>,
    next: &KonfigurationStatus,
) -> Result<Value, StoreError> {
    let encode = |status: Option<&KonfigurationStatus>| {
        serde_json::to_value(status).map_err(|e| StoreError::Encode(e.to_string()))
    };
    let current = encode(current)?;
    let next = encode(Some(next))?;
    let status = diff::merge_patch(&current, &next).unwrap_or_else(|| json!({}));
    Ok(json!({ "status": status }))
}

/// Commit `next` unless it matches the status the attempt started from
pub async fn commit(
    store: &dyn UnitStore,
    unit: &Konfiguration,
    next: &KonfigurationStatus,
) -> Result<bool, StoreError> {
    if !differs(unit.status.as_ref(), next) {
        debug!("Skipping status update for {} - unchanged", unit.key());
        return Ok(false);
    }
    let patch = status_patch(unit.status.as_ref(), next)?;
    store.commit_status(&unit.key(), &patch).await?;
    Ok(true)
}
