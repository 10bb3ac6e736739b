//! # Revision Tracker
//!
//! Decides whether rendering can be skipped because nothing changed since the
//! last successful attempt.

use crate::crd::{AttemptResult, Konfiguration};

/// Whether a manual reconciliation was requested and not handled yet
pub fn manual_trigger_pending(unit: &Konfiguration) -> bool {
    let Some(requested) = unit.reconcile_requested_at() else {
        return false;
    };
    unit.status
        .as_ref()
        .and_then(|status| status.last_handled_reconcile_at.as_deref())
        != Some(requested)
}

/// Render unless the revision, generation and last result are unchanged
///
/// Failures are never cached: any non-successful last attempt re-renders.
pub fn should_render(unit: &Konfiguration, resolved_revision: &str) -> bool {
    let Some(status) = unit.status.as_ref() else {
        return true;
    };
    let unchanged = status.last_applied_revision.as_deref() == Some(resolved_revision)
        && status.observed_generation == unit.generation()
        && status.last_attempt_result == Some(AttemptResult::Success);
    !unchanged || manual_trigger_pending(unit)
}
