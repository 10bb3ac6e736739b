//! # Finalizer
//!
//! Garbage collection of a deleted Konfiguration's objects before its
//! finalizer is released. Objects are deleted in reverse apply order. After
//! too many failed attempts the finalizer is released anyway and the
//! leftovers are logged.

use crate::constants::{self, FINALIZER};
use crate::controller::reconciler::attempt::Deadline;
use crate::controller::reconciler::prune;
use crate::controller::reconciler::scheduler::{committed_snapshot, ConnectFailure, Scheduler};
use crate::controller::reconciler::status::{self, StatusTracker};
use crate::controller::reconciler::types::{AttemptReport, AttemptState, ReconcilerError};
use crate::crd::{reasons, ConditionStatus, Konfiguration};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl Scheduler {
    pub(super) async fn finalize(
        &self,
        unit: &Konfiguration,
    ) -> Result<AttemptReport, ReconcilerError> {
        let key = unit.key();
        if !unit.has_finalizer(FINALIZER) {
            return Ok(AttemptReport::done(AttemptState::Released));
        }

        let Some(_guard) = self.registry.try_begin(&key) else {
            // A normal attempt may still be running if the deletion watch
            // missed the event
            self.registry.cancel(&key);
            return Ok(AttemptReport::requeue(
                AttemptState::Busy,
                self.settings.busy_requeue,
            ));
        };

        let snapshot = match committed_snapshot(unit) {
            Some(snapshot) if unit.spec.prune && !unit.spec.suspend => snapshot.clone(),
            _ => {
                info!("Releasing {} without garbage collection", key);
                return self.release(unit).await;
            }
        };

        let timeout = unit
            .timeout()
            .unwrap_or(Duration::from_secs(constants::DEFAULT_INVALID_SPEC_REQUEUE_SECS));
        let retry = unit
            .retry_interval()
            .unwrap_or(Duration::from_secs(constants::DEFAULT_INVALID_SPEC_REQUEUE_SECS));

        // Cleanup is not interruptible: only the timeout stops it
        let deadline = Deadline::start(&CancellationToken::new(), timeout);
        info!(
            "Garbage collecting {} objects of deleted Konfiguration {}",
            snapshot.resources.len(),
            key
        );

        let (remaining, summary) = match self.connect(unit, deadline.token()).await {
            Ok(client) => {
                let report =
                    prune::prune(client.as_ref(), &snapshot.resources, deadline.token()).await;
                if report.is_success() {
                    return self.release(unit).await;
                }
                (snapshot.retain(&prune::outstanding(&report)), report.summary())
            }
            Err(ConnectFailure::Cancelled) => (
                snapshot,
                format!("timed out after {}s connecting to target cluster", timeout.as_secs()),
            ),
            Err(ConnectFailure::Failed { message, .. }) => (snapshot, message),
        };

        let attempts = unit
            .status
            .as_ref()
            .and_then(|status| status.cleanup_attempts)
            .unwrap_or(0)
            .saturating_add(1);
        let max_attempts = self.settings.max_cleanup_attempts;

        if attempts >= max_attempts {
            let leftovers: Vec<String> = remaining
                .resources
                .iter()
                .map(|resource| resource.object_ref().to_string())
                .collect();
            error!(
                "Giving up garbage collection of {} after {} attempts, leaving: {}",
                key,
                attempts,
                leftovers.join(", ")
            );
            return self.release(unit).await;
        }

        warn!(
            "Cleanup attempt {}/{} of {} failed: {}",
            attempts, max_attempts, key, summary
        );
        let mut tracker = StatusTracker::new(unit, Utc::now());
        tracker
            .replace_snapshot(Some(remaining))
            .cleanup_attempts(Some(attempts))
            .ready(
                ConditionStatus::Unknown,
                reasons::PROGRESSING,
                format!("cleanup attempt {attempts}/{max_attempts} failed: {summary}"),
            );
        status::commit(
            self.collaborators.store.as_ref(),
            unit,
            &tracker.finish(retry),
        )
        .await?;
        Ok(AttemptReport::requeue(AttemptState::Deleting, retry))
    }

    async fn release(&self, unit: &Konfiguration) -> Result<AttemptReport, ReconcilerError> {
        self.collaborators
            .store
            .set_finalizer(&unit.key(), FINALIZER, false)
            .await?;
        info!("Released finalizer of {}", unit.key());
        Ok(AttemptReport::done(AttemptState::Released))
    }
}
