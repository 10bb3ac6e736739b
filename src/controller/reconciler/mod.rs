//! # Reconciler
//!
//! Core reconciliation logic for Konfiguration resources.
//!
//! The [`Scheduler`] runs one attempt per call against its collaborators.
//! This module adapts it to the controller runtime: it turns attempt reports
//! into requeue actions and tracks per-resource error backoff.

pub mod apply;
pub mod attempt;
pub mod dependency;
pub mod diff;
mod finalizer;
pub mod prune;
pub mod revision;
pub mod scheduler;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod types;
pub mod validation;

pub use attempt::{AttemptGuard, AttemptRegistry, Deadline};
pub use scheduler::{Collaborators, Schedule, Scheduler, SchedulerSettings};
pub use store::{KubeUnitStore, UnitStore};
pub use types::*;

use crate::config::ControllerConfig;
use crate::crd::Konfiguration;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info_span, warn, Instrument};

/// Context shared by every reconciliation
#[derive(Debug)]
pub struct Reconciler {
    pub scheduler: Scheduler,
    pub config: ControllerConfig,
    /// Per-resource error backoff, keyed by namespace/name
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators, config: ControllerConfig) -> Self {
        let settings = SchedulerSettings::from(&config);
        Self {
            scheduler: Scheduler::new(collaborators, settings),
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AttemptRegistry {
        self.scheduler.registry()
    }

    fn settle_backoff(&self, resource_key: &str, state: &AttemptState) {
        match self.backoff_states.lock() {
            Ok(mut states) => settle_backoff(&mut states, resource_key, state),
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }
}

/// Reset the backoff after a handled attempt. Released resources drop their entry.
fn settle_backoff(
    states: &mut HashMap<String, BackoffState>,
    resource_key: &str,
    outcome: &AttemptState,
) {
    if *outcome == AttemptState::Released {
        states.remove(resource_key);
    } else if let Some(state) = states.get_mut(resource_key) {
        state.reset();
    }
}

/// Reconcile one Konfiguration
pub async fn reconcile(
    unit: Arc<Konfiguration>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = unit.key();
    let span = info_span!(
        "konfiguration.reconcile",
        resource.namespace = %key.namespace,
        resource.name = %key.name,
        generation = unit.generation().unwrap_or_default(),
        revision = tracing::field::Empty,
        state = tracing::field::Empty,
    );

    async move {
        metrics::increment_reconciliations();
        let start = Instant::now();
        let report = ctx.scheduler.reconcile(&unit).await?;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        tracing::Span::current().record("state", report.state.as_str());

        ctx.settle_backoff(&key.to_string(), &report.state);

        Ok(match report.requeue_after {
            Some(after) => {
                metrics::increment_requeues_total(report.state.as_str());
                Action::requeue(after)
            }
            None => Action::await_change(),
        })
    }
    .instrument(span)
    .await
}
