//! # Deletion Watch
//!
//! Interrupts the in-flight attempt of a Konfiguration as soon as its
//! deletion is observed. The controller queues the deleted object as usual,
//! and the finalizer runs once the interrupted attempt has unwound.

use crate::controller::reconciler::AttemptRegistry;
use crate::crd::Konfiguration;
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use std::pin::pin;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cancel the attempt of `unit` if it is being deleted. Returns whether an
/// attempt was interrupted.
pub fn interrupt_if_deleted(unit: &Konfiguration, registry: &AttemptRegistry) -> bool {
    if !unit.is_being_deleted() {
        return false;
    }
    let cancelled = registry.cancel(&unit.key());
    if cancelled {
        info!("Interrupted in-flight attempt of deleted Konfiguration {}", unit.key());
    }
    cancelled
}

pub fn spawn_deletion_watch(
    konfigurations: Api<Konfiguration>,
    registry: AttemptRegistry,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = watcher(konfigurations, watcher::Config::default().any_semantic())
            .default_backoff()
            .applied_objects();
        let mut stream = pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(unit)) => {
                    interrupt_if_deleted(&unit, &registry);
                }
                Ok(None) => break,
                Err(e) => warn!("Deletion watch error: {}", e),
            }
        }
    })
}
