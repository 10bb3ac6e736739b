//! # Watch Loop
//!
//! Runs the Konfiguration controller until shutdown. Reconciliations of
//! different Konfigurations run concurrently up to the configured limit;
//! the controller never runs two reconciliations of the same object at once.

use crate::constants;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Konfiguration;
use crate::runtime::deletion_watch::spawn_deletion_watch;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Run the controller watch loop
pub async fn run_watch_loop(
    konfigurations: Api<Konfiguration>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let config = reconciler.config.clone();
    let backoff = Arc::new(AtomicU64::new(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS));
    let restart_delay = Duration::from_secs(config.watch_restart_delay_secs);

    let deletion_watch = spawn_deletion_watch(konfigurations.clone(), reconciler.registry().clone());

    info!(
        "Watching Konfigurations in all namespaces (max concurrent reconciles: {})",
        config.max_concurrent_reconciles
    );
    server_state.set_ready(true);

    Controller::new(konfigurations, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            let backoff = backoff.clone();
            async move {
                match result {
                    Ok((object, action)) => {
                        debug!("Reconciled {}: {:?}", object, action);
                        backoff.store(
                            constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS,
                            Ordering::Relaxed,
                        );
                    }
                    // Already handled by the error policy
                    Err(controller::Error::ReconcilerFailed(error, object)) => {
                        debug!("Reconciliation of {} failed: {}", object, error);
                    }
                    Err(error) => {
                        handle_watch_stream_error(
                            &error.to_string(),
                            &backoff,
                            config.watch_max_backoff_ms,
                            restart_delay,
                        )
                        .await;
                    }
                }
            }
        })
        .await;

    deletion_watch.abort();
    server_state.set_ready(false);
    info!("Controller stopped");
    Ok(())
}
