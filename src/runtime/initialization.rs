//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and collaborator wiring.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{Collaborators, KubeUnitStore, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::crd::Konfiguration;
use crate::observability;
use crate::provider::flux::FluxSourceResolver;
use crate::provider::kubecfg::KubecfgRenderer;
use crate::provider::kubernetes::{KubeClusterConnector, SecretCredentialFetcher};
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the Konfiguration CRD across all namespaces
    pub konfigurations: Api<Konfiguration>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler and collaborator setup
pub async fn initialize(controller_config: ControllerConfig) -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "konfiguration_controller=info".into()),
        )
        .init();

    info!("Starting Konfiguration Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());

    // start_server() raises is_ready once it has bound the port
    let listener_state = server_state.clone();
    let port = controller_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, listener_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle, &controller_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let konfigurations: Api<Konfiguration> = Api::all(client.clone());

    let sources = FluxSourceResolver::new(
        client.clone(),
        controller_config.artifact_cache_dir.clone(),
        controller_config.artifact_download_timeout(),
        controller_config.artifact_revisions_kept,
    )
    .context("Failed to create source resolver")?;

    let collaborators = Collaborators {
        store: Arc::new(KubeUnitStore::new(client.clone())),
        sources: Arc::new(sources),
        renderer: Arc::new(KubecfgRenderer::new(controller_config.kubecfg_binary.clone())),
        credentials: Arc::new(SecretCredentialFetcher::new(client.clone())),
        connector: Arc::new(KubeClusterConnector::new(client.clone())),
    };
    let reconciler = Arc::new(Reconciler::new(collaborators, controller_config));

    summarize_existing_resources(&konfigurations).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        konfigurations,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = config.server_startup_timeout();
    let poll_interval = config.server_poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log existing Konfigurations per namespace before the watch starts
///
/// The controller's initial list reconciles every one of them, so this is
/// only a queryability check and an operator-facing summary.
async fn summarize_existing_resources(konfigurations: &Api<Konfiguration>) {
    match konfigurations.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &list.items {
                let key = item.key();
                by_namespace.entry(key.namespace).or_default().push(key.name);
            }

            info!("Konfiguration Controller - Startup Resource Summary");
            info!("Total Resources: {}", list.items.len());
            info!("Namespaces: {}", by_namespace.len());
            for (namespace, mut names) in by_namespace {
                names.sort();
                let listed = if names.len() <= 3 {
                    names.join(", ")
                } else {
                    format!("{}, ... ({} total)", names[..3].join(", "), names.len())
                };
                info!("Namespace: {}", namespace);
                info!("  Resources ({}): {}", names.len(), listed);
            }
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
