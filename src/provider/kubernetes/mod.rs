//! # Kubernetes Providers
//!
//! kube-rs backed implementations of the cluster client, the cluster
//! connector and the kubeconfig credential fetcher.

mod client;
mod credentials;

pub use client::{map_kube_error, DynamicClusterClient};
pub use credentials::SecretCredentialFetcher;

use crate::provider::cluster::{ClusterClient, ClusterConnector, ClusterError};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::sync::Arc;
use tracing::debug;

/// Connects to the controller's own cluster or to remote clusters
pub struct KubeClusterConnector {
    local: Arc<DynamicClusterClient>,
}

impl KubeClusterConnector {
    pub fn new(client: kube::Client) -> Self {
        Self {
            local: Arc::new(DynamicClusterClient::new(client)),
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeClusterConnector {
    async fn connect(
        &self,
        kubeconfig: Option<&str>,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let Some(kubeconfig) = kubeconfig else {
            return Ok(self.local.clone());
        };

        let kubeconfig = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| ClusterError::Invalid(format!("invalid kubeconfig: {e}")))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Invalid(format!("unusable kubeconfig: {e}")))?;
        debug!("Connecting to remote cluster at {}", config.cluster_url);
        let client = kube::Client::try_from(config)
            .map_err(|e| ClusterError::Unavailable(format!("failed to build client: {e}")))?;
        Ok(Arc::new(DynamicClusterClient::new(client)))
    }
}
