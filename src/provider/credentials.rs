//! # Remote Cluster Credentials
//!
//! Retrieval of kubeconfig documents referenced by `spec.kubeConfig`.

use async_trait::async_trait;
use thiserror::Error;

/// Data key holding the kubeconfig inside the referenced secret
pub const KUBECONFIG_DATA_KEY: &str = "value";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret '{namespace}/{name}' not found")]
    NotFound { namespace: String, name: String },
    #[error("secret '{namespace}/{name}' contains no '{KUBECONFIG_DATA_KEY}' key")]
    NoDataKey { namespace: String, name: String },
    #[error("failed to read secret: {0}")]
    Api(String),
}

#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    async fn fetch(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>, CredentialError>;
}
