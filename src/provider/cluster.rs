//! # Cluster Client
//!
//! Object-level access to the cluster a Konfiguration targets.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identity of a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Extract the identity of a manifest. Returns None when apiVersion,
    /// kind or metadata.name is missing.
    pub fn from_manifest(manifest: &Value) -> Option<Self> {
        let api_version = manifest.get("apiVersion")?.as_str()?;
        let kind = manifest.get("kind")?.as_str()?;
        let name = manifest.pointer("/metadata/name")?.as_str()?;
        let namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty());
        Some(Self::new(api_version, kind, namespace, name))
    }

    /// Garbage-collection identity. The API version is excluded so a version
    /// bump of the same kind is not treated as a removal.
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone().unwrap_or_default(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// API group and version, core group being the empty string
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Namespace, kind and name of an object. Cluster-scoped objects carry an
/// empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Resource is namespaced (e.g., Deployment, ConfigMap).
    Namespaced,
    /// Resource is cluster-wide (e.g., Namespace, ClusterRole).
    ClusterWide,
}

/// Cluster call failure, classified by retryability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("object not found")]
    NotFound,
    /// Optimistic concurrency conflict (retryable)
    #[error("conflict: {0}")]
    Conflict(String),
    /// Payload rejected, e.g. invalid or immutable field (not retryable)
    #[error("invalid: {0}")]
    Invalid(String),
    /// Server or transport unavailable (retryable)
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClusterError::Conflict(_) | ClusterError::Unavailable(_))
    }
}

/// Object operations on the target cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Scope of the given kind
    async fn scope(&self, api_version: &str, kind: &str) -> Result<ResourceScope, ClusterError>;

    /// Fetch the live object
    async fn get(&self, object: &ObjectRef) -> Result<Value, ClusterError>;

    /// Create the object. With `dry_run` the server validates without persisting.
    async fn create(
        &self,
        object: &ObjectRef,
        payload: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError>;

    /// Apply a JSON merge patch (RFC 7386) to the live object
    async fn update(
        &self,
        object: &ObjectRef,
        patch: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError>;

    async fn delete(&self, object: &ObjectRef) -> Result<(), ClusterError>;
}

/// Builds a cluster client, either for the controller's own cluster or for a
/// remote cluster described by a kubeconfig
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig: Option<&str>)
        -> Result<Arc<dyn ClusterClient>, ClusterError>;
}
