//! # Flux Source Resolution
//!
//! Resolves FluxCD `GitRepository` and `Bucket` sources into extracted local
//! content. Artifacts are cached per revision under the configured cache
//! directory:
//!
//! ```text
//! {cache_dir}/{kind}/{namespace}/{name}/{branch}-sha-{short_sha}/
//! ```
//!
//! Only the newest revisions per source are kept on disk.

mod artifact;

pub use artifact::{cleanup_old_revisions, download_and_extract};

use crate::crd::{CrossNamespaceSourceReference, SourceKind};
use crate::provider::source::{ResolvedSource, SourceError, SourceResolver};
use async_trait::async_trait;
use kube::api::ApiResource;
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Artifact advertised in a Flux source status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub url: String,
    pub revision: String,
    /// Content digest, e.g. "sha256:..."
    pub digest: Option<String>,
}

impl ArtifactInfo {
    /// Read `status.artifact` of a source object. Returns None while the
    /// source controller has not produced an artifact yet.
    pub fn from_source(source: &Value) -> Option<Self> {
        let artifact = source.pointer("/status/artifact")?;
        let url = artifact.get("url")?.as_str()?;
        let revision = artifact
            .get("revision")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let digest = artifact
            .get("digest")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            url: normalize_artifact_url(url),
            revision: revision.to_string(),
            digest,
        })
    }
}

/// Strip the trailing dot Kubernetes FQDNs sometimes carry before the path
/// (e.g. `cluster.local./path`)
fn normalize_artifact_url(url: &str) -> String {
    url.replace("./", "/").trim_end_matches('.').to_string()
}

/// GVK of a Flux source kind
pub fn source_gvk(kind: SourceKind) -> GroupVersionKind {
    let version = match kind {
        SourceKind::GitRepository => "v1",
        SourceKind::Bucket => "v1beta2",
    };
    GroupVersionKind::gvk("source.toolkit.fluxcd.io", version, &kind.to_string())
}

/// Replace characters that are unsafe in a path component
pub fn sanitize_path_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    match sanitized.trim_matches('.') {
        "" => "unknown".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Cache directory name for a revision
///
/// Flux revisions look like `main@sha1:7680da431ea5...`. Both the branch and
/// a short SHA are kept so the same commit on two branches does not collide.
pub fn revision_dir(revision: &str) -> String {
    let Some((branch, rest)) = revision.split_once('@') else {
        return format!("{}-sha-unknown", sanitize_path_component(revision));
    };
    let sha = rest
        .strip_prefix("sha1:")
        .or_else(|| rest.strip_prefix("sha256:"))
        .unwrap_or(rest);
    let short_sha: String = sha.chars().take(7).collect();
    format!(
        "{}-sha-{}",
        sanitize_path_component(branch),
        sanitize_path_component(&short_sha)
    )
}

/// Source resolver backed by Flux source objects in the controller's cluster
pub struct FluxSourceResolver {
    client: kube::Client,
    http: reqwest::Client,
    cache_dir: PathBuf,
    revisions_kept: usize,
}

impl FluxSourceResolver {
    pub fn new(
        client: kube::Client,
        cache_dir: impl Into<PathBuf>,
        download_timeout: Duration,
        revisions_kept: usize,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()?;
        Ok(Self {
            client,
            http,
            cache_dir: cache_dir.into(),
            revisions_kept,
        })
    }

    async fn fetch_source(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Value, SourceError> {
        let ar = ApiResource::from_gvk(&source_gvk(kind));
        let api: kube::Api<DynamicObject> =
            kube::Api::namespaced_with(self.client.clone(), namespace, &ar);
        match api.get(name).await {
            Ok(object) => serde_json::to_value(object)
                .map_err(|e| SourceError::Fetch(format!("failed to decode {kind}: {e}"))),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(SourceError::NotFound(format!("{kind} {namespace}/{name}")))
            }
            Err(e) => Err(SourceError::Fetch(format!(
                "failed to get {kind} {namespace}/{name}: {e}"
            ))),
        }
    }

    fn source_dir(&self, kind: SourceKind, namespace: &str, name: &str) -> PathBuf {
        self.cache_dir
            .join(kind.to_string().to_lowercase())
            .join(sanitize_path_component(namespace))
            .join(sanitize_path_component(name))
    }
}

fn is_populated(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

#[async_trait]
impl SourceResolver for FluxSourceResolver {
    async fn resolve(
        &self,
        source: &CrossNamespaceSourceReference,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, SourceError> {
        let namespace = source.namespace.as_deref().unwrap_or("default");
        let object = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = self.fetch_source(source.kind, namespace, &source.name) => result?,
        };

        let artifact = ArtifactInfo::from_source(&object).ok_or_else(|| {
            SourceError::NotReady(format!("{} {namespace}/{}", source.kind, source.name))
        })?;

        let source_dir = self.source_dir(source.kind, namespace, &source.name);
        let cache_path = source_dir.join(revision_dir(&artifact.revision));

        if is_populated(&cache_path) {
            debug!(
                "Using cached {} artifact at {} (revision: {})",
                source.kind,
                cache_path.display(),
                artifact.revision
            );
            return Ok(ResolvedSource {
                content: cache_path,
                revision: artifact.revision,
            });
        }

        info!(
            "Fetching {} {}/{} artifact (revision: {})",
            source.kind, namespace, source.name, artifact.revision
        );
        download_and_extract(&self.http, &artifact, &cache_path, cancel).await?;

        if let Err(e) = cleanup_old_revisions(&source_dir, self.revisions_kept).await {
            warn!("Failed to cleanup old revisions: {}", e);
        }

        Ok(ResolvedSource {
            content: cache_path,
            revision: artifact.revision,
        })
    }
}
