//! # Source Resolution
//!
//! Resolves a source reference into local content and an opaque revision.

use crate::crd::CrossNamespaceSourceReference;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Local content of a resolved source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Directory holding the extracted source content
    pub content: PathBuf,
    /// Revision identifier reported by the source (e.g. "main@sha1:7680da4")
    pub revision: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {0} not found")]
    NotFound(String),
    #[error("source {0} has no artifact yet")]
    NotReady(String),
    #[error("failed to fetch source artifact: {0}")]
    Fetch(String),
    #[error("source resolution cancelled")]
    Cancelled,
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(
        &self,
        source: &CrossNamespaceSourceReference,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, SourceError>;
}
