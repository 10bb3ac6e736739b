//! # Rendering
//!
//! Turns a manifest path, a source revision and a variable set into the
//! ordered list of objects that should exist.

use crate::crd::Variables;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Input of one render call
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Entry point, relative to `content_root`, or a remote URL
    pub path: &'a str,
    /// Root of the resolved source content, when the unit has a source
    pub content_root: Option<&'a Path>,
    pub revision: &'a str,
    pub variables: &'a Variables,
    /// Additional renderer arguments from the unit spec
    pub extra_args: &'a [String],
}

#[derive(Debug, Error)]
pub enum RenderError {
    /// The template or its output is invalid (not retryable)
    #[error("render failed: {0}")]
    Failed(String),
    /// The renderer could not be run (retryable)
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    #[error("render cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        request: RenderRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, RenderError>;
}
