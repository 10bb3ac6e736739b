//! # kubecfg Rendering
//!
//! Renders jsonnet/json/yaml entrypoints with `kubecfg show -o yaml` and parses
//! the multi-document output into manifests.

use crate::observability::metrics;
use crate::provider::render::{RenderError, RenderRequest, Renderer};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

/// Renderer that shells out to the kubecfg binary
pub struct KubecfgRenderer {
    binary: String,
}

impl KubecfgRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn locate(&self) -> Result<PathBuf, RenderError> {
        which::which(&self.binary).map_err(|e| {
            RenderError::Unavailable(format!("kubecfg binary '{}' not found: {e}", self.binary))
        })
    }
}

/// kubecfg arguments for a render request, entrypoint last
pub fn show_args(request: &RenderRequest<'_>) -> Vec<String> {
    let mut args = vec!["show".to_string(), "-o".to_string(), "yaml".to_string()];
    args.extend(request.variables.to_args());
    args.extend(request.extra_args.iter().cloned());
    args.push(request.path.to_string());
    args
}

/// Parse multi-document YAML output into manifests
///
/// Empty documents are skipped and `*List` documents are flattened into their
/// items. Any document that is not a mapping is rejected.
pub fn parse_manifests(output: &str) -> Result<Vec<Value>, RenderError> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(output) {
        let value = Value::deserialize(document)
            .map_err(|e| RenderError::Failed(format!("invalid kubecfg output: {e}")))?;
        push_manifest(value, &mut manifests)?;
    }
    Ok(manifests)
}

fn push_manifest(value: Value, manifests: &mut Vec<Value>) -> Result<(), RenderError> {
    match value {
        Value::Null => Ok(()),
        Value::Object(mut object) => {
            let is_list = object
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.ends_with("List"));
            match object.remove("items") {
                Some(Value::Array(items)) if is_list => {
                    for item in items {
                        push_manifest(item, manifests)?;
                    }
                }
                Some(items) => {
                    object.insert("items".to_string(), items);
                    manifests.push(Value::Object(object));
                }
                None => manifests.push(Value::Object(object)),
            }
            Ok(())
        }
        other => Err(RenderError::Failed(format!(
            "kubecfg produced a non-object document: {other}"
        ))),
    }
}

#[async_trait]
impl Renderer for KubecfgRenderer {
    async fn render(
        &self,
        request: RenderRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, RenderError> {
        let span = info_span!(
            "kubecfg.show",
            path = request.path,
            revision = request.revision
        );
        let start = Instant::now();
        metrics::increment_render_total();

        let result = async {
            let binary = self.locate()?;

            if let Some(root) = request.content_root {
                let entrypoint = root.join(request.path);
                if !entrypoint.exists() {
                    return Err(RenderError::Failed(format!(
                        "path '{}' does not exist in revision {}",
                        request.path, request.revision
                    )));
                }
            }

            let args = show_args(&request);
            debug!("Running {} {}", binary.display(), args.join(" "));

            let mut command = tokio::process::Command::new(&binary);
            command.args(&args).kill_on_drop(true);
            if let Some(root) = request.content_root {
                command.current_dir(root);
            }

            let output = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RenderError::Cancelled),
                output = command.output() => output
                    .map_err(|e| RenderError::Unavailable(format!("failed to execute kubecfg: {e}")))?,
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("kubecfg show failed: {}", stderr.trim());
                return Err(RenderError::Failed(stderr.trim().to_string()));
            }

            let stdout = String::from_utf8(output.stdout)
                .map_err(|e| RenderError::Failed(format!("kubecfg output is not UTF-8: {e}")))?;
            parse_manifests(&stdout)
        }
        .instrument(span)
        .await;

        metrics::observe_render_duration(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            let reason = match e {
                RenderError::Failed(_) => "failed",
                RenderError::Unavailable(_) => "unavailable",
                RenderError::Cancelled => "cancelled",
            };
            metrics::increment_render_errors_total(reason);
        }
        result
    }
}
