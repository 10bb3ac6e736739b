//! # Custom Resource Definitions
//!
//! CRD types for the Konfiguration Controller.
//!
//! A `Konfiguration` declares one configuration unit: where its manifests come
//! from, how they are rendered, how drift is computed and whether removed
//! objects are garbage-collected.

mod status;

pub use status::*;

use crate::controller::reconciler::validation::parse_kubernetes_duration;
use anyhow::Result;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Konfiguration Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: kubecfg.io/v1
/// kind: Konfiguration
/// metadata:
///   name: podinfo
///   namespace: apps
/// spec:
///   interval: 5m
///   path: ./deploy/podinfo.jsonnet
///   sourceRef:
///     kind: GitRepository
///     name: podinfo
///   diffStrategy: subset
///   prune: true
///   variables:
///     extStr:
///       environment: production
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Konfiguration",
    group = "kubecfg.io",
    version = "v1",
    namespaced,
    status = "KonfigurationStatus",
    shortname = "konf",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Status", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}, {"name":"Revision", "type":"string", "jsonPath":".status.lastAppliedRevision"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KonfigurationSpec {
    /// Path to the jsonnet, json or yaml entrypoint, relative to the source root.
    /// May also be an `http(s)://` URL, in which case it is handed to kubecfg as-is.
    pub path: String,
    /// Reference to the FluxCD source providing the manifests
    #[serde(default)]
    pub source_ref: Option<CrossNamespaceSourceReference>,
    /// External variables and top-level arguments passed to kubecfg
    #[serde(default)]
    pub variables: Option<Variables>,
    /// Additional arguments appended to the kubecfg invocation
    #[serde(default)]
    pub kubecfg_args: Vec<String>,
    /// Strategy used to decide whether a live object needs updating
    #[serde(default)]
    pub diff_strategy: DiffStrategy,
    /// Garbage-collect objects removed from the rendered set
    #[serde(default)]
    pub prune: bool,
    /// Validate each payload with a server-side dry-run before submitting it
    #[serde(default)]
    pub validate: bool,
    /// Suspend reconciliation. Conditions are left untouched while suspended.
    #[serde(default)]
    pub suspend: bool,
    /// Reconcile interval
    /// Format: Kubernetes duration string (e.g., "1m", "5m", "1h30m")
    pub interval: String,
    /// Interval used after a failed attempt. Defaults to `interval`.
    #[serde(default)]
    pub retry_interval: Option<String>,
    /// Deadline for a whole attempt (render, apply and prune). Defaults to `interval`.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Konfigurations that must be Ready before this one is reconciled
    #[serde(default)]
    pub depends_on: Vec<DependencyReference>,
    /// Kubeconfig used to reach a remote cluster. When unset, the controller's
    /// own cluster is targeted.
    #[serde(default)]
    pub kube_config: Option<KubeConfigReference>,
}

/// Source kinds a Konfiguration can consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum SourceKind {
    GitRepository,
    Bucket,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::GitRepository => f.write_str("GitRepository"),
            SourceKind::Bucket => f.write_str("Bucket"),
        }
    }
}

/// Reference to a FluxCD source, optionally in another namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrossNamespaceSourceReference {
    pub kind: SourceKind,
    pub name: String,
    /// Defaults to the namespace of the Konfiguration
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to another Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReference {
    pub name: String,
    /// Defaults to the namespace of the referencing Konfiguration
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Secret holding a kubeconfig under the `value` key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfigReference {
    pub secret_ref: SecretReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

/// kubecfg external variables and top-level arguments
///
/// Ordered maps keep the generated argument list stable across attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    #[serde(default)]
    pub ext_str: BTreeMap<String, String>,
    #[serde(default)]
    pub ext_code: BTreeMap<String, String>,
    #[serde(default)]
    pub tla_str: BTreeMap<String, String>,
    #[serde(default)]
    pub tla_code: BTreeMap<String, String>,
}

impl Variables {
    /// Format the variables as kubecfg command line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let groups = [
            ("--ext-str", &self.ext_str),
            ("--ext-code", &self.ext_code),
            ("--tla-str", &self.tla_str),
            ("--tla-code", &self.tla_code),
        ];
        for (flag, values) in groups {
            for (key, value) in values {
                args.push(flag.to_string());
                args.push(format!("{key}={value}"));
            }
        }
        args
    }
}

/// Diff strategy used by the diff engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DiffStrategy {
    /// Compare every field of the desired object against the live object
    #[serde(rename = "all")]
    All,
    /// Compare only fields declared in the desired manifest
    #[default]
    #[serde(rename = "subset")]
    Subset,
    /// Three-way comparison against the previously applied configuration
    #[serde(rename = "last-applied")]
    LastApplied,
}

impl DiffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStrategy::All => "all",
            DiffStrategy::Subset => "subset",
            DiffStrategy::LastApplied => "last-applied",
        }
    }
}

impl JsonSchema for DiffStrategy {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("DiffStrategy")
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        // Plain string enum keeps the CRD schema structural
        let schema_value = serde_json::json!({
            "type": "string",
            "enum": ["all", "subset", "last-applied"],
            "default": "subset",
            "description": "Diff strategy. all: compare every field. subset: compare only fields declared in the manifest. last-applied: three-way comparison that also clears fields removed from source."
        });
        Schema::try_from(schema_value).expect("Failed to create Schema for DiffStrategy")
    }
}

/// Identity of a Konfiguration (namespace + name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    pub namespace: String,
    pub name: String,
}

impl UnitKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Annotation used by `konfctl reconcile` to request an immediate reconciliation
pub const RECONCILE_REQUESTED_ANNOTATION: &str = "kubecfg.io/reconcile-requested-at";

impl Konfiguration {
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn name_or_unknown(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.namespace_or_default(), self.name_or_unknown())
    }

    pub fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// The interval at which to reconcile the Konfiguration
    pub fn interval(&self) -> Result<Duration> {
        parse_kubernetes_duration(&self.spec.interval)
    }

    /// The interval at which to retry a previously failed reconciliation
    pub fn retry_interval(&self) -> Result<Duration> {
        match &self.spec.retry_interval {
            Some(retry) => parse_kubernetes_duration(retry),
            None => self.interval(),
        }
    }

    /// The deadline for render, apply and prune operations of one attempt
    pub fn timeout(&self) -> Result<Duration> {
        match &self.spec.timeout {
            Some(timeout) => parse_kubernetes_duration(timeout),
            None => self.interval(),
        }
    }

    /// Source reference with its namespace defaulted to our own
    pub fn source_ref(&self) -> Option<CrossNamespaceSourceReference> {
        self.spec.source_ref.as_ref().map(|source| {
            let mut source = source.clone();
            if source.namespace.as_deref().is_none_or(str::is_empty) {
                source.namespace = Some(self.namespace_or_default().to_string());
            }
            source
        })
    }

    /// Dependencies with their namespaces defaulted to our own
    pub fn dependencies(&self) -> Vec<UnitKey> {
        self.spec
            .depends_on
            .iter()
            .map(|dep| {
                let namespace = dep
                    .namespace
                    .as_deref()
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or_else(|| self.namespace_or_default());
                UnitKey::new(namespace, dep.name.clone())
            })
            .collect()
    }

    pub fn variables(&self) -> Variables {
        self.spec.variables.clone().unwrap_or_default()
    }

    /// Value of the manual reconcile annotation, if present
    pub fn reconcile_requested_at(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|ann| ann.get(RECONCILE_REQUESTED_ANNOTATION))
            .map(String::as_str)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }

    /// The Ready condition of the current status
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|status| status.condition(CONDITION_READY))
    }
}
