//! # Validation
//!
//! Validates Konfiguration resources, duration strings and rendered manifests.

use crate::crd::Konfiguration;
use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_FORMAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+(ms|s|m|h|d))+$").ok());

static DURATION_COMPONENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?P<number>\d+)(?P<unit>ms|s|m|h|d)").ok());

static NAMESPACE_FORMAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

/// Parse Kubernetes duration string into std::time::Duration
/// Supports single and compound Go-style formats: "30s", "5m", "1h30m", "500ms", "1d"
/// Returns Duration or error if format is invalid
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let (Some(format), Some(component)) = (DURATION_FORMAT.as_ref(), DURATION_COMPONENT.as_ref())
    else {
        return Err(anyhow::anyhow!("Failed to compile duration regex"));
    };

    let interval_lower = duration_trimmed.to_lowercase();
    if !format.is_match(&interval_lower) {
        return Err(anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit>[<number><unit>...] (e.g., '1m', '5m', '1h30m')",
            duration_trimmed
        ));
    }

    let mut millis: u64 = 0;
    for captures in component.captures_iter(&interval_lower) {
        let number_str = captures.name("number").map_or("", |m| m.as_str());
        let unit = captures.name("unit").map_or("", |m| m.as_str());

        let number: u64 = number_str.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid duration number '{}' in '{}': {}",
                number_str,
                duration_trimmed,
                e
            )
        })?;

        let unit_millis = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid unit '{}' in duration '{}'. Expected: ms, s, m, h, or d",
                    unit,
                    duration_trimmed
                ));
            }
        };

        millis = number
            .checked_mul(unit_millis)
            .and_then(|component| millis.checked_add(component))
            .ok_or_else(|| anyhow::anyhow!("Duration '{duration_trimmed}' overflows"))?;
    }

    if millis == 0 {
        return Err(anyhow::anyhow!(
            "Duration must be greater than 0, got '{}'",
            duration_trimmed
        ));
    }

    Ok(Duration::from_millis(millis))
}

/// Validate the fields of a Konfiguration the scheduler relies on
/// Returns Ok(()) if valid, Err with descriptive message if invalid
pub fn validate_konfiguration(unit: &Konfiguration) -> Result<()> {
    validate_path(&unit.spec.path, "path")?;

    unit.interval()
        .map_err(|e| anyhow::anyhow!("Invalid interval '{}': {e}", unit.spec.interval))?;
    unit.retry_interval()
        .map_err(|e| anyhow::anyhow!("Invalid retryInterval: {e}"))?;
    unit.timeout()
        .map_err(|e| anyhow::anyhow!("Invalid timeout: {e}"))?;

    if unit.spec.source_ref.is_none() && !is_remote_path(&unit.spec.path) {
        return Err(anyhow::anyhow!(
            "sourceRef is required unless path is an http(s) URL"
        ));
    }

    for dependency in unit.dependencies() {
        if dependency.name.trim().is_empty() {
            return Err(anyhow::anyhow!("dependsOn[].name cannot be empty"));
        }
        validate_kubernetes_namespace(&dependency.namespace)?;
    }

    Ok(())
}

/// Whether the Konfiguration path points at a remote URL rather than a source path
pub fn is_remote_path(path: &str) -> bool {
    let path = path.trim();
    path.starts_with("http://") || path.starts_with("https://")
}

/// Local structural pre-check of a rendered manifest
///
/// Runs before any server-side validation so malformed renderer output is
/// reported without a round-trip.
pub fn validate_manifest(manifest: &Value) -> Result<()> {
    let api_version = manifest
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if api_version.is_empty() {
        return Err(anyhow::anyhow!("manifest has no apiVersion"));
    }

    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if kind.is_empty() {
        return Err(anyhow::anyhow!("manifest has no kind"));
    }

    let name = manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if name.trim().is_empty() {
        return Err(anyhow::anyhow!("{kind} manifest has no metadata.name"));
    }
    if name.len() > 253 {
        return Err(anyhow::anyhow!(
            "{kind} '{name}' exceeds maximum name length of 253 characters"
        ));
    }

    if let Some(namespace) = manifest.pointer("/metadata/namespace").and_then(Value::as_str) {
        validate_kubernetes_namespace(namespace)
            .map_err(|e| anyhow::anyhow!("{kind} '{name}': {e}"))?;
    }

    Ok(())
}

/// Validate Kubernetes namespace (RFC 1123 label)
/// Format: lowercase alphanumeric, hyphens
/// Length: 1-63 characters
/// Cannot start or end with hyphen
fn validate_kubernetes_namespace(namespace: &str) -> Result<()> {
    let namespace_trimmed = namespace.trim();

    if namespace_trimmed.is_empty() {
        return Err(anyhow::anyhow!("namespace cannot be empty"));
    }

    if namespace_trimmed.len() > 63 {
        return Err(anyhow::anyhow!(
            "namespace '{}' exceeds maximum length of 63 characters (got {})",
            namespace_trimmed,
            namespace_trimmed.len()
        ));
    }

    let valid = NAMESPACE_FORMAT
        .as_ref()
        .is_some_and(|re| re.is_match(namespace_trimmed));
    if !valid {
        return Err(anyhow::anyhow!(
            "namespace '{namespace_trimmed}' must be a valid RFC 1123 label (lowercase alphanumeric and hyphens)"
        ));
    }

    Ok(())
}

/// Validate a file path
/// Cannot be empty or contain null bytes or control characters
fn validate_path(path: &str, field_name: &str) -> Result<()> {
    let path_trimmed = path.trim();

    if path_trimmed.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if path_trimmed.len() > 4096 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 4096 characters (got {})",
            field_name,
            path_trimmed,
            path_trimmed.len()
        ));
    }

    if path_trimmed.chars().any(char::is_control) {
        return Err(anyhow::anyhow!(
            "{field_name} '{path_trimmed}' contains control characters"
        ));
    }

    Ok(())
}
