//! # Processing Metrics
//!
//! Metrics for processing operations: kubecfg rendering and source artifact handling.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec};
use std::sync::LazyLock;

// Render metrics
static RENDER_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "konfiguration_render_total",
        "Total number of kubecfg render operations",
    )
    .expect("Failed to create RENDER_TOTAL metric - this should never happen")
});

static RENDER_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "konfiguration_render_duration_seconds",
            "Duration of kubecfg render operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RENDER_DURATION metric - this should never happen")
});

static RENDER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "konfiguration_render_errors_total",
            "Total number of render errors by failure class",
        ),
        &["reason"],
    )
    .expect("Failed to create RENDER_ERRORS_TOTAL metric - this should never happen")
});

// Artifact metrics
static ARTIFACT_DOWNLOADS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "konfiguration_artifact_downloads_total",
        "Total number of source artifact downloads",
    )
    .expect("Failed to create ARTIFACT_DOWNLOADS_TOTAL metric - this should never happen")
});

static ARTIFACT_DOWNLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "konfiguration_artifact_download_duration_seconds",
            "Duration of source artifact downloads in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create ARTIFACT_DOWNLOAD_DURATION metric - this should never happen")
});

static ARTIFACT_DOWNLOAD_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "konfiguration_artifact_download_errors_total",
        "Total number of source artifact download errors",
    )
    .expect("Failed to create ARTIFACT_DOWNLOAD_ERRORS_TOTAL metric - this should never happen")
});

static ARTIFACT_EXTRACTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "konfiguration_artifact_extractions_total",
        "Total number of source artifact extractions",
    )
    .expect("Failed to create ARTIFACT_EXTRACTIONS_TOTAL metric - this should never happen")
});

static ARTIFACT_EXTRACTION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "konfiguration_artifact_extraction_errors_total",
        "Total number of source artifact extraction errors",
    )
    .expect("Failed to create ARTIFACT_EXTRACTION_ERRORS_TOTAL metric - this should never happen")
});

/// Register processing metrics with the registry
pub(crate) fn register_processing_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RENDER_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RENDER_DURATION.clone()))?;
    REGISTRY.register(Box::new(RENDER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOADS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOAD_DURATION.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOAD_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_EXTRACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_EXTRACTION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_render_total() {
    RENDER_TOTAL.inc();
}

pub fn observe_render_duration(duration: f64) {
    RENDER_DURATION.observe(duration);
}

pub fn increment_render_errors_total(reason: &str) {
    RENDER_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_artifact_downloads_total() {
    ARTIFACT_DOWNLOADS_TOTAL.inc();
}

pub fn observe_artifact_download_duration(duration: f64) {
    ARTIFACT_DOWNLOAD_DURATION.observe(duration);
}

pub fn increment_artifact_download_errors_total() {
    ARTIFACT_DOWNLOAD_ERRORS_TOTAL.inc();
}

pub fn increment_artifact_extractions_total() {
    ARTIFACT_EXTRACTIONS_TOTAL.inc();
}

pub fn increment_artifact_extraction_errors_total() {
    ARTIFACT_EXTRACTION_ERRORS_TOTAL.inc();
}
