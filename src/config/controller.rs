//! # Reconciler Configuration
//!
//! Worker pool, backoff, collaborator and probe server settings loaded from
//! environment variables.

use super::env_var_or_default;
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum number of Konfigurations reconciled concurrently
    pub max_concurrent_reconciles: u16,
    /// Fixed requeue while a dependency is not ready or a cycle is detected (seconds)
    pub dependency_requeue_secs: u64,
    /// Failed cleanup attempts before a deleted Konfiguration is released anyway
    pub max_cleanup_attempts: u32,
    /// Directory where source artifacts are downloaded and extracted
    pub artifact_cache_dir: PathBuf,
    /// Extracted revisions kept per source
    pub artifact_revisions_kept: usize,
    /// Timeout for one artifact download (seconds)
    pub artifact_download_timeout_secs: u64,
    /// kubecfg binary name or path
    pub kubecfg_binary: String,
    /// Delay before restarting a failed watch (seconds)
    pub watch_restart_delay_secs: u64,
    /// Upper bound for the watch 429 backoff (milliseconds)
    pub watch_max_backoff_ms: u64,
    /// Port serving `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Time allowed for the HTTP server to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Readiness poll interval while the HTTP server starts (milliseconds)
    pub server_poll_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            dependency_requeue_secs: DEFAULT_DEPENDENCY_REQUEUE_SECS,
            max_cleanup_attempts: DEFAULT_MAX_CLEANUP_ATTEMPTS,
            artifact_cache_dir: PathBuf::from(DEFAULT_ARTIFACT_CACHE_DIR),
            artifact_revisions_kept: DEFAULT_ARTIFACT_REVISIONS_KEPT,
            artifact_download_timeout_secs: DEFAULT_ARTIFACT_DOWNLOAD_TIMEOUT_SECS,
            kubecfg_binary: DEFAULT_KUBECFG_BINARY.to_string(),
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_max_backoff_ms: DEFAULT_WATCH_MAX_BACKOFF_MS,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            max_concurrent_reconciles: env_var_or_default(
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            )
            .max(1),
            dependency_requeue_secs: env_var_or_default(
                "DEPENDENCY_REQUEUE_SECS",
                DEFAULT_DEPENDENCY_REQUEUE_SECS,
            ),
            max_cleanup_attempts: env_var_or_default(
                "MAX_CLEANUP_ATTEMPTS",
                DEFAULT_MAX_CLEANUP_ATTEMPTS,
            ),
            artifact_cache_dir: PathBuf::from(env_var_or_default(
                "ARTIFACT_CACHE_DIR",
                DEFAULT_ARTIFACT_CACHE_DIR.to_string(),
            )),
            artifact_revisions_kept: env_var_or_default(
                "ARTIFACT_REVISIONS_KEPT",
                DEFAULT_ARTIFACT_REVISIONS_KEPT,
            )
            .max(1),
            artifact_download_timeout_secs: env_var_or_default(
                "ARTIFACT_DOWNLOAD_TIMEOUT_SECS",
                DEFAULT_ARTIFACT_DOWNLOAD_TIMEOUT_SECS,
            ),
            kubecfg_binary: env_var_or_default("KUBECFG_BINARY", DEFAULT_KUBECFG_BINARY.to_string()),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_max_backoff_ms: env_var_or_default(
                "WATCH_MAX_BACKOFF_MS",
                DEFAULT_WATCH_MAX_BACKOFF_MS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            )
            .max(1),
        }
    }

    pub fn dependency_requeue(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }

    pub fn artifact_download_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_download_timeout_secs)
    }

    pub fn server_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.server_startup_timeout_secs)
    }

    pub fn server_poll_interval(&self) -> Duration {
        Duration::from_millis(self.server_poll_interval_ms)
    }
}
