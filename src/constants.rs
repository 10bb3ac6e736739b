//! # Constants
//!
//! Default values for controller configuration. Every value can be overridden
//! through the environment (see `config`).

/// Field manager used for status and metadata patches
pub const FIELD_MANAGER: &str = "konfiguration-controller";

/// Finalizer blocking deletion until managed objects are garbage-collected
pub const FINALIZER: &str = "kubecfg.io/finalizer";

/// Default HTTP port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default size of the reconcile worker pool
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 4;

/// Fixed backoff used while dependencies are not ready (seconds)
pub const DEFAULT_DEPENDENCY_REQUEUE_SECS: u64 = 30;

/// Failed garbage-collection attempts tolerated before a deleted
/// Konfiguration is released anyway
pub const DEFAULT_MAX_CLEANUP_ATTEMPTS: u32 = 5;

/// Requeue used when a Konfiguration spec cannot be interpreted (seconds)
pub const DEFAULT_INVALID_SPEC_REQUEUE_SECS: u64 = 300;

/// Requeue used when an attempt is refused or cancelled (seconds)
pub const DEFAULT_CANCELLED_REQUEUE_SECS: u64 = 1;

/// Requeue used by error_policy when backoff state is unavailable (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Base directory for downloaded source artifacts
pub const DEFAULT_ARTIFACT_CACHE_DIR: &str = "/tmp/konfiguration";

/// Number of artifact revisions kept per source
pub const DEFAULT_ARTIFACT_REVISIONS_KEPT: usize = 3;

/// HTTP timeout for artifact downloads (seconds)
pub const DEFAULT_ARTIFACT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Renderer binary
pub const DEFAULT_KUBECFG_BINARY: &str = "kubecfg";

/// Delay before a failed watch is restarted (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Upper bound of the watch 429 backoff (milliseconds)
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;

/// Initial watch 429 backoff (milliseconds)
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 1_000;
