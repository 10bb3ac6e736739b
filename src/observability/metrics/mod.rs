//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliation, dependency gating, apply/prune operations and requeues
//! - `processing_metrics` - Rendering and source artifact handling

pub mod controller_metrics;
pub mod processing_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use processing_metrics::*;
pub use registry::*;
