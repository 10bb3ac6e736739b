//! # Controller
//!
//! Konfiguration reconciliation and the HTTP server for metrics and probes.

pub mod backoff;
pub mod reconciler;
pub mod server;
