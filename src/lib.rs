//! # Konfiguration Controller
//!
//! A Kubernetes controller that continuously renders kubecfg/Jsonnet
//! configurations from FluxCD sources and reconciles the rendered objects
//! onto the local or a remote cluster.
//!
//! ## Overview
//!
//! For every `Konfiguration` resource the controller:
//!
//! 1. **Gates on dependencies** - waits until every `dependsOn` entry is Ready
//! 2. **Resolves the source** - downloads the FluxCD `GitRepository`/`Bucket` artifact
//! 3. **Renders** - runs `kubecfg show` on the configured path
//! 4. **Diffs and applies** - creates or patches objects per the diff strategy
//! 5. **Prunes** - deletes objects recorded in the last snapshot but no longer rendered
//! 6. **Reports** - commits one status update with the Ready condition and new snapshot
//!
//! ## Features
//!
//! - **Three diff strategies**: `all`, `subset` and `last-applied`
//! - **Remote clusters**: targets a cluster from a kubeconfig stored in a Secret
//! - **Garbage collection on delete**: a finalizer removes applied objects
//! - **Prometheus metrics** and **health probes** over HTTP

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
